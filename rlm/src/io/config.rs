//! Loop configuration stored as TOML (`rlm.toml`).

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::core::budget::SymbolicBudgets;
use crate::core::chunking::ChunkingConfig;
use crate::core::policy::AlignmentPolicy;
use crate::io::atomic::write_atomic;

/// Symbolic loop configuration (TOML).
///
/// Meant to be edited by humans; every section and field is optional and
/// falls back to the defaults below.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RlmConfig {
    pub chunking: ChunkingConfig,
    pub budgets: SymbolicBudgets,
    pub limits: LoopLimits,
    pub alignment: AlignmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopLimits {
    /// Iteration ceiling; `0` means unbounded and then requires `max_minutes`.
    pub max_iterations: u32,
    /// Wall-clock ceiling in minutes; absent or `0` means unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_minutes: Option<u64>,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: 88,
            max_minutes: Some(48 * 60),
        }
    }
}

impl LoopLimits {
    pub fn time_budget(&self) -> Option<Duration> {
        self.max_minutes
            .filter(|minutes| *minutes > 0)
            .map(|minutes| Duration::from_secs(minutes * 60))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlignmentConfig {
    pub enabled: bool,
    /// When set, a stabilized `block_escalate` stops the run.
    pub enforce: bool,
    pub policy: AlignmentPolicy,
}

impl RlmConfig {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.budgets.validate()?;
        if self.alignment.enabled {
            self.alignment.policy.validate()?;
        }
        if self.alignment.enforce && !self.alignment.enabled {
            bail!("alignment.enforce requires alignment.enabled");
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RlmConfig::default()`.
pub fn load_config(path: &Path) -> Result<RlmConfig> {
    if !path.exists() {
        let cfg = RlmConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RlmConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RlmConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
