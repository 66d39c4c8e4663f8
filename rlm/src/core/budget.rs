//! Per-iteration byte/count budgets and wall-clock deadline helpers.

use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Ceilings applied to every planner turn.
///
/// Plan validation clamps requests to these values; the prompt builder uses
/// `max_planner_prompt_bytes` as its hard size limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SymbolicBudgets {
    pub max_subcalls_per_iteration: usize,
    pub max_searches_per_iteration: usize,
    pub max_chunk_reads_per_iteration: usize,
    pub max_bytes_per_chunk_read: u64,
    pub max_snippets_per_subcall: usize,
    pub max_bytes_per_snippet: u64,
    pub max_subcall_input_bytes: u64,
    pub max_planner_prompt_bytes: usize,
    pub search_top_k: usize,
    pub max_preview_bytes: usize,
    /// Accepted for compatibility; subcalls always run sequentially.
    pub max_concurrency: usize,
}

impl Default for SymbolicBudgets {
    fn default() -> Self {
        Self {
            max_subcalls_per_iteration: 4,
            max_searches_per_iteration: 4,
            max_chunk_reads_per_iteration: 8,
            max_bytes_per_chunk_read: 8192,
            max_snippets_per_subcall: 8,
            max_bytes_per_snippet: 8192,
            max_subcall_input_bytes: 120_000,
            max_planner_prompt_bytes: 32_768,
            search_top_k: 20,
            max_preview_bytes: 512,
            max_concurrency: 4,
        }
    }
}

impl SymbolicBudgets {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("max_bytes_per_chunk_read", self.max_bytes_per_chunk_read),
            ("max_bytes_per_snippet", self.max_bytes_per_snippet),
            ("max_subcall_input_bytes", self.max_subcall_input_bytes),
            ("max_planner_prompt_bytes", self.max_planner_prompt_bytes as u64),
            ("search_top_k", self.search_top_k as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                bail!("budgets.{name} must be > 0");
            }
        }
        Ok(())
    }
}

/// Wall-clock deadline for a run; `None` budget means unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn after(budget: Option<Duration>) -> Self {
        Self {
            at: budget.map(|budget| Instant::now() + budget),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.at.is_some()
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Remaining time until the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.checked_duration_since(Instant::now()).unwrap_or(Duration::ZERO))
    }
}
