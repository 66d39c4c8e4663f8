//! Alignment policy: weights, bands, and thresholds for the governor.
//!
//! Every section is `#[serde(default)]`, so a config file only needs to name
//! the values it overrides.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentPolicy {
    pub weights: DimensionWeights,
    pub bands: ScoreBands,
    pub deep_audit: DeepAuditPolicy,
    pub consensus: ConsensusPolicy,
    pub anti_gaming: AntiGamingPolicy,
    pub anti_oscillation: AntiOscillationPolicy,
    pub confirmation: ConfirmationPolicy,
    pub route: RoutePolicy,
}

impl AlignmentPolicy {
    pub fn validate(&self) -> Result<()> {
        let bands = &self.bands;
        if !(bands.pass >= bands.nudge && bands.nudge >= bands.replan) {
            bail!("alignment.bands must satisfy pass >= nudge >= replan");
        }
        if bands.pass > 100 {
            bail!("alignment.bands.pass must be <= 100");
        }
        let weights = self.weights.as_array();
        if weights.iter().any(|weight| *weight < 0.0) {
            bail!("alignment.weights must be non-negative");
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            bail!("alignment.weights must not all be zero");
        }
        if !(0.0..=1.0).contains(&self.anti_gaming.max_penalty) {
            bail!("alignment.anti_gaming.max_penalty must be within [0, 1]");
        }
        Ok(())
    }
}

/// Weights of the six scoring dimensions; the defaults sum to 100.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionWeights {
    pub goal_alignment: f64,
    pub constraint_compliance: f64,
    #[serde(rename = "action_evidence_coherence")]
    pub coherence: f64,
    pub completeness: f64,
    #[serde(rename = "context_continuity")]
    pub continuity: f64,
    #[serde(rename = "efficiency_discipline")]
    pub efficiency: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            goal_alignment: 30.0,
            constraint_compliance: 20.0,
            coherence: 15.0,
            completeness: 15.0,
            continuity: 10.0,
            efficiency: 10.0,
        }
    }
}

impl DimensionWeights {
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.goal_alignment,
            self.constraint_compliance,
            self.coherence,
            self.completeness,
            self.continuity,
            self.efficiency,
        ]
    }
}

/// Minimum scores for each action; anything below `replan` blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreBands {
    pub pass: u32,
    pub nudge: u32,
    pub replan: u32,
}

impl Default for ScoreBands {
    fn default() -> Self {
        Self {
            pass: 85,
            nudge: 70,
            replan: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepAuditPolicy {
    pub min_contradictions: u32,
    pub override_streak_trigger: u32,
    pub on_high_risk: bool,
}

impl Default for DeepAuditPolicy {
    fn default() -> Self {
        Self {
            min_contradictions: 2,
            override_streak_trigger: 2,
            on_high_risk: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusPolicy {
    pub top_score_min: f64,
    pub margin_min: f64,
    pub required_votes: usize,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            top_score_min: 0.7,
            margin_min: 0.15,
            required_votes: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiGamingPolicy {
    pub verbosity_free_tokens: u64,
    pub max_penalty: f64,
}

impl Default for AntiGamingPolicy {
    fn default() -> Self {
        Self {
            verbosity_free_tokens: 420,
            max_penalty: 0.35,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiOscillationPolicy {
    pub cooldown_turns: u32,
}

impl Default for AntiOscillationPolicy {
    fn default() -> Self {
        Self { cooldown_turns: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationPolicy {
    /// Elevated-risk turns up to and including this index need confirmation.
    pub mandatory_turn_window: u32,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            mandatory_turn_window: 20,
        }
    }
}

/// Evaluator model labels recorded in ledger provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePolicy {
    pub sentinel_model: String,
    pub high_reasoning_model: String,
    pub arbitration_model: String,
    pub high_reasoning_available: bool,
    /// Every Nth turn is routed to arbitration.
    pub arbitration_interval: u32,
}

impl Default for RoutePolicy {
    fn default() -> Self {
        Self {
            sentinel_model: "sentinel-fast".to_string(),
            high_reasoning_model: "reasoning-deep".to_string(),
            arbitration_model: "reasoning-deep".to_string(),
            high_reasoning_available: true,
            arbitration_interval: 20,
        }
    }
}
