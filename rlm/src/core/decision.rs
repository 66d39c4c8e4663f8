//! Governor records persisted into `state.json` and the alignment ledger.

use serde::{Deserialize, Serialize};

use crate::core::consensus::{ConsensusReason, ConsensusResult};
use crate::core::intent::IntentVersion;
use crate::core::scoring::{DeepAuditReason, DimensionScores};
use crate::core::types::{Action, IntentChange, RiskLevel, RouteStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentConfidence {
    pub overall: f64,
    pub notes: String,
}

/// What the agent is currently trying to do, as recorded in `intent_update` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSnapshot {
    pub goals: Vec<String>,
    pub constraints: Vec<String>,
    pub priorities: Vec<String>,
    pub style_preferences: Vec<String>,
    pub evidence_refs: Vec<String>,
    pub confidence: IntentConfidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusSnapshot {
    pub turn: u32,
    pub accepted: bool,
    pub top_action: Option<Action>,
    pub top_votes: usize,
    pub top_confidence: f64,
    pub margin: f64,
    pub veto: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<ConsensusReason>,
}

impl ConsensusSnapshot {
    pub fn from_result(turn: u32, result: &ConsensusResult) -> Self {
        Self {
            turn,
            accepted: result.accepted,
            top_action: result.top_action,
            top_votes: result.top_votes,
            top_confidence: result.top_confidence,
            margin: result.margin,
            veto: result.veto,
            reasons: result.reasons.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnforcementReason {
    BlockEscalate,
    BlockAndConfirmationRequired,
}

/// Per-turn governor decision attached to a loop iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentDecision {
    pub turn: u32,
    pub action: Action,
    pub score: u32,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    /// Action implied by the score bands before anti-oscillation.
    pub policy_band: Action,
    pub route_model: String,
    pub route_strategy: RouteStrategy,
    pub deep_audit: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deep_audit_reasons: Vec<DeepAuditReason>,
    pub requires_confirmation: bool,
    pub confidence_gate_passed: bool,
    pub intent_version: IntentVersion,
    pub intent_change: IntentChange,
    pub dimensions: DimensionScores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_snapshot: Option<ConsensusSnapshot>,
    pub enforcement_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcement_reason: Option<EnforcementReason>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    pub pass: u32,
    pub nudge: u32,
    pub replan: u32,
    pub block_escalate: u32,
}

impl ActionCounts {
    pub fn record(&mut self, action: Action) {
        match action {
            Action::Pass => self.pass += 1,
            Action::Nudge => self.nudge += 1,
            Action::Replan => self.replan += 1,
            Action::BlockEscalate => self.block_escalate += 1,
        }
    }

    /// Turns where the governor overrode a plain pass.
    pub fn overrides(&self) -> u32 {
        self.nudge + self.replan + self.block_escalate
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteCounts {
    pub sentinel: u32,
    pub deep_audit: u32,
    pub arbitration: u32,
}

impl RouteCounts {
    pub fn record(&mut self, route: RouteStrategy) {
        match route {
            RouteStrategy::Sentinel => self.sentinel += 1,
            RouteStrategy::DeepAudit => self.deep_audit += 1,
            RouteStrategy::Arbitration => self.arbitration += 1,
        }
    }
}

/// Location and tail of the alignment ledger, paths relative to the run dir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub ledger_path: String,
    pub projection_path: String,
    pub events: usize,
    pub last_hash: String,
}

/// Run-level governor summary written into the final block of `state.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentSummary {
    pub enabled: bool,
    pub enforce: bool,
    pub turns_evaluated: u32,
    pub deep_audit_count: u32,
    pub requires_confirmation_count: u32,
    pub override_rate: f64,
    pub consensus_acceptance_rate: f64,
    pub action_counts: ActionCounts,
    pub route_counts: RouteCounts,
    pub intent_version: IntentVersion,
    pub rollback_recommended: bool,
    pub ledger: LedgerSummary,
}
