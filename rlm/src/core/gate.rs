//! Human-confirmation gate for governor decisions.

use serde::{Deserialize, Serialize};

use crate::core::consensus::ConsensusResult;
use crate::core::policy::AlignmentPolicy;
use crate::core::types::{Action, RiskLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    TurnWindowRequiresConfirmation,
    BlockRequiresConfirmation,
    HighReasoningUnavailable,
    ConsensusLockActive,
    ConfidenceGateFailed,
}

#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub turn: u32,
    pub risk_level: RiskLevel,
    pub action: Action,
    pub confidence: f64,
    pub consensus: Option<&'a ConsensusResult>,
    pub consensus_lock_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub requires_confirmation: bool,
    pub confidence_gate_passed: bool,
    pub reasons: Vec<GateReason>,
}

pub fn evaluate_gate(input: &GateInput<'_>, policy: &AlignmentPolicy) -> GateDecision {
    let elevated = input.risk_level.is_elevated();
    let mut reasons = Vec::new();

    if elevated && input.turn <= policy.confirmation.mandatory_turn_window {
        reasons.push(GateReason::TurnWindowRequiresConfirmation);
    }
    if input.action == Action::BlockEscalate {
        reasons.push(GateReason::BlockRequiresConfirmation);
    }
    let needs_reasoning =
        elevated || matches!(input.action, Action::Replan | Action::BlockEscalate);
    if needs_reasoning && !policy.route.high_reasoning_available {
        reasons.push(GateReason::HighReasoningUnavailable);
    }
    if input.consensus_lock_active {
        reasons.push(GateReason::ConsensusLockActive);
    }

    let consensus_accepted = match input.consensus {
        Some(snapshot) => snapshot.accepted,
        None => !input.consensus_lock_active,
    };
    let confidence_gate_passed =
        input.confidence >= policy.consensus.top_score_min && consensus_accepted;
    if !confidence_gate_passed {
        reasons.push(GateReason::ConfidenceGateFailed);
    }

    GateDecision {
        requires_confirmation: !reasons.is_empty(),
        confidence_gate_passed,
        reasons,
    }
}
