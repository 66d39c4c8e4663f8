//! Multi-evaluator consensus over candidate actions.

use serde::{Deserialize, Serialize};

use crate::core::policy::ConsensusPolicy;
use crate::core::scoring::round2;
use crate::core::types::{Action, RiskLevel};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub evaluator_id: String,
    pub action: Action,
    pub confidence: f64,
    #[serde(default)]
    pub veto: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusReason {
    InsufficientVotes,
    LowConfidence,
    LowMargin,
    Veto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub accepted: bool,
    pub top_action: Option<Action>,
    pub top_votes: usize,
    pub top_confidence: f64,
    pub margin: f64,
    pub veto: bool,
    pub reasons: Vec<ConsensusReason>,
}

/// Build the primary vote (`e1`) plus two synthetic evaluators (`e2`, `e3`).
///
/// Secondary evaluators escalate one severity step when the primary
/// confidence is below their thresholds, and carry lower confidence on
/// high-risk turns. The tertiary evaluator vetoes a primary `block_escalate`.
pub fn build_votes(action: Action, confidence: f64, risk_level: RiskLevel) -> Vec<Vote> {
    let confidence = confidence.clamp(0.05, 0.99);
    let penalty = if risk_level == RiskLevel::High {
        0.12
    } else {
        0.07
    };
    let secondary = if confidence >= 0.74 {
        action
    } else {
        action.more_severe()
    };
    let tertiary = if confidence >= 0.82 {
        action
    } else {
        secondary.more_severe()
    };
    vec![
        Vote {
            evaluator_id: "e1".to_string(),
            action,
            confidence: round2(confidence),
            veto: false,
        },
        Vote {
            evaluator_id: "e2".to_string(),
            action: secondary,
            confidence: round2((confidence - penalty).clamp(0.05, 0.99)),
            veto: false,
        },
        Vote {
            evaluator_id: "e3".to_string(),
            action: tertiary,
            confidence: round2((confidence - 1.4 * penalty).clamp(0.05, 0.99)),
            veto: action == Action::BlockEscalate,
        },
    ]
}

struct ActionGroup {
    action: Action,
    votes: usize,
    confidence: f64,
}

/// Accept only when the top action has enough votes, enough average
/// confidence, a clear margin over the runner-up, and no veto.
pub fn evaluate_consensus(votes: &[Vote], policy: &ConsensusPolicy) -> ConsensusResult {
    let mut groups: Vec<ActionGroup> = Action::ALL
        .iter()
        .filter_map(|action| {
            let matching: Vec<f64> = votes
                .iter()
                .filter(|vote| vote.action == *action)
                .map(|vote| vote.confidence.clamp(0.0, 1.0))
                .collect();
            if matching.is_empty() {
                return None;
            }
            Some(ActionGroup {
                action: *action,
                votes: matching.len(),
                confidence: round2(matching.iter().sum::<f64>() / matching.len() as f64),
            })
        })
        .collect();
    groups.sort_by(|a, b| {
        b.votes
            .cmp(&a.votes)
            .then_with(|| b.confidence.total_cmp(&a.confidence))
    });

    let top = groups.first();
    let top_votes = top.map_or(0, |group| group.votes);
    let top_confidence = top.map_or(0.0, |group| group.confidence);
    let runner_up = groups.get(1).map_or(0.0, |group| group.confidence);
    let margin = round2(top_confidence - runner_up);
    let veto = votes.iter().any(|vote| vote.veto);

    let mut reasons = Vec::new();
    if top_votes < policy.required_votes {
        reasons.push(ConsensusReason::InsufficientVotes);
    }
    if top_confidence < policy.top_score_min {
        reasons.push(ConsensusReason::LowConfidence);
    }
    if margin < policy.margin_min {
        reasons.push(ConsensusReason::LowMargin);
    }
    if veto {
        reasons.push(ConsensusReason::Veto);
    }

    ConsensusResult {
        accepted: reasons.is_empty(),
        top_action: top.map(|group| group.action),
        top_votes,
        top_confidence,
        margin,
        veto,
        reasons,
    }
}
