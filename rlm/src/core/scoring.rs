//! Turn scoring: six weighted dimensions, score bands, and deep-audit triggers.

use serde::{Deserialize, Serialize};

use crate::core::policy::{AlignmentPolicy, AntiGamingPolicy, ScoreBands};
use crate::core::types::{Action, Intent, RiskLevel};

/// Round to two decimals, the precision recorded in state and ledger.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoreInput {
    pub contradictions: u32,
    pub evidence_count: u32,
    /// Approximate planner prompt size in tokens.
    pub verbosity_tokens: u64,
    pub intent: Intent,
    pub deep_audit: bool,
}

/// Per-dimension scores on a 0-100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
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

impl DimensionScores {
    fn as_array(&self) -> [f64; 6] {
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

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u32,
    pub confidence: f64,
    pub action: Action,
    pub dimensions: DimensionScores,
    pub verbosity_penalty: f64,
}

/// Penalty for prompts beyond the free token allowance, capped at `max_penalty`.
pub fn verbosity_penalty(tokens: u64, policy: &AntiGamingPolicy) -> f64 {
    let free = policy.verbosity_free_tokens.max(1) as f64;
    let overflow = tokens as f64 - free;
    if overflow <= 0.0 {
        return 0.0;
    }
    (overflow / free * 0.2).clamp(0.0, policy.max_penalty)
}

fn dimension(value: f64) -> f64 {
    round2(value.clamp(0.0, 1.0) * 100.0)
}

pub fn derive_dimensions(input: &ScoreInput, penalty: f64) -> DimensionScores {
    let contradictions = f64::from(input.contradictions);
    let evidence = f64::from(input.evidence_count);
    let halted = matches!(input.intent, Intent::Pause | Intent::Fail);
    DimensionScores {
        goal_alignment: dimension(1.0 - 0.14 * contradictions),
        constraint_compliance: dimension(1.0 - 0.2 * contradictions),
        coherence: dimension(0.68 + (0.07 * evidence).min(0.28) - 0.08 * contradictions),
        completeness: dimension(0.72 + (0.06 * evidence).min(0.24) - 0.06 * contradictions),
        continuity: dimension(
            0.88 - 0.09 * contradictions - if halted { 0.2 } else { 0.0 },
        ),
        efficiency: dimension(1.0 - penalty),
    }
}

/// Map a score onto the configured bands.
pub fn action_for_score(score: u32, bands: &ScoreBands) -> Action {
    if score >= bands.pass {
        Action::Pass
    } else if score >= bands.nudge {
        Action::Nudge
    } else if score >= bands.replan {
        Action::Replan
    } else {
        Action::BlockEscalate
    }
}

/// Score a turn. Non-increasing in `contradictions` with everything else fixed.
pub fn score_turn(input: &ScoreInput, policy: &AlignmentPolicy) -> ScoreResult {
    let penalty = verbosity_penalty(input.verbosity_tokens, &policy.anti_gaming);
    let dimensions = derive_dimensions(input, penalty);
    let weighted: f64 = dimensions
        .as_array()
        .iter()
        .zip(policy.weights.as_array())
        .map(|(value, weight)| value / 100.0 * weight)
        .sum();
    let score = weighted.clamp(0.0, 100.0).round() as u32;

    let audit_bonus = if input.deep_audit { 0.04 } else { 0.0 };
    let contradiction_drag = (0.05 * f64::from(input.contradictions)).min(0.25);
    let confidence =
        round2((f64::from(score) / 100.0 - contradiction_drag + audit_bonus).clamp(0.05, 0.99));

    ScoreResult {
        score,
        confidence,
        action: action_for_score(score, &policy.bands),
        dimensions,
        verbosity_penalty: round2(penalty),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeepAuditReason {
    Contradictions,
    OverrideStreak,
    HighRisk,
    LowConsensusConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeepAuditInput {
    pub contradictions: u32,
    pub override_streak: u32,
    pub risk_level: RiskLevel,
    pub low_consensus_confidence: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepAuditDecision {
    pub triggered: bool,
    pub reasons: Vec<DeepAuditReason>,
}

pub fn evaluate_deep_audit(input: &DeepAuditInput, policy: &AlignmentPolicy) -> DeepAuditDecision {
    let audit = &policy.deep_audit;
    let mut reasons = Vec::new();
    if input.contradictions >= audit.min_contradictions {
        reasons.push(DeepAuditReason::Contradictions);
    }
    if input.override_streak >= audit.override_streak_trigger {
        reasons.push(DeepAuditReason::OverrideStreak);
    }
    if audit.on_high_risk && input.risk_level == RiskLevel::High {
        reasons.push(DeepAuditReason::HighRisk);
    }
    if input.low_consensus_confidence {
        reasons.push(DeepAuditReason::LowConsensusConfidence);
    }
    DeepAuditDecision {
        triggered: !reasons.is_empty(),
        reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(
        contradictions: u32,
        evidence_count: u32,
        tokens: u64,
        intent: Intent,
    ) -> ScoreInput {
        ScoreInput {
            contradictions,
            evidence_count,
            verbosity_tokens: tokens,
            intent,
            deep_audit: false,
        }
    }

    #[test]
    fn strong_turn_passes() {
        let result = score_turn(&input(0, 5, 180, Intent::Continue), &AlignmentPolicy::default());
        assert!(result.score >= 85, "score {}", result.score);
        assert_eq!(result.action, Action::Pass);
        assert_eq!(result.dimensions.efficiency, 100.0);
    }

    #[test]
    fn weak_turn_blocks() {
        let result = score_turn(&input(6, 0, 2200, Intent::Fail), &AlignmentPolicy::default());
        assert!(result.score < 50, "score {}", result.score);
        assert_eq!(result.action, Action::BlockEscalate);
        assert_eq!(result.verbosity_penalty, 0.35);
    }

    /// Verifies score and confidence never rise as contradictions grow.
    ///
    /// Holds evidence, verbosity, and intent fixed across a range of counts.
    #[test]
    fn score_is_monotonic_in_contradictions() {
        let policy = AlignmentPolicy::default();
        for intent in [Intent::Continue, Intent::Pause] {
            let mut previous = score_turn(&input(0, 3, 500, intent), &policy);
            for contradictions in 1..12 {
                let current = score_turn(&input(contradictions, 3, 500, intent), &policy);
                assert!(current.score <= previous.score);
                assert!(current.confidence <= previous.confidence);
                assert!(current.action >= previous.action);
                previous = current;
            }
        }
    }

    #[test]
    fn confidence_stays_within_bounds() {
        let policy = AlignmentPolicy::default();
        let worst = score_turn(&input(40, 0, 100_000, Intent::Fail), &policy);
        assert_eq!(worst.confidence, 0.05);
        let best = score_turn(
            &ScoreInput {
                deep_audit: true,
                ..input(0, 10, 0, Intent::Continue)
            },
            &policy,
        );
        assert!(best.confidence <= 0.99);
    }

    #[test]
    fn dimensions_serialize_with_long_keys() {
        let result = score_turn(&input(0, 2, 300, Intent::Continue), &AlignmentPolicy::default());
        let value = serde_json::to_value(result.dimensions).expect("serialize");
        let keys: Vec<&str> = value
            .as_object()
            .expect("object")
            .keys()
            .map(String::as_str)
            .collect();
        for key in [
            "action_evidence_coherence",
            "context_continuity",
            "efficiency_discipline",
        ] {
            assert!(keys.contains(&key), "missing {key} in {keys:?}");
        }
        assert!(!keys.contains(&"coherence"));
    }

    #[test]
    fn verbosity_penalty_scales_with_overflow() {
        let policy = AntiGamingPolicy::default();
        assert_eq!(verbosity_penalty(420, &policy), 0.0);
        assert!((verbosity_penalty(840, &policy) - 0.2).abs() < 1e-9);
        assert_eq!(verbosity_penalty(10_000, &policy), 0.35);
    }

    #[test]
    fn bands_map_scores_to_actions() {
        let bands = ScoreBands::default();
        assert_eq!(action_for_score(85, &bands), Action::Pass);
        assert_eq!(action_for_score(84, &bands), Action::Nudge);
        assert_eq!(action_for_score(70, &bands), Action::Nudge);
        assert_eq!(action_for_score(50, &bands), Action::Replan);
        assert_eq!(action_for_score(49, &bands), Action::BlockEscalate);
    }

    #[test]
    fn deep_audit_collects_every_reason() {
        let policy = AlignmentPolicy::default();
        let quiet = evaluate_deep_audit(
            &DeepAuditInput {
                contradictions: 1,
                override_streak: 1,
                risk_level: RiskLevel::Medium,
                low_consensus_confidence: false,
            },
            &policy,
        );
        assert!(!quiet.triggered);
        assert!(quiet.reasons.is_empty());

        let loud = evaluate_deep_audit(
            &DeepAuditInput {
                contradictions: 2,
                override_streak: 2,
                risk_level: RiskLevel::High,
                low_consensus_confidence: true,
            },
            &policy,
        );
        assert!(loud.triggered);
        assert_eq!(
            loud.reasons,
            vec![
                DeepAuditReason::Contradictions,
                DeepAuditReason::OverrideStreak,
                DeepAuditReason::HighRisk,
                DeepAuditReason::LowConsensusConfidence,
            ]
        );
    }
}
