//! Alignment governor: scores each loop turn, stabilizes the control action,
//! runs periodic consensus, versions intent, and records every decision in the
//! hash-chained ledger.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::core::consensus::{ConsensusResult, build_votes, evaluate_consensus};
use crate::core::decision::{
    ActionCounts, AlignmentDecision, AlignmentSummary, ConsensusSnapshot, EnforcementReason,
    IntentConfidence, IntentSnapshot, RouteCounts,
};
use crate::core::gate::{GateInput, evaluate_gate};
use crate::core::intent::{IntentVersion, derive_intent_change};
use crate::core::oscillation::{OscillationState, Stabilized, stabilize};
use crate::core::policy::AlignmentPolicy;
use crate::core::scoring::{
    DeepAuditDecision, DeepAuditInput, ScoreInput, ScoreResult, evaluate_deep_audit, round2,
    score_turn,
};
use crate::core::types::{Action, Intent, RiskLevel, RouteStrategy};
use crate::io::clock::Clock;
use crate::io::config::AlignmentConfig;
use crate::io::ledger::{
    EventDraft, EventType, LedgerIdentity, LedgerWriter, Provenance, ScoreMetadata,
};
use crate::io::session::{IngestionSession, mark_completed, resolve_session};

const MAX_EVIDENCE_REFS: usize = 12;

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub enabled: bool,
    pub enforce: bool,
    pub policy: AlignmentPolicy,
    pub identity: LedgerIdentity,
    pub goal: String,
    pub run_dir: PathBuf,
}

impl GovernorConfig {
    pub fn from_alignment(
        alignment: &AlignmentConfig,
        identity: LedgerIdentity,
        goal: impl Into<String>,
        run_dir: &Path,
    ) -> Self {
        Self {
            enabled: alignment.enabled,
            enforce: alignment.enforce,
            policy: alignment.policy.clone(),
            identity,
            goal: goal.into(),
            run_dir: run_dir.to_path_buf(),
        }
    }
}

/// What the governor needs to know about one loop turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnTelemetry {
    pub turn: u32,
    pub intent: Intent,
    pub planner_prompt_bytes: usize,
    pub planner_errors: Vec<String>,
    pub read_count: usize,
    pub search_count: usize,
    pub subcall_count: usize,
    pub risk_level: RiskLevel,
    pub evidence_refs: Vec<String>,
}

impl TurnTelemetry {
    /// Planner errors plus one each for `fail` and `pause`.
    pub fn contradictions(&self) -> u32 {
        let halted = u32::from(matches!(self.intent, Intent::Fail | Intent::Pause));
        u32::try_from(self.planner_errors.len())
            .unwrap_or(u32::MAX)
            .saturating_add(halted)
    }

    pub fn evidence_count(&self) -> u32 {
        let total = self.read_count + self.search_count + self.subcall_count;
        u32::try_from(total).unwrap_or(u32::MAX)
    }

    /// Rough token estimate: four bytes per token, rounded up.
    pub fn verbosity_tokens(&self) -> u64 {
        (self.planner_prompt_bytes as u64).div_ceil(4)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnEvaluation {
    pub decision: AlignmentDecision,
    /// Enforcement is on and the stabilized action is `block_escalate`.
    pub enforce_block: bool,
    pub enforce_reason: Option<EnforcementReason>,
}

/// Per-run alignment governor.
///
/// Owns the ledger writer for its run directory. A disabled governor
/// evaluates nothing and writes nothing.
pub struct AlignmentGovernor {
    config: GovernorConfig,
    ledger: LedgerWriter,
    session: Option<IngestionSession>,
    intent_version: IntentVersion,
    intent_snapshot: IntentSnapshot,
    oscillation: OscillationState,
    override_streak: u32,
    low_consensus_confidence: bool,
    consensus_lock_active: bool,
    turns_evaluated: u32,
    deep_audit_count: u32,
    requires_confirmation_count: u32,
    consensus_rounds: u32,
    consensus_accepted: u32,
    action_counts: ActionCounts,
    route_counts: RouteCounts,
    summary: Option<AlignmentSummary>,
}

fn bootstrap_snapshot(goal: &str) -> IntentSnapshot {
    IntentSnapshot {
        goals: vec![goal.to_string()],
        constraints: Vec::new(),
        priorities: vec![
            "safety".to_string(),
            "correctness".to_string(),
            "minimal_change".to_string(),
        ],
        style_preferences: vec!["concise".to_string(), "evidence-linked".to_string()],
        evidence_refs: Vec::new(),
        confidence: IntentConfidence {
            overall: 0.9,
            notes: "bootstrap".to_string(),
        },
    }
}

impl AlignmentGovernor {
    pub fn new(config: GovernorConfig, clock: Arc<dyn Clock>) -> Self {
        let ledger = LedgerWriter::new(&config.run_dir, config.identity.clone(), clock);
        let intent_snapshot = bootstrap_snapshot(&config.goal);
        Self {
            config,
            ledger,
            session: None,
            intent_version: IntentVersion::default(),
            intent_snapshot,
            oscillation: OscillationState::default(),
            override_streak: 0,
            low_consensus_confidence: false,
            consensus_lock_active: false,
            turns_evaluated: 0,
            deep_audit_count: 0,
            requires_confirmation_count: 0,
            consensus_rounds: 0,
            consensus_accepted: 0,
            action_counts: ActionCounts::default(),
            route_counts: RouteCounts::default(),
            summary: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn intent_version(&self) -> &IntentVersion {
        &self.intent_version
    }

    pub fn intent_snapshot(&self) -> &IntentSnapshot {
        &self.intent_snapshot
    }

    pub fn ledger(&self) -> &LedgerWriter {
        &self.ledger
    }

    fn session_key(&mut self) -> Result<String> {
        if let Some(session) = &self.session {
            return Ok(session.session_key.clone());
        }
        let session = resolve_session(&self.config.run_dir, &self.config.identity.run_id)?;
        let key = session.session_key.clone();
        self.session = Some(session);
        Ok(key)
    }

    fn score(&self, telemetry: &TurnTelemetry, deep_audit: bool) -> ScoreResult {
        score_turn(
            &ScoreInput {
                contradictions: telemetry.contradictions(),
                evidence_count: telemetry.evidence_count(),
                verbosity_tokens: telemetry.verbosity_tokens(),
                intent: telemetry.intent,
                deep_audit,
            },
            &self.config.policy,
        )
    }

    fn deep_audit(&self, telemetry: &TurnTelemetry, override_streak: u32) -> DeepAuditDecision {
        evaluate_deep_audit(
            &DeepAuditInput {
                contradictions: telemetry.contradictions(),
                override_streak,
                risk_level: telemetry.risk_level,
                low_consensus_confidence: self.low_consensus_confidence,
            },
            &self.config.policy,
        )
    }

    fn is_consensus_turn(&self, turn: u32) -> bool {
        let interval = self.config.policy.route.arbitration_interval;
        interval > 0 && turn % interval == 0
    }

    fn next_snapshot(&self, telemetry: &TurnTelemetry, confidence: f64) -> IntentSnapshot {
        let contradictions = telemetry.contradictions();
        let mut constraints = Vec::new();
        if telemetry.intent == Intent::Fail {
            constraints.push("halt-on-failure".to_string());
        }
        if contradictions > 0 {
            constraints.push(format!("contradictions:{contradictions}"));
        }
        if telemetry.intent == Intent::Final {
            constraints.push("final-answer-needs-validation".to_string());
        }
        IntentSnapshot {
            goals: vec![self.config.goal.clone()],
            constraints,
            priorities: vec![
                "safety".to_string(),
                "goal_alignment".to_string(),
                "constraint_compliance".to_string(),
            ],
            style_preferences: vec!["evidence-linked".to_string(), "non-oscillating".to_string()],
            evidence_refs: telemetry
                .evidence_refs
                .iter()
                .take(MAX_EVIDENCE_REFS)
                .cloned()
                .collect(),
            confidence: IntentConfidence {
                overall: round2(confidence.clamp(0.0, 1.0)),
                notes: format!("intent={}", telemetry.intent.as_str()),
            },
        }
    }

    /// Evaluate one turn and append its ledger events.
    ///
    /// Returns `None` when the governor is disabled.
    #[instrument(skip_all, fields(turn = telemetry.turn))]
    pub fn evaluate_turn(&mut self, telemetry: &TurnTelemetry) -> Result<Option<TurnEvaluation>> {
        if !self.config.enabled {
            return Ok(None);
        }
        let policy = &self.config.policy;
        let cooldown = policy.anti_oscillation.cooldown_turns;

        let mut audit = self.deep_audit(telemetry, self.override_streak);
        let mut scored = self.score(telemetry, audit.triggered);
        let mut stabilized: Stabilized = stabilize(scored.action, self.oscillation, cooldown);

        // Re-check with the streak this turn would leave behind.
        let projected_streak = if stabilized.action == Action::Pass {
            0
        } else {
            self.override_streak + 1
        };
        let override_aware = self.deep_audit(telemetry, projected_streak);
        if override_aware != audit {
            audit = override_aware;
            scored = self.score(telemetry, audit.triggered);
            stabilized = stabilize(scored.action, self.oscillation, cooldown);
        }
        self.oscillation = stabilized.next;
        let action = stabilized.action;

        let route = &self.config.policy.route;
        let (mut route_strategy, mut route_model) = if audit.triggered {
            (RouteStrategy::DeepAudit, route.high_reasoning_model.clone())
        } else {
            (RouteStrategy::Sentinel, route.sentinel_model.clone())
        };

        let mut consensus: Option<ConsensusResult> = None;
        if self.is_consensus_turn(telemetry.turn) {
            route_strategy = RouteStrategy::Arbitration;
            route_model = route.arbitration_model.clone();
            let votes = build_votes(action, scored.confidence, telemetry.risk_level);
            let result = evaluate_consensus(&votes, &self.config.policy.consensus);
            self.consensus_rounds += 1;
            if result.accepted {
                self.consensus_accepted += 1;
                self.low_consensus_confidence = false;
                self.consensus_lock_active = false;
            } else {
                self.low_consensus_confidence = true;
                self.consensus_lock_active = true;
            }
            debug!(
                accepted = result.accepted,
                top_votes = result.top_votes,
                margin = result.margin,
                "consensus round"
            );
            consensus = Some(result);
        }
        let consensus_snapshot = consensus
            .as_ref()
            .map(|result| ConsensusSnapshot::from_result(telemetry.turn, result));

        let gate = evaluate_gate(
            &GateInput {
                turn: telemetry.turn,
                risk_level: telemetry.risk_level,
                action,
                confidence: scored.confidence,
                consensus: consensus.as_ref(),
                consensus_lock_active: self.consensus_lock_active,
            },
            &self.config.policy,
        );

        self.override_streak = if action == Action::Pass {
            0
        } else {
            self.override_streak + 1
        };

        let contradictions = telemetry.contradictions();
        let intent_change =
            derive_intent_change(telemetry.intent, contradictions, telemetry.risk_level);
        self.intent_version = self.intent_version.bump(intent_change);
        self.intent_snapshot = self.next_snapshot(telemetry, scored.confidence);

        let enforce_block = self.config.enforce && action == Action::BlockEscalate;
        let enforce_reason = enforce_block.then_some(if gate.requires_confirmation {
            EnforcementReason::BlockAndConfirmationRequired
        } else {
            EnforcementReason::BlockEscalate
        });

        let decision = AlignmentDecision {
            turn: telemetry.turn,
            action,
            score: scored.score,
            confidence: scored.confidence,
            risk_level: telemetry.risk_level,
            policy_band: scored.action,
            route_model: route_model.clone(),
            route_strategy,
            deep_audit: audit.triggered,
            deep_audit_reasons: audit.reasons.clone(),
            requires_confirmation: gate.requires_confirmation,
            confidence_gate_passed: gate.confidence_gate_passed,
            intent_version: self.intent_version.clone(),
            intent_change,
            dimensions: scored.dimensions,
            consensus_snapshot: consensus_snapshot.clone(),
            enforcement_blocked: enforce_block,
            enforcement_reason: enforce_reason,
        };

        let score_metadata = ScoreMetadata::for_decision(
            action,
            scored.score,
            scored.confidence,
            gate.requires_confirmation,
            telemetry.risk_level,
        );
        let provenance = Provenance::new(route_strategy, route_model.clone());
        let turn_key = format!("{}:turn:{}", self.session_key()?, telemetry.turn);
        let label = self.intent_version.label.clone();

        self.ledger.append(EventDraft {
            event_type: EventType::IntentUpdate,
            intent_version: label.clone(),
            payload: json!({
                "turn": telemetry.turn,
                "intent_change": intent_change,
                "snapshot": self.intent_snapshot,
            }),
            score_metadata: score_metadata.clone(),
            provenance: provenance.clone(),
            idempotency_key: format!("{turn_key}:intent"),
        })?;

        self.ledger.append(EventDraft {
            event_type: if audit.triggered {
                EventType::DeepAudit
            } else {
                EventType::Sentinel
            },
            intent_version: label.clone(),
            payload: json!({
                "turn": telemetry.turn,
                "planner_errors": telemetry.planner_errors,
                "deep_audit_reasons": audit.reasons,
                "route_strategy": route_strategy,
                "route_model": route_model,
                "gate_reasons": gate.reasons,
            }),
            score_metadata: score_metadata.clone(),
            provenance,
            idempotency_key: format!("{turn_key}:check"),
        })?;

        if let Some(snapshot) = &consensus_snapshot {
            self.ledger.append(EventDraft {
                event_type: EventType::ConsensusSnapshot,
                intent_version: label,
                payload: serde_json::to_value(snapshot)?,
                score_metadata,
                provenance: Provenance::new(
                    RouteStrategy::Arbitration,
                    self.config.policy.route.arbitration_model.clone(),
                ),
                idempotency_key: format!("{turn_key}:consensus"),
            })?;
        }

        self.turns_evaluated += 1;
        self.action_counts.record(action);
        self.route_counts.record(route_strategy);
        if decision.deep_audit {
            self.deep_audit_count += 1;
        }
        if decision.requires_confirmation {
            self.requires_confirmation_count += 1;
        }

        debug!(
            action = action.as_str(),
            score = decision.score,
            confidence = decision.confidence,
            deep_audit = decision.deep_audit,
            held = stabilized.held,
            intent_version = %decision.intent_version.label,
            "alignment decision"
        );
        if enforce_block {
            warn!(turn = telemetry.turn, "alignment enforcement blocked the turn");
        }

        Ok(Some(TurnEvaluation {
            decision,
            enforce_block,
            enforce_reason,
        }))
    }

    fn build_summary(&self) -> AlignmentSummary {
        let turns = f64::from(self.turns_evaluated.max(1));
        let override_rate = round2(f64::from(self.action_counts.overrides()) / turns);
        let consensus_acceptance_rate = if self.consensus_rounds == 0 {
            0.0
        } else {
            round2(f64::from(self.consensus_accepted) / f64::from(self.consensus_rounds))
        };
        let rollback_recommended = self.action_counts.block_escalate > 0
            || (self.consensus_rounds > 0 && consensus_acceptance_rate < 0.8);
        AlignmentSummary {
            enabled: true,
            enforce: self.config.enforce,
            turns_evaluated: self.turns_evaluated,
            deep_audit_count: self.deep_audit_count,
            requires_confirmation_count: self.requires_confirmation_count,
            override_rate,
            consensus_acceptance_rate,
            action_counts: self.action_counts,
            route_counts: self.route_counts,
            intent_version: self.intent_version.clone(),
            rollback_recommended,
            ledger: self.ledger.summary(),
        }
    }

    /// Append the `final_summary` event and close the ingestion session.
    ///
    /// Repeated calls return the first summary without writing again.
    #[instrument(skip_all)]
    pub fn finalize(&mut self) -> Result<Option<AlignmentSummary>> {
        if !self.config.enabled {
            return Ok(None);
        }
        if let Some(summary) = &self.summary {
            return Ok(Some(summary.clone()));
        }
        let summary = self.build_summary();
        let key = format!("{}:final", self.session_key()?);
        self.ledger.append(EventDraft {
            event_type: EventType::FinalSummary,
            intent_version: self.intent_version.label.clone(),
            payload: serde_json::to_value(&summary)?,
            score_metadata: ScoreMetadata::final_summary(),
            provenance: Provenance::new(
                RouteStrategy::Sentinel,
                self.config.policy.route.sentinel_model.clone(),
            ),
            idempotency_key: key,
        })?;
        if let Some(session) = &self.session {
            mark_completed(&self.config.run_dir, session)?;
        }

        let summary = AlignmentSummary {
            ledger: self.ledger.summary(),
            ..summary
        };
        debug!(
            turns = summary.turns_evaluated,
            override_rate = summary.override_rate,
            rollback = summary.rollback_recommended,
            "alignment finalized"
        );
        self.summary = Some(summary.clone());
        Ok(Some(summary))
    }
}
