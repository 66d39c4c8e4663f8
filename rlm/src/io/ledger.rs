//! Append-only, hash-chained alignment ledger (`alignment/ledger.jsonl`).
//!
//! Each line is one compact JSON event whose `hash` covers every other field,
//! including `prev_hash`. The first event links to [`GENESIS_HASH`]. A derived
//! projection (`alignment/projection.json`) is rewritten after every append.
//!
//! Concurrent writers to the same run directory are unsupported.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::core::decision::{ActionCounts, LedgerSummary};
use crate::core::types::{Action, RiskLevel, RouteStrategy};
use crate::io::artifacts::relative_display;
use crate::io::atomic::write_json_atomic;
use crate::io::clock::Clock;

pub const LEDGER_SCHEMA_VERSION: u32 = 1;
pub const GENESIS_HASH: &str = "GENESIS";
pub const LEDGER_FILE: &str = "ledger.jsonl";
pub const PROJECTION_FILE: &str = "projection.json";
pub const PROVENANCE_SOURCE: &str = "alignment_checker";
const FINAL_SUMMARY_ACTION: &str = "final_summary";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IntentUpdate,
    Sentinel,
    DeepAudit,
    ConsensusSnapshot,
    FinalSummary,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::IntentUpdate => "intent_update",
            EventType::Sentinel => "sentinel",
            EventType::DeepAudit => "deep_audit",
            EventType::ConsensusSnapshot => "consensus_snapshot",
            EventType::FinalSummary => "final_summary",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        [
            EventType::IntentUpdate,
            EventType::Sentinel,
            EventType::DeepAudit,
            EventType::ConsensusSnapshot,
            EventType::FinalSummary,
        ]
        .into_iter()
        .find(|kind| kind.as_str() == raw)
    }

    fn is_decision(self) -> bool {
        matches!(self, EventType::Sentinel | EventType::DeepAudit)
    }
}

/// Who produced the events of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerIdentity {
    pub thread_id: String,
    pub task_id: String,
    pub run_id: String,
    pub agent_id: String,
}

/// Decision summary carried on every event; all-null for `final_summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreMetadata {
    pub action: Option<String>,
    pub score: Option<u32>,
    pub confidence: Option<f64>,
    pub requires_confirmation: bool,
    pub risk_level: Option<RiskLevel>,
}

impl Default for ScoreMetadata {
    fn default() -> Self {
        Self {
            action: None,
            score: None,
            confidence: None,
            requires_confirmation: false,
            risk_level: None,
        }
    }
}

impl ScoreMetadata {
    pub fn for_decision(
        action: Action,
        score: u32,
        confidence: f64,
        requires_confirmation: bool,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            action: Some(action.as_str().to_string()),
            score: Some(score),
            confidence: Some(confidence),
            requires_confirmation,
            risk_level: Some(risk_level),
        }
    }

    pub fn final_summary() -> Self {
        Self {
            action: Some(FINAL_SUMMARY_ACTION.to_string()),
            ..Self::default()
        }
    }

    fn decision_action(&self) -> Option<Action> {
        let raw = self.action.as_deref()?;
        Action::ALL.into_iter().find(|action| action.as_str() == raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: String,
    pub route_strategy: RouteStrategy,
    pub route_model: String,
}

impl Provenance {
    pub fn new(route_strategy: RouteStrategy, route_model: impl Into<String>) -> Self {
        Self {
            source: PROVENANCE_SOURCE.to_string(),
            route_strategy,
            route_model: route_model.into(),
        }
    }
}

/// Caller-supplied part of an event; the writer fills ids, time, and hashes.
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub event_type: EventType,
    pub intent_version: String,
    pub payload: Value,
    pub score_metadata: ScoreMetadata,
    pub provenance: Provenance,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub event_id: String,
    pub timestamp_utc: String,
    pub thread_id: String,
    pub task_id: String,
    pub run_id: String,
    pub agent_id: String,
    pub event_type: EventType,
    pub intent_version: String,
    pub schema_version: u32,
    pub payload: Value,
    pub score_metadata: ScoreMetadata,
    pub provenance: Provenance,
    pub idempotency_key: String,
    pub prev_hash: String,
    pub hash: String,
}

/// Hash input: every event field except `hash`, in wire order.
#[derive(Serialize)]
struct HashedFields<'a> {
    event_id: &'a str,
    timestamp_utc: &'a str,
    thread_id: &'a str,
    task_id: &'a str,
    run_id: &'a str,
    agent_id: &'a str,
    event_type: EventType,
    intent_version: &'a str,
    schema_version: u32,
    payload: &'a Value,
    score_metadata: &'a ScoreMetadata,
    provenance: &'a Provenance,
    idempotency_key: &'a str,
    prev_hash: &'a str,
}

impl LedgerEvent {
    /// SHA-256 hex over the canonical JSON of all fields but `hash`.
    pub fn compute_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(&HashedFields {
            event_id: &self.event_id,
            timestamp_utc: &self.timestamp_utc,
            thread_id: &self.thread_id,
            task_id: &self.task_id,
            run_id: &self.run_id,
            agent_id: &self.agent_id,
            event_type: self.event_type,
            intent_version: &self.intent_version,
            schema_version: self.schema_version,
            payload: &self.payload,
            score_metadata: &self.score_metadata,
            provenance: &self.provenance,
            idempotency_key: &self.idempotency_key,
            prev_hash: &self.prev_hash,
        })
        .context("serialize ledger event for hashing")?;
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

fn is_object_or_absent(value: Option<&Value>) -> bool {
    value.is_none_or(Value::is_object)
}

/// Parse one ledger line, returning `None` for anything unusable.
pub fn parse_ledger_line(line: &str) -> Option<LedgerEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(trimmed).ok()?;
    let map = value.as_object()?;
    map.get("idempotency_key")?.as_str()?;
    map.get("hash")?.as_str()?;
    EventType::parse(map.get("event_type")?.as_str()?)?;
    if !is_object_or_absent(map.get("payload"))
        || !is_object_or_absent(map.get("score_metadata"))
    {
        return None;
    }
    serde_json::from_value(value).ok()
}

fn read_events(path: &Path) -> Result<(Vec<LedgerEvent>, usize)> {
    if !path.exists() {
        return Ok((Vec::new(), 0));
    }
    let raw = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut events = Vec::new();
    let mut skipped = 0;
    for bytes in raw.split(|byte| *byte == b'\n') {
        let Ok(line) = std::str::from_utf8(bytes) else {
            skipped += 1;
            continue;
        };
        match parse_ledger_line(line) {
            Some(event) => events.push(event),
            None if line.trim().is_empty() => {}
            None => skipped += 1,
        }
    }
    Ok((events, skipped))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionTotals {
    pub events: usize,
    pub deep_audits: u32,
    pub confirmations: u32,
    pub consensus_snapshots: u32,
    pub actions: ActionCounts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestEvent {
    pub event_id: String,
    pub event_type: EventType,
    pub intent_version: String,
    pub action: Option<String>,
    pub score: Option<u32>,
    pub confidence: Option<f64>,
}

/// Derived view of the ledger, regenerated after every append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub schema_version: u32,
    pub derived_from: String,
    pub generated_at: String,
    pub totals: ProjectionTotals,
    pub latest: Option<LatestEvent>,
    pub hash_tail: String,
}

/// Action and confirmation totals count only `sentinel`/`deep_audit` events.
pub fn build_projection(events: &[LedgerEvent], generated_at: String) -> Projection {
    let mut totals = ProjectionTotals {
        events: events.len(),
        deep_audits: 0,
        confirmations: 0,
        consensus_snapshots: 0,
        actions: ActionCounts::default(),
    };
    for event in events {
        if event.event_type.is_decision() {
            if let Some(action) = event.score_metadata.decision_action() {
                totals.actions.record(action);
            }
            if event.score_metadata.requires_confirmation {
                totals.confirmations += 1;
            }
        }
        match event.event_type {
            EventType::DeepAudit => totals.deep_audits += 1,
            EventType::ConsensusSnapshot => totals.consensus_snapshots += 1,
            _ => {}
        }
    }
    let tail = events.last();
    Projection {
        schema_version: LEDGER_SCHEMA_VERSION,
        derived_from: "alignment-ledger".to_string(),
        generated_at,
        totals,
        latest: tail.map(|event| LatestEvent {
            event_id: event.event_id.clone(),
            event_type: event.event_type,
            intent_version: event.intent_version.clone(),
            action: event.score_metadata.action.clone(),
            score: event.score_metadata.score,
            confidence: event.score_metadata.confidence,
        }),
        hash_tail: tail.map_or_else(|| GENESIS_HASH.to_string(), |event| event.hash.clone()),
    }
}

/// Single-writer ledger for one run directory.
///
/// The existing file is replayed lazily on first use to rebuild the key set
/// and the chain tail. Stored hashes are trusted, not re-verified.
pub struct LedgerWriter {
    run_dir: PathBuf,
    ledger_path: PathBuf,
    projection_path: PathBuf,
    identity: LedgerIdentity,
    clock: Arc<dyn Clock>,
    loaded: bool,
    events: Vec<LedgerEvent>,
    keys: HashSet<String>,
    last_hash: String,
}

impl LedgerWriter {
    pub fn new(run_dir: &Path, identity: LedgerIdentity, clock: Arc<dyn Clock>) -> Self {
        let alignment_dir = run_dir.join("alignment");
        Self {
            run_dir: run_dir.to_path_buf(),
            ledger_path: alignment_dir.join(LEDGER_FILE),
            projection_path: alignment_dir.join(PROJECTION_FILE),
            identity,
            clock,
            loaded: false,
            events: Vec::new(),
            keys: HashSet::new(),
            last_hash: GENESIS_HASH.to_string(),
        }
    }

    pub fn ledger_path(&self) -> &Path {
        &self.ledger_path
    }

    pub fn projection_path(&self) -> &Path {
        &self.projection_path
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    fn ensure_loaded(&mut self) -> Result<()> {
        if self.loaded {
            return Ok(());
        }
        if let Some(parent) = self.ledger_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let (events, skipped) = read_events(&self.ledger_path)?;
        for event in events {
            self.keys.insert(event.idempotency_key.clone());
            self.last_hash = event.hash.clone();
            self.events.push(event);
        }
        debug!(
            events = self.events.len(),
            skipped,
            "alignment ledger replayed"
        );
        self.loaded = true;
        Ok(())
    }

    /// Append an event unless its idempotency key is already recorded.
    #[instrument(
        skip_all,
        fields(event_type = draft.event_type.as_str(), key = %draft.idempotency_key)
    )]
    pub fn append(&mut self, draft: EventDraft) -> Result<Option<LedgerEvent>> {
        self.ensure_loaded()?;
        if self.keys.contains(&draft.idempotency_key) {
            debug!("duplicate idempotency key; skipping");
            return Ok(None);
        }
        let mut event = LedgerEvent {
            event_id: Uuid::new_v4().to_string(),
            timestamp_utc: self.clock.now_rfc3339(),
            thread_id: self.identity.thread_id.clone(),
            task_id: self.identity.task_id.clone(),
            run_id: self.identity.run_id.clone(),
            agent_id: self.identity.agent_id.clone(),
            event_type: draft.event_type,
            intent_version: draft.intent_version,
            schema_version: LEDGER_SCHEMA_VERSION,
            payload: draft.payload,
            score_metadata: draft.score_metadata,
            provenance: draft.provenance,
            idempotency_key: draft.idempotency_key,
            prev_hash: self.last_hash.clone(),
            hash: String::new(),
        };
        event.hash = event.compute_hash()?;

        let mut line = serde_json::to_string(&event).context("serialize ledger event")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.ledger_path)
            .with_context(|| format!("open {}", self.ledger_path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.ledger_path.display()))?;

        self.keys.insert(event.idempotency_key.clone());
        self.last_hash = event.hash.clone();
        self.events.push(event.clone());

        let projection = build_projection(&self.events, self.clock.now_rfc3339());
        write_json_atomic(&self.projection_path, &projection)?;
        Ok(Some(event))
    }

    pub fn summary(&self) -> LedgerSummary {
        LedgerSummary {
            ledger_path: relative_display(&self.run_dir, &self.ledger_path),
            projection_path: relative_display(&self.run_dir, &self.projection_path),
            events: self.events.len(),
            last_hash: self.last_hash.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainBreakKind {
    /// `prev_hash` does not match the previous event's `hash`.
    PrevHashMismatch,
    /// Stored `hash` does not match the recomputed digest.
    HashMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    /// Zero-based position among parsed events.
    pub index: usize,
    pub idempotency_key: String,
    pub kind: ChainBreakKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub events: usize,
    pub skipped_lines: usize,
    pub last_hash: String,
    pub first_break: Option<ChainBreak>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }
}

/// Walk the chain from genesis, recomputing every hash.
///
/// This is an explicit audit; writers never run it on load.
pub fn verify_chain(ledger_path: &Path) -> Result<ChainReport> {
    let (events, skipped_lines) = read_events(ledger_path)?;
    let mut expected_prev = GENESIS_HASH.to_string();
    let mut first_break = None;
    for (index, event) in events.iter().enumerate() {
        let kind = if event.prev_hash != expected_prev {
            Some(ChainBreakKind::PrevHashMismatch)
        } else if event.compute_hash()? != event.hash {
            Some(ChainBreakKind::HashMismatch)
        } else {
            None
        };
        if let Some(kind) = kind {
            first_break = Some(ChainBreak {
                index,
                idempotency_key: event.idempotency_key.clone(),
                kind,
            });
            break;
        }
        expected_prev = event.hash.clone();
    }
    Ok(ChainReport {
        events: events.len(),
        skipped_lines,
        last_hash: events
            .last()
            .map_or_else(|| GENESIS_HASH.to_string(), |event| event.hash.clone()),
        first_break,
    })
}

/// Load the projection written next to a ledger.
pub fn load_projection(path: &Path) -> Result<Projection> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FixedClock;
    use serde_json::json;

    fn identity() -> LedgerIdentity {
        LedgerIdentity {
            thread_id: "thread-1".into(),
            task_id: "task-1".into(),
            run_id: "run-1".into(),
            agent_id: "agent-1".into(),
        }
    }

    fn writer(run_dir: &Path) -> LedgerWriter {
        LedgerWriter::new(run_dir, identity(), Arc::new(FixedClock::default()))
    }

    fn draft(key: &str, event_type: EventType, action: Action) -> EventDraft {
        EventDraft {
            event_type,
            intent_version: "1.0.1".into(),
            payload: json!({ "turn": 1 }),
            score_metadata: ScoreMetadata::for_decision(action, 80, 0.75, true, RiskLevel::Low),
            provenance: Provenance::new(RouteStrategy::Sentinel, "sentinel-fast"),
            idempotency_key: key.into(),
        }
    }

    #[test]
    fn duplicate_keys_are_stored_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ledger = writer(temp.path());
        let first = ledger
            .append(draft("s:turn:1:check", EventType::Sentinel, Action::Pass))
            .expect("append");
        assert!(first.is_some());
        let second = ledger
            .append(draft("s:turn:1:check", EventType::Sentinel, Action::Nudge))
            .expect("append");
        assert!(second.is_none());
        let raw = fs::read_to_string(ledger.ledger_path()).expect("read");
        assert_eq!(raw.lines().count(), 1);
        assert_eq!(ledger.summary().events, 1);
    }

    /// Verifies every stored event links to its predecessor and re-hashes cleanly.
    #[test]
    fn chain_links_from_genesis() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ledger = writer(temp.path());
        for (idx, key) in ["a", "b", "c"].iter().enumerate() {
            let event = ledger
                .append(draft(key, EventType::Sentinel, Action::ALL[idx]))
                .expect("append")
                .expect("new event");
            assert_eq!(event.compute_hash().expect("hash"), event.hash);
        }
        let events = ledger.events();
        assert_eq!(events[0].prev_hash, GENESIS_HASH);
        assert_eq!(events[1].prev_hash, events[0].hash);
        assert_eq!(events[2].prev_hash, events[1].hash);

        let report = verify_chain(ledger.ledger_path()).expect("verify");
        assert!(report.is_intact(), "{report:?}");
        assert_eq!(report.events, 3);
        assert_eq!(report.last_hash, events[2].hash);
        assert_eq!(ledger.summary().last_hash, events[2].hash);
    }

    #[test]
    fn replay_restores_keys_and_tail() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tail = {
            let mut ledger = writer(temp.path());
            ledger
                .append(draft("k1", EventType::IntentUpdate, Action::Pass))
                .expect("append");
            ledger
                .append(draft("k2", EventType::Sentinel, Action::Pass))
                .expect("append")
                .expect("event")
                .hash
        };

        let mut reopened = writer(temp.path());
        assert!(reopened
            .append(draft("k2", EventType::Sentinel, Action::Pass))
            .expect("append")
            .is_none());
        let next = reopened
            .append(draft("k3", EventType::Sentinel, Action::Pass))
            .expect("append")
            .expect("event");
        assert_eq!(next.prev_hash, tail);
        assert_eq!(reopened.summary().events, 3);
    }

    #[test]
    fn replay_skips_malformed_lines() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ledger = writer(temp.path());
        ledger
            .append(draft("good", EventType::Sentinel, Action::Pass))
            .expect("append");
        let mut file = OpenOptions::new()
            .append(true)
            .open(ledger.ledger_path())
            .expect("open");
        writeln!(file, "not json").expect("write");
        writeln!(file).expect("write");
        let unknown_type = json!({"idempotency_key": "x", "hash": "h", "event_type": "mystery"});
        writeln!(file, "{unknown_type}").expect("write");
        let null_payload = json!({
            "idempotency_key": "y",
            "hash": "h",
            "event_type": "sentinel",
            "payload": null
        });
        writeln!(file, "{null_payload}").expect("write");
        drop(file);

        let mut reopened = writer(temp.path());
        let next = reopened
            .append(draft("x", EventType::Sentinel, Action::Pass))
            .expect("append");
        assert!(next.is_some(), "key from a skipped line must not count");
        assert_eq!(reopened.events().len(), 2);

        let report = verify_chain(reopened.ledger_path()).expect("verify");
        assert_eq!(report.skipped_lines, 3);
        assert!(report.is_intact());
    }

    #[test]
    fn replay_skips_lines_that_are_not_utf8() {
        let temp = tempfile::tempdir().expect("tempdir");
        let alignment = temp.path().join("alignment");
        fs::create_dir_all(&alignment).expect("mkdir");
        fs::write(alignment.join(LEDGER_FILE), b"\xff\xfe torn line\n").expect("write");

        let mut ledger = writer(temp.path());
        let event = ledger
            .append(draft("after-torn", EventType::Sentinel, Action::Pass))
            .expect("append")
            .expect("event");
        assert_eq!(event.prev_hash, GENESIS_HASH);
        assert_eq!(ledger.events().len(), 1);

        let report = verify_chain(ledger.ledger_path()).expect("verify");
        assert_eq!(report.events, 1);
        assert_eq!(report.skipped_lines, 1);
        assert!(report.is_intact());
    }

    #[test]
    fn tampered_payload_breaks_chain() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ledger = writer(temp.path());
        ledger
            .append(draft("a", EventType::Sentinel, Action::Pass))
            .expect("append");
        ledger
            .append(draft("b", EventType::Sentinel, Action::Pass))
            .expect("append");
        let raw = fs::read_to_string(ledger.ledger_path()).expect("read");
        fs::write(ledger.ledger_path(), raw.replacen("\"turn\":1", "\"turn\":9", 1))
            .expect("write");

        let report = verify_chain(ledger.ledger_path()).expect("verify");
        let broken = report.first_break.expect("break");
        assert_eq!(broken.index, 0);
        assert_eq!(broken.kind, ChainBreakKind::HashMismatch);
    }

    #[test]
    fn projection_counts_only_decision_events() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut ledger = writer(temp.path());
        ledger
            .append(draft("i", EventType::IntentUpdate, Action::Pass))
            .expect("append");
        ledger
            .append(draft("s", EventType::Sentinel, Action::Nudge))
            .expect("append");
        ledger
            .append(draft("d", EventType::DeepAudit, Action::BlockEscalate))
            .expect("append");
        ledger
            .append(draft("c", EventType::ConsensusSnapshot, Action::Pass))
            .expect("append");
        ledger
            .append(EventDraft {
                event_type: EventType::FinalSummary,
                intent_version: "1.0.3".into(),
                payload: json!({}),
                score_metadata: ScoreMetadata::final_summary(),
                provenance: Provenance::new(RouteStrategy::Sentinel, "sentinel-fast"),
                idempotency_key: "final".into(),
            })
            .expect("append");

        let projection = load_projection(ledger.projection_path()).expect("projection");
        assert_eq!(projection.derived_from, "alignment-ledger");
        assert_eq!(projection.totals.events, 5);
        assert_eq!(projection.totals.deep_audits, 1);
        assert_eq!(projection.totals.consensus_snapshots, 1);
        assert_eq!(projection.totals.confirmations, 2);
        assert_eq!(projection.totals.actions.pass, 0);
        assert_eq!(projection.totals.actions.nudge, 1);
        assert_eq!(projection.totals.actions.block_escalate, 1);
        let latest = projection.latest.expect("latest");
        assert_eq!(latest.event_type, EventType::FinalSummary);
        assert_eq!(latest.action.as_deref(), Some("final_summary"));
        assert_eq!(latest.score, None);
        assert_eq!(projection.hash_tail, ledger.summary().last_hash);
    }

    #[test]
    fn empty_projection_points_at_genesis() {
        let projection = build_projection(&[], "now".into());
        assert!(projection.latest.is_none());
        assert_eq!(projection.hash_tail, GENESIS_HASH);
        let raw = serde_json::to_value(&projection).expect("json");
        assert!(raw["latest"].is_null());
    }

    #[test]
    fn summary_paths_are_run_relative() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = writer(temp.path());
        let summary = ledger.summary();
        assert_eq!(summary.ledger_path, "alignment/ledger.jsonl");
        assert_eq!(summary.projection_path, "alignment/projection.json");
        assert_eq!(summary.last_hash, GENESIS_HASH);
    }
}
