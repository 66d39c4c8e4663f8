//! Loop-level tests for the symbolic loop.
//!
//! These drive `run_symbolic_loop` with scripted planner and subcaller fakes
//! over a real on-disk context object, then inspect `state.json` and the run
//! artifacts the loop leaves behind.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};

use rlm::core::budget::SymbolicBudgets;
use rlm::core::types::{Action, FinalStatus};
use rlm::exit_codes;
use rlm::governor::{AlignmentGovernor, GovernorConfig};
use rlm::io::config::{AlignmentConfig, LoopLimits};
use rlm::io::ledger::verify_chain;
use rlm::io::session::session_path;
use rlm::io::state::{STATE_FILE, load_state};
use rlm::symbolic::{LoopOutcome, SymbolicLoopConfig, run_symbolic_loop};
use rlm::test_support::{
    FixedClock, ScriptedPlanner, ScriptedSubcaller, ledger_identity, text_store,
};

const GOAL: &str = "find the incident root cause";

fn plan(value: Value) -> String {
    value.to_string()
}

fn config(max_iterations: u32) -> SymbolicLoopConfig {
    SymbolicLoopConfig {
        goal: GOAL.to_string(),
        limits: LoopLimits {
            max_iterations,
            max_minutes: None,
        },
        budgets: SymbolicBudgets::default(),
    }
}

fn run(
    run_dir: &Path,
    text: &str,
    planner: &ScriptedPlanner,
    subcaller: &ScriptedSubcaller,
    config: &SymbolicLoopConfig,
) -> LoopOutcome {
    let store = text_store(run_dir, text, 4096, 128);
    run_symbolic_loop(run_dir, &store, planner, subcaller, config, None).expect("run loop")
}

#[test]
fn ten_thousand_byte_source_builds_three_overlapping_chunks() {
    let temp = tempfile::tempdir().expect("tempdir");
    let text = "x".repeat(10_000);
    let store = text_store(temp.path(), &text, 4096, 128);

    let chunks = &store.object().index.chunks;
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[1].start, 3968);
    assert_eq!(chunks[2].end, 10_000);
    assert_eq!(store.source_byte_length(), 10_000);
}

/// Verifies a plan that is rejected twice ends the run without an iteration record.
///
/// `final` without `final_answer`/`final_var` fails validation; the retry sees
/// the error code and both raw responses are kept under `planner/`.
#[test]
fn final_without_answer_twice_is_invalid_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    let bad = plan(json!({"schema_version": 1, "intent": "final"}));
    let planner = ScriptedPlanner::new([bad.clone(), bad]);
    let subcaller = ScriptedSubcaller::default();

    let outcome = run(temp.path(), "some text", &planner, &subcaller, &config(5));

    assert_eq!(outcome.exit_code, exit_codes::INVALID_CONFIG);
    assert_eq!(outcome.status(), Some(FinalStatus::InvalidConfig));
    assert!(outcome.state.iterations.is_empty());

    let calls = planner.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].1, 0);
    assert_eq!(calls[1].1, 1);
    assert!(calls[1].0.starts_with("Return valid JSON only."));
    assert!(calls[1].0.contains("Previous error: plan_validation_error"));

    let planner_dir = temp.path().join("planner");
    assert!(planner_dir.join("iteration-1-attempt-1.txt").exists());
    assert!(planner_dir.join("iteration-1-attempt-2.txt").exists());

    let stored = load_state(&temp.path().join(STATE_FILE))
        .expect("load state")
        .expect("state present");
    assert_eq!(stored, outcome.state);
}

#[test]
fn rejected_plan_is_retried_once_and_errors_are_recorded() {
    let temp = tempfile::tempdir().expect("tempdir");
    let planner = ScriptedPlanner::new([
        "no json here".to_string(),
        plan(json!({"schema_version": 1, "intent": "final", "final_answer": "done"})),
    ]);
    let subcaller = ScriptedSubcaller::default();

    let outcome = run(temp.path(), "some text", &planner, &subcaller, &config(5));

    assert_eq!(outcome.exit_code, exit_codes::OK);
    let block = outcome.state.outcome.as_ref().expect("final block");
    assert_eq!(block.final_answer.as_deref(), Some("done"));
    assert_eq!(outcome.state.iterations.len(), 1);
    assert_eq!(
        outcome.state.iterations[0].planner_errors,
        vec!["plan_parse_error".to_string()]
    );
}

#[test]
fn unknown_subcall_pointer_fails_validation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let read_unknown = plan(json!({
        "schema_version": 1,
        "intent": "continue",
        "reads": [{"pointer": "subcall:1:sc0001", "bytes": 10}]
    }));
    let planner = ScriptedPlanner::new([read_unknown.clone(), read_unknown]);
    let subcaller = ScriptedSubcaller::default();

    let outcome = run(temp.path(), "some text", &planner, &subcaller, &config(5));

    assert_eq!(outcome.exit_code, exit_codes::INVALID_CONFIG);
    let attempt = fs::read_to_string(temp.path().join("planner/iteration-1-attempt-2.txt"))
        .expect("read failure dump");
    assert!(attempt.starts_with("# errors: plan_validation_error; plan_validation_error"));
}

/// Verifies an oversized subcall request is clipped to the input budget.
///
/// The span asks for 1000 bytes against a 512-byte ceiling: the prompt carries
/// exactly 512 source bytes and the record keeps the requested size while
/// flagging `clamped.bytes`.
#[test]
fn subcall_input_is_clipped_to_budget() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(5);
    cfg.budgets.max_subcall_input_bytes = 512;
    let planner = ScriptedPlanner::new([
        plan(json!({
            "schema_version": 1,
            "intent": "continue",
            "subcalls": [{
                "purpose": "summarize",
                "spans": [{"start_byte": 0, "end_byte": 1000}],
                "max_input_bytes": 1000
            }]
        })),
        plan(json!({"schema_version": 1, "intent": "final", "final_answer": "done"})),
    ]);
    let subcaller = ScriptedSubcaller::new(["short summary"]);

    let outcome = run(temp.path(), &"x".repeat(2000), &planner, &subcaller, &cfg);

    assert_eq!(outcome.exit_code, exit_codes::OK);
    let record = &outcome.state.iterations[0].subcalls[0];
    assert_eq!(record.id, "sc0001");
    assert_eq!(record.output_pointer, "subcall:1:sc0001");
    assert_eq!(record.max_input_bytes, 1000);
    assert!(record.clamped.bytes);
    assert!(!record.clamped.snippets);

    let calls = subcaller.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "sc0001");
    assert_eq!(calls[0].prompt.matches('x').count(), 512);

    let dir = temp.path().join("subcalls/1/sc0001");
    for name in ["input.json", "prompt.txt", "output.txt", "meta.json"] {
        assert!(dir.join(name).exists(), "missing {name}");
    }
    let input: Value =
        serde_json::from_str(&fs::read_to_string(dir.join("input.json")).expect("read input"))
            .expect("parse input");
    assert_eq!(input["max_input_bytes"], 512);
    let meta: Value =
        serde_json::from_str(&fs::read_to_string(dir.join("meta.json")).expect("read meta"))
            .expect("parse meta");
    assert_eq!(meta["clipped"], true);
    assert_eq!(
        fs::read_to_string(dir.join("output.txt")).expect("read output"),
        "short summary"
    );
    assert_eq!(record.artifact_paths.output, "subcalls/1/sc0001/output.txt");
}

#[test]
fn snippets_and_spans_share_the_per_subcall_cap() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = config(5);
    cfg.budgets.max_snippets_per_subcall = 2;
    let planner = ScriptedPlanner::new([
        plan(json!({
            "schema_version": 1,
            "intent": "continue",
            "subcalls": [{
                "snippets": [{"start_byte": 0, "bytes": 4}],
                "spans": [
                    {"start_byte": 4, "end_byte": 8},
                    {"start_byte": 8, "end_byte": 12}
                ],
                "max_input_bytes": 100
            }]
        })),
        plan(json!({"schema_version": 1, "intent": "final", "final_answer": "done"})),
    ]);
    let subcaller = ScriptedSubcaller::default();

    let outcome = run(temp.path(), "aaaabbbbcccc", &planner, &subcaller, &cfg);

    let record = &outcome.state.iterations[0].subcalls[0];
    assert_eq!(record.snippets.len(), 1);
    assert_eq!(record.spans.len(), 1);
    assert!(record.clamped.snippets);
    assert!(!record.clamped.bytes);
    let prompt = &subcaller.calls()[0].prompt;
    assert!(prompt.contains("Snippet 1:\naaaa"));
    assert!(prompt.contains("Snippet 2:\nbbbb"));
    assert!(!prompt.contains("cccc"));
}

/// Verifies subcall outputs chain: a later turn reads one by pointer and a
/// final plan returns another through its bound variable.
#[test]
fn subcall_outputs_chain_through_pointers_and_variables() {
    let temp = tempfile::tempdir().expect("tempdir");
    let planner = ScriptedPlanner::new([
        plan(json!({
            "schema_version": 1,
            "intent": "continue",
            "subcalls": [{
                "purpose": "extract",
                "output_var": "cause",
                "spans": [{"start_byte": 0, "end_byte": 20}],
                "max_input_bytes": 100
            }]
        })),
        plan(json!({
            "schema_version": 1,
            "intent": "continue",
            "reads": [{"pointer": "subcall:1:sc0001", "offset": 6, "bytes": 4}]
        })),
        plan(json!({"schema_version": 1, "intent": "final", "final_var": "cause"})),
    ]);
    let subcaller = ScriptedSubcaller::new(["alpha beta gamma"]);

    let outcome = run(
        temp.path(),
        "disk filled at 03:00 and the service crashed",
        &planner,
        &subcaller,
        &config(10),
    );

    assert_eq!(outcome.exit_code, exit_codes::OK);
    let block = outcome.state.outcome.as_ref().expect("final block");
    assert_eq!(block.final_answer.as_deref(), Some("alpha beta gamma"));

    let first = &outcome.state.iterations[0];
    assert_eq!(first.variable_bindings.len(), 1);
    let binding = &first.variable_bindings[0];
    assert_eq!(binding.name, "cause");
    assert_eq!(binding.pointer, "subcall:1:sc0001");
    assert_eq!(binding.output_bytes, "alpha beta gamma".len());
    assert_eq!(binding.output_path, "subcalls/1/sc0001/output.txt");

    let calls = planner.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls[1].0.contains("subcall:1:sc0001"));
    assert!(calls[2].0.contains("- subcall:1:sc0001: beta"));
}

#[test]
fn unbound_final_var_is_rejected() {
    let temp = tempfile::tempdir().expect("tempdir");
    let unbound = plan(json!({"schema_version": 1, "intent": "final", "final_var": "missing"}));
    let planner = ScriptedPlanner::new([unbound.clone(), unbound]);
    let subcaller = ScriptedSubcaller::default();

    let outcome = run(temp.path(), "some text", &planner, &subcaller, &config(5));

    assert_eq!(outcome.exit_code, exit_codes::INVALID_CONFIG);
    let calls = planner.calls();
    assert!(calls[1].0.contains("Previous error: final_var_unbound"));
    assert!(calls[1].0.contains("Use final_var only when"));
}

#[test]
fn searches_feed_the_next_prompt() {
    let temp = tempfile::tempdir().expect("tempdir");
    let planner = ScriptedPlanner::new([
        plan(json!({
            "schema_version": 1,
            "intent": "continue",
            "searches": [{"query": "crashed", "top_k": 50}]
        })),
        plan(json!({"schema_version": 1, "intent": "final", "final_answer": "disk"})),
    ]);
    let subcaller = ScriptedSubcaller::default();

    let outcome = run(
        temp.path(),
        "disk filled and the service crashed",
        &planner,
        &subcaller,
        &config(5),
    );

    let search = &outcome.state.iterations[0].searches[0];
    assert_eq!(search.request.top_k, SymbolicBudgets::default().search_top_k);
    assert!(search.request.clamped_top_k);
    assert_eq!(search.hits.len(), 1);
    assert!(planner.calls()[1].0.contains("Prior search results (JSONL):"));
}

#[test]
fn iteration_ceiling_exhausts_budget() {
    let temp = tempfile::tempdir().expect("tempdir");
    let search = plan(json!({
        "schema_version": 1,
        "intent": "continue",
        "searches": [{"query": "disk"}]
    }));
    let planner = ScriptedPlanner::new([search.clone(), search.clone(), search]);
    let subcaller = ScriptedSubcaller::default();

    let outcome = run(temp.path(), "disk", &planner, &subcaller, &config(2));

    assert_eq!(outcome.exit_code, exit_codes::BUDGET_EXHAUSTED);
    assert_eq!(outcome.status(), Some(FinalStatus::MaxIterations));
    assert_eq!(outcome.state.iterations.len(), 2);
    assert_eq!(planner.calls().len(), 2);
}

#[test]
fn unbounded_limits_are_rejected_before_planning() {
    let temp = tempfile::tempdir().expect("tempdir");
    let planner = ScriptedPlanner::default();
    let subcaller = ScriptedSubcaller::default();

    let outcome = run(temp.path(), "disk", &planner, &subcaller, &config(0));

    assert_eq!(outcome.exit_code, exit_codes::INVALID_CONFIG);
    assert!(planner.calls().is_empty());
    assert!(temp.path().join(STATE_FILE).exists());
}

#[test]
fn pause_and_fail_map_to_invalid_config() {
    for intent in ["pause", "fail"] {
        let temp = tempfile::tempdir().expect("tempdir");
        let planner = ScriptedPlanner::new([plan(json!({
            "schema_version": 1,
            "intent": intent,
            "searches": [{"query": "disk"}]
        }))]);
        let subcaller = ScriptedSubcaller::default();

        let outcome = run(temp.path(), "disk", &planner, &subcaller, &config(5));

        assert_eq!(outcome.exit_code, exit_codes::INVALID_CONFIG, "{intent}");
        assert_eq!(outcome.state.iterations.len(), 1);
        assert!(outcome.state.iterations[0].searches.is_empty());
    }
}

#[test]
fn oracle_failure_ends_run_as_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let planner = ScriptedPlanner::default();
    let subcaller = ScriptedSubcaller::default();

    let outcome = run(temp.path(), "disk", &planner, &subcaller, &config(5));

    assert_eq!(outcome.exit_code, exit_codes::ERROR);
    assert_eq!(outcome.status(), Some(FinalStatus::Error));
    assert!(
        outcome
            .error
            .as_deref()
            .is_some_and(|message| message.contains("scripted planner exhausted"))
    );
}

fn governor(run_dir: &Path, alignment: &AlignmentConfig) -> AlignmentGovernor {
    AlignmentGovernor::new(
        GovernorConfig::from_alignment(alignment, ledger_identity("run-1"), GOAL, run_dir),
        Arc::new(FixedClock::default()),
    )
}

#[test]
fn governed_run_records_decisions_and_summary() {
    let temp = tempfile::tempdir().expect("tempdir");
    let alignment = AlignmentConfig {
        enabled: true,
        ..AlignmentConfig::default()
    };
    let mut governor = governor(temp.path(), &alignment);
    let store = text_store(temp.path(), "disk filled and the service crashed", 4096, 128);
    let planner = ScriptedPlanner::new([
        plan(json!({
            "schema_version": 1,
            "intent": "continue",
            "searches": [{"query": "disk"}]
        })),
        plan(json!({"schema_version": 1, "intent": "final", "final_answer": "disk"})),
    ]);
    let subcaller = ScriptedSubcaller::default();

    let outcome = run_symbolic_loop(
        temp.path(),
        &store,
        &planner,
        &subcaller,
        &config(5),
        Some(&mut governor),
    )
    .expect("run loop");

    assert_eq!(outcome.exit_code, exit_codes::OK);
    for (index, iteration) in outcome.state.iterations.iter().enumerate() {
        let decision = iteration.alignment.as_ref().expect("decision");
        assert_eq!(decision.turn as usize, index + 1);
        assert!(!decision.enforcement_blocked);
    }

    let summary = outcome
        .state
        .outcome
        .as_ref()
        .and_then(|block| block.alignment.as_ref())
        .expect("alignment summary");
    assert_eq!(summary.turns_evaluated, 2);
    // Two events per turn plus the final summary.
    assert_eq!(summary.ledger.events, 5);
    assert_eq!(summary.ledger.ledger_path, "alignment/ledger.jsonl");

    let report = verify_chain(&temp.path().join("alignment/ledger.jsonl")).expect("verify");
    assert!(report.is_intact());
    assert_eq!(report.events, 5);
    assert_eq!(report.last_hash, summary.ledger.last_hash);

    let marker: Value = serde_json::from_str(
        &fs::read_to_string(session_path(temp.path())).expect("read session"),
    )
    .expect("parse session");
    assert_eq!(marker["completed"], true);
}

/// Verifies an enforced block stops the run after persisting the blocked turn.
///
/// Bands at 100 put every achievable score in `block_escalate`, so the first
/// turn is blocked before its search runs.
#[test]
fn enforced_block_stops_before_execution() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut alignment = AlignmentConfig {
        enabled: true,
        enforce: true,
        ..AlignmentConfig::default()
    };
    alignment.policy.bands.pass = 100;
    alignment.policy.bands.nudge = 100;
    alignment.policy.bands.replan = 100;
    let mut governor = governor(temp.path(), &alignment);
    let store = text_store(temp.path(), "disk filled", 4096, 128);
    let planner = ScriptedPlanner::new([plan(json!({
        "schema_version": 1,
        "intent": "continue",
        "searches": [{"query": "disk"}]
    }))]);
    let subcaller = ScriptedSubcaller::default();

    let outcome = run_symbolic_loop(
        temp.path(),
        &store,
        &planner,
        &subcaller,
        &config(5),
        Some(&mut governor),
    )
    .expect("run loop");

    assert_eq!(outcome.exit_code, exit_codes::INVALID_CONFIG);
    assert_eq!(outcome.state.iterations.len(), 1);
    let iteration = &outcome.state.iterations[0];
    assert!(iteration.searches.is_empty());
    let decision = iteration.alignment.as_ref().expect("decision");
    assert_eq!(decision.action, Action::BlockEscalate);
    assert!(decision.enforcement_blocked);

    let summary = outcome
        .state
        .outcome
        .as_ref()
        .and_then(|block| block.alignment.as_ref())
        .expect("alignment summary");
    assert!(summary.rollback_recommended);
}
