//! Symbolic loop state (`state.json`), rewritten after every iteration.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::decision::{AlignmentDecision, AlignmentSummary};
use crate::core::plan::{PlanClamped, ReadRequest, SearchRequest, Snippet, Span, SubcallPurpose};
use crate::core::types::FinalStatus;
use crate::io::artifacts::SubcallArtifactPaths;
use crate::io::atomic::write_json_atomic;
use crate::io::context_store::SearchHit;

pub const STATE_FILE: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolicState {
    pub goal: String,
    pub max_iterations: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_minutes: Option<u64>,
    pub iterations: Vec<Iteration>,
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<FinalBlock>,
}

impl SymbolicState {
    pub fn new(goal: impl Into<String>, max_iterations: u32, max_minutes: Option<u64>) -> Self {
        Self {
            goal: goal.into(),
            max_iterations,
            max_minutes,
            iterations: Vec::new(),
            outcome: None,
        }
    }
}

/// One planner turn and everything it executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub iteration: u32,
    pub planner_prompt_bytes: usize,
    pub reads: Vec<ReadRequest>,
    pub searches: Vec<SearchRecord>,
    pub subcalls: Vec<SubcallRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variable_bindings: Vec<VariableBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentDecision>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub planner_errors: Vec<String>,
    pub clamped: PlanClamped,
    #[serde(default, skip_serializing_if = "PromptTruncation::is_empty")]
    pub truncation: PromptTruncation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRecord {
    #[serde(flatten)]
    pub request: SearchRequest,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubcallStatus {
    Succeeded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcallClamped {
    /// Snippets or spans beyond `max_snippets_per_subcall` were dropped.
    pub snippets: bool,
    /// Input was clipped, `max_input_bytes` was lowered, or a span was shortened.
    pub bytes: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcallRecord {
    pub id: String,
    pub purpose: SubcallPurpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_pointer: Option<String>,
    pub output_pointer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_var: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippets: Vec<Snippet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Span>,
    /// As requested by the planner, before the budget clamp.
    pub max_input_bytes: u64,
    pub artifact_paths: SubcallArtifactPaths,
    pub clamped: SubcallClamped,
    pub status: SubcallStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableBinding {
    pub name: String,
    pub pointer: String,
    pub iteration: u32,
    pub subcall_id: String,
    pub output_bytes: usize,
    pub output_path: String,
}

/// Prompt sections dropped (or the whole prompt cut) to fit the planner budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTruncation {
    #[serde(skip_serializing_if = "is_false")]
    pub searches_dropped: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub reads_dropped: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub subcalls_dropped: bool,
    #[serde(skip_serializing_if = "is_false")]
    pub prompt_truncated: bool,
}

impl PromptTruncation {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalBlock {
    pub status: FinalStatus,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<AlignmentSummary>,
}

impl FinalBlock {
    pub fn new(status: FinalStatus) -> Self {
        Self {
            status,
            exit_code: status.exit_code(),
            final_answer: None,
            alignment: None,
        }
    }
}

/// Load state if the file exists.
pub fn load_state(path: &Path) -> Result<Option<SymbolicState>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read state {}", path.display()))?;
    let state = serde_json::from_str(&contents)
        .with_context(|| format!("parse state {}", path.display()))?;
    Ok(Some(state))
}

/// Atomically rewrite the full state file.
pub fn write_state(path: &Path, state: &SymbolicState) -> Result<()> {
    debug!(
        path = %path.display(),
        iterations = state.iterations.len(),
        finished = state.outcome.is_some(),
        "writing symbolic state"
    );
    write_json_atomic(path, state)
}
