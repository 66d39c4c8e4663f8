//! Planner output parsing and plan validation.
//!
//! Planner output is free text that should contain a JSON plan. Parsing scans
//! for balanced JSON objects, unwraps common wrappers (`[..]`, `{"plan": ..}`,
//! `{"plans": [..]}`), then validates the plan against the v1 schema and the
//! per-turn budgets. Validated plans are a sum type: each intent carries only
//! the fields that are legal for it.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::budget::SymbolicBudgets;
use crate::core::types::Intent;

pub const PLAN_SCHEMA_VERSION: u64 = 1;

const PLAN_SCHEMA: &str = include_str!("../../schemas/planner_plan.v1.schema.json");

static PLAN_VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(PLAN_SCHEMA).expect("planner plan schema is valid JSON");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("planner plan schema compiles")
});

/// Why a planner turn was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("planner output did not contain a usable JSON plan")]
    Parse,
    #[error("plan validation failed: {0}")]
    Validation(String),
    #[error("final_var references unknown variable {0:?}")]
    UnboundVariable(String),
}

impl PlanError {
    /// Stable error code recorded in `planner_errors`.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::Parse => "plan_parse_error",
            PlanError::Validation(_) => "plan_validation_error",
            PlanError::UnboundVariable(_) => "final_var_unbound",
        }
    }
}

fn invalid(reason: impl Into<String>) -> PlanError {
    PlanError::Validation(reason.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubcallPurpose {
    Summarize,
    Extract,
    Classify,
    Verify,
}

impl SubcallPurpose {
    /// Unknown or missing purposes fall back to `summarize`.
    pub fn from_raw(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("extract") => SubcallPurpose::Extract,
            Some("classify") => SubcallPurpose::Classify,
            Some("verify") => SubcallPurpose::Verify,
            _ => SubcallPurpose::Summarize,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SubcallPurpose::Summarize => "summarize",
            SubcallPurpose::Extract => "extract",
            SubcallPurpose::Classify => "classify",
            SubcallPurpose::Verify => "verify",
        }
    }
}

/// Where a read or snippet starts: a pointer plus offset, or an absolute byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteLocator {
    Pointer { pointer: String, offset: u64 },
    Absolute { start_byte: u64 },
}

impl ByteLocator {
    pub fn pointer(&self) -> Option<&str> {
        match self {
            ByteLocator::Pointer { pointer, .. } => Some(pointer),
            ByteLocator::Absolute { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRequest {
    #[serde(flatten)]
    pub locator: ByteLocator,
    pub bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub clamped_top_k: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snippet {
    #[serde(flatten)]
    pub locator: ByteLocator,
    pub bytes: u64,
}

/// Absolute `[start_byte, end_byte)` range of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start_byte: u64,
    pub end_byte: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcallRequest {
    pub purpose: SubcallPurpose,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_pointer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_var: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub snippets: Vec<Snippet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<Span>,
    pub max_input_bytes: u64,
}

/// Requests of a `continue` turn, already clamped to budgets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnRequests {
    pub reads: Vec<ReadRequest>,
    pub searches: Vec<SearchRequest>,
    pub subcalls: Vec<SubcallRequest>,
}

impl TurnRequests {
    /// Pointers that must resolve before any side effect runs.
    pub fn referenced_pointers(&self) -> Vec<&str> {
        let mut pointers: Vec<&str> = self
            .reads
            .iter()
            .filter_map(|read| read.locator.pointer())
            .collect();
        for subcall in &self.subcalls {
            pointers.extend(subcall.parent_pointer.as_deref());
            pointers.extend(
                subcall
                    .snippets
                    .iter()
                    .filter_map(|snippet| snippet.locator.pointer()),
            );
        }
        pointers
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalAnswer {
    Text(String),
    /// Name of a subcall `output_var` whose output is the answer.
    Variable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanIntent {
    Continue(TurnRequests),
    Final(FinalAnswer),
    Pause,
    Fail,
}

/// Which request lists were cut down to their per-iteration ceilings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanClamped {
    pub reads: bool,
    pub searches: bool,
    pub subcalls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedPlan {
    pub intent: PlanIntent,
    pub clamped: PlanClamped,
}

impl ValidatedPlan {
    pub fn intent_kind(&self) -> Intent {
        match self.intent {
            PlanIntent::Continue(_) => Intent::Continue,
            PlanIntent::Final(_) => Intent::Final,
            PlanIntent::Pause => Intent::Pause,
            PlanIntent::Fail => Intent::Fail,
        }
    }

    pub fn requests(&self) -> Option<&TurnRequests> {
        match &self.intent {
            PlanIntent::Continue(requests) => Some(requests),
            _ => None,
        }
    }
}

/// Extract balanced top-level `{...}` substrings, skipping braces inside strings.
pub fn extract_json_candidates(raw: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in raw.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(begin) = start.take() {
                        candidates.push(&raw[begin..=idx]);
                    }
                }
            }
            _ => {}
        }
    }
    candidates
}

/// Accept `schema_version` 1 (number or numeric string) and a string `intent`.
fn normalize_plan(value: &Value) -> Option<Value> {
    let map = value.as_object()?;
    let version = match map.get("schema_version")? {
        Value::Number(number) => number.as_f64()?,
        Value::String(raw) => raw.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if version != PLAN_SCHEMA_VERSION as f64 {
        return None;
    }
    map.get("intent")?.as_str()?;
    let mut normalized = map.clone();
    normalized.insert("schema_version".into(), Value::from(PLAN_SCHEMA_VERSION));
    Some(Value::Object(normalized))
}

/// Find a plan in `value` itself, then arrays (last first), then `plan`/`plans`.
fn unwrap_plan(value: &Value) -> Option<Value> {
    if let Some(plan) = normalize_plan(value) {
        return Some(plan);
    }
    match value {
        Value::Array(items) => items.iter().rev().find_map(unwrap_plan),
        Value::Object(map) => map
            .get("plan")
            .and_then(unwrap_plan)
            .or_else(|| map.get("plans").and_then(unwrap_plan)),
        _ => None,
    }
}

/// Locate the last usable JSON plan in raw planner text.
pub fn parse_planner_output(raw: &str) -> Result<Value, PlanError> {
    let candidates = extract_json_candidates(raw);
    if candidates.is_empty() {
        return serde_json::from_str::<Value>(raw.trim())
            .ok()
            .as_ref()
            .and_then(unwrap_plan)
            .ok_or(PlanError::Parse);
    }
    candidates
        .iter()
        .rev()
        .filter_map(|candidate| serde_json::from_str::<Value>(candidate).ok())
        .find_map(|value| unwrap_plan(&value))
        .ok_or(PlanError::Parse)
}

/// Validate a normalized plan against the schema and clamp it to `budgets`.
pub fn validate_plan(plan: &Value, budgets: &SymbolicBudgets) -> Result<ValidatedPlan, PlanError> {
    if !PLAN_VALIDATOR.is_valid(plan) {
        let messages = PLAN_VALIDATOR
            .iter_errors(plan)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(invalid(format!("schema: {}", messages.join("; "))));
    }
    let map = plan
        .as_object()
        .ok_or_else(|| invalid("plan must be an object"))?;
    let intent: Intent = map
        .get("intent")
        .cloned()
        .and_then(|raw| serde_json::from_value(raw).ok())
        .ok_or_else(|| invalid("unknown intent"))?;

    let final_var = match map.get("final_var") {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) if !name.trim().is_empty() => Some(name.trim().to_string()),
        Some(_) => return Err(invalid("final_var must be a non-empty string")),
    };
    let final_answer = map
        .get("final_answer")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|answer| !answer.is_empty())
        .map(str::to_string);

    let raw_reads = list_field(map, "reads");
    let raw_searches = list_field(map, "searches");
    let raw_subcalls = list_field(map, "subcalls");

    let reads = raw_reads
        .iter()
        .map(|entry| parse_read(entry, budgets))
        .collect::<Result<Vec<_>, _>>()?;
    let searches = raw_searches
        .iter()
        .map(|entry| parse_search(entry, budgets))
        .collect::<Result<Vec<_>, _>>()?;
    let subcalls = raw_subcalls
        .iter()
        .map(|entry| parse_subcall(entry, budgets))
        .collect::<Result<Vec<_>, _>>()?;

    let clamped = PlanClamped {
        reads: reads.len() > budgets.max_chunk_reads_per_iteration,
        searches: searches.len() > budgets.max_searches_per_iteration,
        subcalls: subcalls.len() > budgets.max_subcalls_per_iteration,
    };

    let intent = match intent {
        Intent::Continue => PlanIntent::Continue(TurnRequests {
            reads: truncate_list(reads, budgets.max_chunk_reads_per_iteration),
            searches: truncate_list(searches, budgets.max_searches_per_iteration),
            subcalls: truncate_list(subcalls, budgets.max_subcalls_per_iteration),
        }),
        Intent::Final => match (final_var, final_answer) {
            (Some(name), _) => PlanIntent::Final(FinalAnswer::Variable(name)),
            (None, Some(answer)) => PlanIntent::Final(FinalAnswer::Text(answer)),
            (None, None) => {
                return Err(invalid("final intent requires final_answer or final_var"));
            }
        },
        Intent::Pause => PlanIntent::Pause,
        Intent::Fail => PlanIntent::Fail,
    };
    Ok(ValidatedPlan { intent, clamped })
}

fn list_field<'a>(map: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    map.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn truncate_list<T>(mut items: Vec<T>, max: usize) -> Vec<T> {
    items.truncate(max);
    items
}

/// Numbers may arrive as JSON numbers or numeric strings.
fn number_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    let value = match map.get(key)? {
        Value::Number(number) => number.as_f64()?,
        Value::String(raw) => raw.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

fn to_byte(value: f64) -> u64 {
    value.max(0.0).floor() as u64
}

fn positive_bytes(map: &Map<String, Value>, key: &str) -> Option<u64> {
    number_field(map, key)
        .filter(|value| *value > 0.0)
        .map(|value| to_byte(value).max(1))
}

fn optional_string(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Like `optional_string`, but a present non-string value is an error.
fn strict_optional_string(
    map: &Map<String, Value>,
    key: &str,
    context: &str,
) -> Result<Option<String>, PlanError> {
    match map.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) if !value.trim().is_empty() => {
            Ok(Some(value.trim().to_string()))
        }
        Some(_) => Err(invalid(format!("{context}.{key} must be a non-empty string"))),
    }
}

fn parse_locator(map: &Map<String, Value>) -> Option<ByteLocator> {
    if let Some(pointer) = optional_string(map, "pointer") {
        let offset = number_field(map, "offset").map_or(0, to_byte);
        return Some(ByteLocator::Pointer { pointer, offset });
    }
    number_field(map, "start_byte").map(|start| ByteLocator::Absolute {
        start_byte: to_byte(start),
    })
}

fn parse_read(entry: &Value, budgets: &SymbolicBudgets) -> Result<ReadRequest, PlanError> {
    let map = entry
        .as_object()
        .ok_or_else(|| invalid("read entry must be an object"))?;
    let bytes = positive_bytes(map, "bytes").ok_or_else(|| invalid("read.bytes must be > 0"))?;
    let locator =
        parse_locator(map).ok_or_else(|| invalid("read requires pointer or start_byte"))?;
    Ok(ReadRequest {
        locator,
        bytes: bytes.min(budgets.max_bytes_per_chunk_read),
        reason: optional_string(map, "reason"),
    })
}

fn parse_search(entry: &Value, budgets: &SymbolicBudgets) -> Result<SearchRequest, PlanError> {
    let map = entry
        .as_object()
        .ok_or_else(|| invalid("search entry must be an object"))?;
    let query =
        optional_string(map, "query").ok_or_else(|| invalid("search.query must be non-empty"))?;
    let requested = number_field(map, "top_k")
        .filter(|k| *k >= 1.0)
        .map_or(budgets.search_top_k, |k| to_byte(k) as usize);
    Ok(SearchRequest {
        query,
        top_k: requested.min(budgets.search_top_k),
        reason: optional_string(map, "reason"),
        clamped_top_k: requested > budgets.search_top_k,
    })
}

fn parse_subcall(entry: &Value, budgets: &SymbolicBudgets) -> Result<SubcallRequest, PlanError> {
    let map = entry
        .as_object()
        .ok_or_else(|| invalid("subcall entry must be an object"))?;
    let purpose = SubcallPurpose::from_raw(map.get("purpose").and_then(Value::as_str));
    let parent_pointer = strict_optional_string(map, "parent_pointer", "subcall")?;
    let output_var = strict_optional_string(map, "output_var", "subcall")?;
    let max_input_bytes = positive_bytes(map, "max_input_bytes")
        .ok_or_else(|| invalid("subcall.max_input_bytes must be > 0"))?;

    let snippets = list_field(map, "snippets")
        .iter()
        .map(|raw| {
            let snippet = raw
                .as_object()
                .ok_or_else(|| invalid("snippet entry must be an object"))?;
            let bytes = positive_bytes(snippet, "bytes")
                .ok_or_else(|| invalid("snippet.bytes must be > 0"))?;
            let locator = parse_locator(snippet)
                .ok_or_else(|| invalid("snippet requires pointer or start_byte"))?;
            Ok(Snippet {
                locator,
                bytes: bytes.min(budgets.max_bytes_per_snippet),
            })
        })
        .collect::<Result<Vec<_>, PlanError>>()?;

    let spans = list_field(map, "spans")
        .iter()
        .map(|raw| {
            let span = raw
                .as_object()
                .ok_or_else(|| invalid("span entry must be an object"))?;
            let (Some(start), Some(end)) =
                (number_field(span, "start_byte"), number_field(span, "end_byte"))
            else {
                return Err(invalid("span requires start_byte and end_byte"));
            };
            let (start_byte, end_byte) = (to_byte(start), to_byte(end));
            if end_byte <= start_byte {
                return Err(invalid("span.end_byte must be greater than start_byte"));
            }
            Ok(Span {
                start_byte,
                end_byte,
            })
        })
        .collect::<Result<Vec<_>, PlanError>>()?;

    if snippets.is_empty() && spans.is_empty() {
        return Err(invalid("subcall requires at least one snippet or span"));
    }
    Ok(SubcallRequest {
        purpose,
        parent_pointer,
        output_var,
        snippets,
        spans,
        max_input_bytes,
    })
}

fn is_false(value: &bool) -> bool {
    !*value
}
