//! Deterministic fakes for the oracle ports, the clock, and context fixtures.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;

use anyhow::{Result, bail};

use crate::core::chunking::ChunkingConfig;
use crate::core::plan::SubcallPurpose;
use crate::io::clock::Clock;
use crate::io::context_store::{ContextSource, ContextStore, build_context};
use crate::io::ledger::LedgerIdentity;
use crate::io::oracle::{Planner, SubcallInvocation, Subcaller};

pub const FIXED_TIMESTAMP: &str = "2026-01-01T00:00:00.000Z";

/// Clock that always returns the same instant.
#[derive(Debug, Clone)]
pub struct FixedClock {
    pub stamp: String,
}

impl Default for FixedClock {
    fn default() -> Self {
        Self {
            stamp: FIXED_TIMESTAMP.to_string(),
        }
    }
}

impl Clock for FixedClock {
    fn now_rfc3339(&self) -> String {
        self.stamp.clone()
    }
}

/// Planner that replays canned responses in order and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedPlanner {
    responses: RefCell<VecDeque<String>>,
    calls: RefCell<Vec<(String, u32)>>,
}

impl ScriptedPlanner {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(Into::into).collect()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// `(prompt, attempt)` pairs seen so far.
    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.borrow().clone()
    }
}

impl Planner for ScriptedPlanner {
    fn plan(&self, prompt: &str, attempt: u32) -> Result<String> {
        self.calls.borrow_mut().push((prompt.to_string(), attempt));
        match self.responses.borrow_mut().pop_front() {
            Some(response) => Ok(response),
            None => bail!("scripted planner exhausted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSubcall {
    pub id: String,
    pub purpose: SubcallPurpose,
    pub prompt: String,
}

/// Subcaller that replays canned outputs, then falls back to a fixed reply.
#[derive(Debug)]
pub struct ScriptedSubcaller {
    responses: RefCell<VecDeque<String>>,
    fallback: String,
    calls: RefCell<Vec<RecordedSubcall>>,
}

impl Default for ScriptedSubcaller {
    fn default() -> Self {
        Self::new(Vec::<String>::new())
    }
}

impl ScriptedSubcaller {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: RefCell::new(responses.into_iter().map(Into::into).collect()),
            fallback: "ok".to_string(),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedSubcall> {
        self.calls.borrow().clone()
    }
}

impl Subcaller for ScriptedSubcaller {
    fn run(&self, prompt: &str, invocation: SubcallInvocation<'_>) -> Result<String> {
        self.calls.borrow_mut().push(RecordedSubcall {
            id: invocation.id.to_string(),
            purpose: invocation.purpose,
            prompt: prompt.to_string(),
        });
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

pub fn chunking(target_bytes: u64, overlap_bytes: u64) -> ChunkingConfig {
    ChunkingConfig {
        target_bytes,
        overlap_bytes,
        ..ChunkingConfig::default()
    }
}

/// Build a context object from `text` under `<run_dir>/context`.
pub fn text_store(
    run_dir: &Path,
    text: &str,
    target_bytes: u64,
    overlap_bytes: u64,
) -> ContextStore {
    let object = build_context(
        &ContextSource::Text(text.to_string()),
        &run_dir.join("context"),
        &chunking(target_bytes, overlap_bytes),
        &FixedClock::default(),
    )
    .expect("build context");
    ContextStore::new(object)
}

pub fn ledger_identity(run_id: &str) -> LedgerIdentity {
    LedgerIdentity {
        thread_id: "thread-test".to_string(),
        task_id: "task-test".to_string(),
        run_id: run_id.to_string(),
        agent_id: "agent-test".to_string(),
    }
}
