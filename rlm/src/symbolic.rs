//! The symbolic loop: prompt, plan, execute, persist, repeat.
//!
//! Each iteration renders a budgeted planner prompt, obtains a validated plan
//! (one retry on failure), optionally lets the alignment governor judge the
//! turn, then runs searches, reads, and subcalls against the context store.
//! `state.json` is rewritten after every iteration and once more with the
//! terminal `final` block.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::budget::{Deadline, SymbolicBudgets};
use crate::core::plan::{
    ByteLocator, FinalAnswer, PlanError, PlanIntent, ReadRequest, Snippet, Span, SubcallRequest,
    TurnRequests, ValidatedPlan, parse_planner_output, validate_plan,
};
use crate::core::pointer::{Pointer, SubcallPointer, subcall_id};
use crate::core::text::truncate_utf8;
use crate::core::types::{FinalStatus, Intent, RiskLevel};
use crate::governor::{AlignmentGovernor, TurnEvaluation, TurnTelemetry};
use crate::io::artifacts::{
    SubcallInput, SubcallMeta, SubcallPaths, SubcallWriteRequest, read_output_window,
    record_planner_failure, relative_display, write_subcall,
};
use crate::io::config::{LoopLimits, RlmConfig};
use crate::io::context_store::{ContextError, ContextStore};
use crate::io::oracle::{Planner, SubcallInvocation, Subcaller};
use crate::io::prompt::{
    PlannerPromptInputs, PriorResults, PriorSearch, PromptBuilder, ReadExcerpt, SubcallSummary,
    build_retry_prompt, build_subcall_prompt,
};
use crate::io::state::{
    FinalBlock, Iteration, STATE_FILE, SearchRecord, SubcallClamped, SubcallRecord,
    SubcallStatus, SymbolicState, VariableBinding, write_state,
};

const PLANNER_ATTEMPTS: u32 = 2;
const EVIDENCE_REFS_PER_KIND: usize = 2;

/// Inputs of one loop run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicLoopConfig {
    pub goal: String,
    pub limits: LoopLimits,
    pub budgets: SymbolicBudgets,
}

impl SymbolicLoopConfig {
    pub fn from_config(goal: impl Into<String>, config: &RlmConfig) -> Self {
        Self {
            goal: goal.into(),
            limits: config.limits.clone(),
            budgets: config.budgets.clone(),
        }
    }
}

/// Result of a loop run; `state` is what was last written to `state.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub state: SymbolicState,
    pub exit_code: i32,
    /// Message of the failure behind `error`/unbounded outcomes.
    pub error: Option<String>,
}

impl LoopOutcome {
    pub fn status(&self) -> Option<FinalStatus> {
        self.state.outcome.as_ref().map(|block| block.status)
    }
}

/// Risk of a turn as seen by the governor.
pub fn derive_risk_level(
    intent: Intent,
    planner_errors: usize,
    read_count: usize,
    search_count: usize,
    subcall_count: usize,
) -> RiskLevel {
    match intent {
        Intent::Final | Intent::Fail => RiskLevel::High,
        Intent::Pause => RiskLevel::Medium,
        Intent::Continue if planner_errors > 0 => RiskLevel::Medium,
        Intent::Continue if read_count + search_count + subcall_count == 0 => RiskLevel::Medium,
        Intent::Continue => RiskLevel::Low,
    }
}

/// Concatenate texts up to `max_bytes`, cutting the first piece that overflows.
///
/// Returns the kept pieces and whether anything was clipped.
pub fn clip_to_budget(texts: &[String], max_bytes: usize) -> (Vec<String>, bool) {
    let mut total = 0usize;
    let mut blocks = Vec::with_capacity(texts.len());
    for text in texts {
        let next = total + text.len();
        if next > max_bytes {
            let remaining = max_bytes.saturating_sub(total);
            if remaining > 0 {
                blocks.push(truncate_utf8(text, remaining).to_string());
            }
            return (blocks, true);
        }
        blocks.push(text.clone());
        total = next;
    }
    (blocks, false)
}

fn evidence_refs(requests: Option<&TurnRequests>, prior: &PriorResults) -> Vec<String> {
    let reads = requests
        .map(|requests| requests.reads.as_slice())
        .unwrap_or_default()
        .iter()
        .take(EVIDENCE_REFS_PER_KIND)
        .map(|read| match &read.locator {
            ByteLocator::Pointer { pointer, .. } => pointer.clone(),
            ByteLocator::Absolute { start_byte } => format!("start_byte:{start_byte}"),
        });
    let subcalls = prior
        .subcalls
        .iter()
        .take(EVIDENCE_REFS_PER_KIND)
        .map(|summary| summary.pointer.clone());
    reads.chain(subcalls).collect()
}

fn to_usize(value: u64) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

struct Terminal {
    status: FinalStatus,
    final_answer: Option<String>,
}

impl Terminal {
    fn new(status: FinalStatus) -> Self {
        Self {
            status,
            final_answer: None,
        }
    }
}

struct PlanAttempts {
    plan: Option<ValidatedPlan>,
    errors: Vec<String>,
}

struct ExecutedSubcall {
    record: SubcallRecord,
    summary: SubcallSummary,
    binding: Option<VariableBinding>,
    output_path: PathBuf,
}

struct LoopRun<'a, P: ?Sized, S: ?Sized> {
    run_dir: &'a Path,
    state_path: PathBuf,
    store: &'a ContextStore,
    planner: &'a P,
    subcaller: &'a S,
    config: &'a SymbolicLoopConfig,
    governor: Option<&'a mut AlignmentGovernor>,
    state: SymbolicState,
    prior: PriorResults,
    /// Subcall pointer -> absolute `output.txt` path.
    subcall_outputs: HashMap<String, PathBuf>,
    /// `output_var` name -> absolute `output.txt` path.
    bindings: HashMap<String, PathBuf>,
}

/// Run the loop until a terminal status.
///
/// Failures inside an iteration end the run as `error` rather than
/// propagating; only failures to persist the terminal state are returned as
/// `Err`.
#[instrument(skip_all, fields(run_dir = %run_dir.display()))]
pub fn run_symbolic_loop<P, S>(
    run_dir: &Path,
    store: &ContextStore,
    planner: &P,
    subcaller: &S,
    config: &SymbolicLoopConfig,
    governor: Option<&mut AlignmentGovernor>,
) -> Result<LoopOutcome>
where
    P: Planner + ?Sized,
    S: Subcaller + ?Sized,
{
    fs::create_dir_all(run_dir)
        .with_context(|| format!("create directory {}", run_dir.display()))?;
    let limits = &config.limits;
    let mut run = LoopRun {
        run_dir,
        state_path: run_dir.join(STATE_FILE),
        store,
        planner,
        subcaller,
        config,
        governor,
        state: SymbolicState::new(
            config.goal.clone(),
            limits.max_iterations,
            limits.max_minutes.filter(|minutes| *minutes > 0),
        ),
        prior: PriorResults::default(),
        subcall_outputs: HashMap::new(),
        bindings: HashMap::new(),
    };

    let deadline = Deadline::after(limits.time_budget());
    if limits.max_iterations == 0 && !deadline.is_bounded() {
        warn!("max_iterations is 0 and no time budget is set");
        run.state.outcome = Some(FinalBlock::new(FinalStatus::InvalidConfig));
        write_state(&run.state_path, &run.state)?;
        return Ok(LoopOutcome {
            exit_code: FinalStatus::InvalidConfig.exit_code(),
            state: run.state,
            error: Some("unbounded symbolic run".to_string()),
        });
    }

    match run.iterate(&deadline) {
        Ok(terminal) => run.finish(terminal, None),
        Err(err) => {
            if let Some(context_err) = err.downcast_ref::<ContextError>() {
                warn!(error = %context_err, "context store contract violated");
            } else {
                warn!(error = %format!("{err:#}"), "symbolic loop failed");
            }
            run.finish(Terminal::new(FinalStatus::Error), Some(format!("{err:#}")))
        }
    }
}

impl<P, S> LoopRun<'_, P, S>
where
    P: Planner + ?Sized,
    S: Subcaller + ?Sized,
{
    fn iterate(&mut self, deadline: &Deadline) -> Result<Terminal> {
        let max_iterations = self.config.limits.max_iterations;
        let mut iteration = 1u32;
        loop {
            if deadline.expired() {
                return Ok(Terminal::new(FinalStatus::MaxMinutes));
            }
            if let Some(terminal) = self.run_iteration(iteration)? {
                return Ok(terminal);
            }
            if max_iterations > 0 && iteration >= max_iterations {
                return Ok(Terminal::new(FinalStatus::MaxIterations));
            }
            if deadline.expired() {
                return Ok(Terminal::new(FinalStatus::MaxMinutes));
            }
            info!(iteration, "symbolic iteration complete");
            iteration += 1;
        }
    }

    /// One full turn; `Some` when the run must stop.
    fn run_iteration(&mut self, iteration: u32) -> Result<Option<Terminal>> {
        let budgets = &self.config.budgets;
        let prompt = PromptBuilder::new(budgets).build(&PlannerPromptInputs {
            goal: &self.config.goal,
            object_id: self.store.object_id(),
            chunk_count: self.store.chunk_count(),
            prior: &self.prior,
        })?;

        let attempts = self.acquire_plan(iteration, &prompt.text)?;
        let Some(plan) = attempts.plan else {
            warn!(iteration, errors = ?attempts.errors, "planner failed twice");
            return Ok(Some(Terminal::new(FinalStatus::InvalidConfig)));
        };
        let planner_errors = attempts.errors;

        let intent = plan.intent_kind();
        let requests = plan.requests();
        let (read_count, search_count, subcall_count) = requests.map_or((0, 0, 0), |requests| {
            (
                requests.reads.len(),
                requests.searches.len(),
                requests.subcalls.len(),
            )
        });
        let telemetry = TurnTelemetry {
            turn: iteration,
            intent,
            planner_prompt_bytes: prompt.bytes(),
            planner_errors: planner_errors.clone(),
            read_count,
            search_count,
            subcall_count,
            risk_level: derive_risk_level(
                intent,
                planner_errors.len(),
                read_count,
                search_count,
                subcall_count,
            ),
            evidence_refs: evidence_refs(requests, &self.prior),
        };
        let evaluation: Option<TurnEvaluation> = match self.governor.as_deref_mut() {
            Some(governor) => governor.evaluate_turn(&telemetry)?,
            None => None,
        };

        let mut record = Iteration {
            iteration,
            planner_prompt_bytes: prompt.bytes(),
            reads: Vec::new(),
            searches: Vec::new(),
            subcalls: Vec::new(),
            variable_bindings: Vec::new(),
            alignment: evaluation.as_ref().map(|evaluation| evaluation.decision.clone()),
            planner_errors,
            clamped: plan.clamped,
            truncation: prompt.truncation,
        };

        if let Some(evaluation) = evaluation.as_ref().filter(|evaluation| evaluation.enforce_block)
        {
            warn!(
                iteration,
                reason = ?evaluation.enforce_reason,
                "alignment gate blocked iteration"
            );
            self.push_iteration(record)?;
            return Ok(Some(Terminal::new(FinalStatus::InvalidConfig)));
        }

        match plan.intent {
            PlanIntent::Final(answer) => {
                let resolved = self.resolve_final_answer(&answer);
                self.push_iteration(record)?;
                Ok(Some(match resolved {
                    Some(final_answer) => Terminal {
                        status: FinalStatus::Passed,
                        final_answer: Some(final_answer),
                    },
                    None => Terminal::new(FinalStatus::InvalidConfig),
                }))
            }
            PlanIntent::Pause | PlanIntent::Fail => {
                debug!(iteration, intent = intent.as_str(), "planner halted the run");
                self.push_iteration(record)?;
                Ok(Some(Terminal::new(FinalStatus::InvalidConfig)))
            }
            PlanIntent::Continue(requests) => {
                self.execute(iteration, &requests, &mut record)?;
                self.push_iteration(record)?;
                Ok(None)
            }
        }
    }

    fn push_iteration(&mut self, record: Iteration) -> Result<()> {
        self.state.iterations.push(record);
        write_state(&self.state_path, &self.state)
    }

    fn acquire_plan(&self, iteration: u32, prompt: &str) -> Result<PlanAttempts> {
        let mut errors: Vec<String> = Vec::new();
        for attempt in 0..PLANNER_ATTEMPTS {
            let text = if attempt == 0 {
                prompt.to_string()
            } else {
                build_retry_prompt(prompt, &errors)
            };
            let raw = self.planner.plan(&text, attempt)?;
            match self.check_plan(&raw) {
                Ok(plan) => {
                    return Ok(PlanAttempts {
                        plan: Some(plan),
                        errors,
                    });
                }
                Err(err) => {
                    errors.push(err.code().to_string());
                    let path =
                        record_planner_failure(self.run_dir, iteration, attempt, &errors, &raw)?;
                    debug!(
                        iteration,
                        attempt,
                        code = err.code(),
                        detail = %err,
                        path = %path.display(),
                        "planner output rejected"
                    );
                }
            }
        }
        Ok(PlanAttempts { plan: None, errors })
    }

    fn check_plan(&self, raw: &str) -> Result<ValidatedPlan, PlanError> {
        let value = parse_planner_output(raw)?;
        let plan = validate_plan(&value, &self.config.budgets)?;
        if let Some(requests) = plan.requests() {
            for pointer in requests.referenced_pointers() {
                if !self.pointer_known(pointer) {
                    return Err(PlanError::Validation(format!("unknown pointer {pointer}")));
                }
            }
        }
        if let PlanIntent::Final(FinalAnswer::Variable(name)) = &plan.intent {
            if !self.bindings.contains_key(name) {
                return Err(PlanError::UnboundVariable(name.clone()));
            }
        }
        Ok(plan)
    }

    fn pointer_known(&self, raw: &str) -> bool {
        match Pointer::parse(raw) {
            Some(Pointer::Context(_)) => self.store.validate_pointer(raw).is_some(),
            Some(Pointer::Subcall(_)) => self.subcall_outputs.contains_key(raw),
            None => false,
        }
    }

    fn resolve_final_answer(&self, answer: &FinalAnswer) -> Option<String> {
        match answer {
            FinalAnswer::Text(text) => Some(text.clone()),
            FinalAnswer::Variable(name) => {
                let path = self.bindings.get(name)?;
                match fs::read_to_string(path) {
                    Ok(text) => Some(text),
                    Err(err) => {
                        warn!(
                            variable = %name,
                            path = %path.display(),
                            error = %err,
                            "final_var output unreadable"
                        );
                        None
                    }
                }
            }
        }
    }

    /// Searches, then reads, then subcalls, in request order.
    fn execute(
        &mut self,
        iteration: u32,
        requests: &TurnRequests,
        record: &mut Iteration,
    ) -> Result<()> {
        let budgets = &self.config.budgets;

        let mut searches = Vec::with_capacity(requests.searches.len());
        for search in &requests.searches {
            let hits = self
                .store
                .search(&search.query, search.top_k, budgets.max_preview_bytes)?;
            searches.push(PriorSearch {
                query: search.query.clone(),
                hits: hits.clone(),
            });
            record.searches.push(SearchRecord {
                request: search.clone(),
                hits,
            });
        }
        self.prior.searches = searches;

        let mut excerpts = Vec::with_capacity(requests.reads.len());
        for read in &requests.reads {
            excerpts.push(self.resolve_read(read)?);
            record.reads.push(read.clone());
        }
        self.prior.reads = excerpts;

        let mut summaries = Vec::with_capacity(requests.subcalls.len());
        for (index, request) in requests.subcalls.iter().enumerate() {
            let executed = self.execute_subcall(iteration, index + 1, request)?;
            self.subcall_outputs
                .insert(executed.record.output_pointer.clone(), executed.output_path.clone());
            if let Some(binding) = executed.binding {
                self.bindings
                    .insert(binding.name.clone(), executed.output_path.clone());
                record.variable_bindings.push(binding);
            }
            summaries.push(executed.summary);
            record.subcalls.push(executed.record);
        }
        self.prior.subcalls = summaries;
        Ok(())
    }

    /// Text behind a pointer: a stored subcall output window or a chunk read.
    fn read_pointer(&self, pointer: &str, offset: u64, bytes: u64) -> Result<String> {
        match self.subcall_outputs.get(pointer) {
            Some(path) => read_output_window(path, offset, bytes),
            None => Ok(self.store.read(pointer, offset, bytes)?.text),
        }
    }

    fn resolve_read(&self, read: &ReadRequest) -> Result<ReadExcerpt> {
        let max_bytes = to_usize(self.config.budgets.max_bytes_per_chunk_read);
        let (pointer, text) = match &read.locator {
            ByteLocator::Pointer { pointer, offset } => {
                (pointer.clone(), self.read_pointer(pointer, *offset, read.bytes)?)
            }
            ByteLocator::Absolute { start_byte } => (
                format!("start_byte={start_byte} bytes={}", read.bytes),
                self.store.read_span(*start_byte, read.bytes)?.text,
            ),
        };
        Ok(ReadExcerpt {
            pointer,
            excerpt: truncate_utf8(&text, max_bytes).to_string(),
        })
    }

    fn resolve_snippet(&self, snippet: &Snippet) -> Result<String> {
        match &snippet.locator {
            ByteLocator::Pointer { pointer, offset } => {
                self.read_pointer(pointer, *offset, snippet.bytes)
            }
            ByteLocator::Absolute { start_byte } => {
                Ok(self.store.read_span(*start_byte, snippet.bytes)?.text)
            }
        }
    }

    #[instrument(skip_all, fields(iteration = iteration, ordinal = ordinal))]
    fn execute_subcall(
        &self,
        iteration: u32,
        ordinal: usize,
        request: &SubcallRequest,
    ) -> Result<ExecutedSubcall> {
        let budgets = &self.config.budgets;
        let id = subcall_id(ordinal);

        // Snippets first, then spans, share one cap.
        let cap = budgets.max_snippets_per_subcall;
        let snippets: Vec<Snippet> = request.snippets.iter().take(cap).cloned().collect();
        let span_slots = cap.saturating_sub(snippets.len());
        let kept_spans = &request.spans[..request.spans.len().min(span_slots)];
        let snippets_clamped =
            snippets.len() < request.snippets.len() || kept_spans.len() < request.spans.len();

        let mut span_bytes_clamped = false;
        let mut spans = Vec::with_capacity(kept_spans.len());
        for span in kept_spans {
            let length = span
                .end_byte
                .saturating_sub(span.start_byte)
                .min(budgets.max_bytes_per_snippet);
            let end_byte = span.start_byte + length;
            span_bytes_clamped |= end_byte < span.end_byte;
            spans.push(Span {
                start_byte: span.start_byte,
                end_byte,
            });
        }

        let mut texts = Vec::with_capacity(snippets.len() + spans.len());
        for snippet in &snippets {
            texts.push(self.resolve_snippet(snippet)?);
        }
        for span in &spans {
            texts.push(
                self.store
                    .read_span(span.start_byte, span.end_byte - span.start_byte)?
                    .text,
            );
        }

        let max_input = request.max_input_bytes.min(budgets.max_subcall_input_bytes);
        let max_input_clamped = request.max_input_bytes > max_input;
        let (blocks, clipped) = clip_to_budget(&texts, to_usize(max_input));
        let prompt = build_subcall_prompt(request.purpose, &blocks);

        let output = self.subcaller.run(
            &prompt,
            SubcallInvocation {
                id: &id,
                purpose: request.purpose,
            },
        )?;

        let paths = SubcallPaths::new(self.run_dir, iteration, &id);
        write_subcall(&SubcallWriteRequest {
            paths: &paths,
            input: &SubcallInput {
                id: &id,
                purpose: request.purpose,
                parent_pointer: request.parent_pointer.as_deref(),
                output_var: request.output_var.as_deref(),
                max_input_bytes: max_input,
                snippets: &snippets,
                spans: &spans,
            },
            prompt: &prompt,
            output: &output,
            meta: &SubcallMeta {
                id: &id,
                purpose: request.purpose,
                status: "succeeded",
                input_bytes: prompt.len(),
                clipped,
            },
        })?;

        let output_pointer = SubcallPointer::new(iteration, id.clone()).to_string();
        let output_bytes = output.len();
        debug!(
            id = %id,
            input_bytes = prompt.len(),
            output_bytes,
            clipped,
            "subcall finished"
        );

        let binding = request.output_var.as_ref().map(|name| VariableBinding {
            name: name.clone(),
            pointer: output_pointer.clone(),
            iteration,
            subcall_id: id.clone(),
            output_bytes,
            output_path: relative_display(self.run_dir, &paths.output_path),
        });
        let summary = SubcallSummary {
            id: id.clone(),
            pointer: output_pointer.clone(),
            preview: truncate_utf8(&output, budgets.max_preview_bytes).to_string(),
            output_bytes,
            output_var: request.output_var.clone(),
        };
        let record = SubcallRecord {
            id,
            purpose: request.purpose,
            parent_pointer: request.parent_pointer.clone(),
            output_pointer,
            output_var: request.output_var.clone(),
            snippets,
            spans,
            max_input_bytes: request.max_input_bytes,
            artifact_paths: paths.relative_to(self.run_dir),
            clamped: SubcallClamped {
                snippets: snippets_clamped,
                bytes: clipped || max_input_clamped || span_bytes_clamped,
            },
            status: SubcallStatus::Succeeded,
        };
        Ok(ExecutedSubcall {
            record,
            summary,
            binding,
            output_path: paths.output_path,
        })
    }

    /// Finalize the governor once, then write the terminal state.
    fn finish(mut self, terminal: Terminal, error: Option<String>) -> Result<LoopOutcome> {
        let alignment = match self.governor.as_deref_mut() {
            Some(governor) => governor.finalize()?,
            None => None,
        };
        let block = FinalBlock {
            final_answer: terminal.final_answer,
            alignment,
            ..FinalBlock::new(terminal.status)
        };
        let exit_code = block.exit_code;
        info!(status = ?block.status, exit_code, "symbolic loop finished");
        self.state.outcome = Some(block);
        write_state(&self.state_path, &self.state)?;
        Ok(LoopOutcome {
            state: self.state,
            exit_code,
            error,
        })
    }
}
