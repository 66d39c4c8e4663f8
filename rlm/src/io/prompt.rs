//! Planner and subcall prompt rendering under a byte budget.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::budget::SymbolicBudgets;
use crate::core::plan::SubcallPurpose;
use crate::core::pointer::{CONTEXT_POINTER_FORMAT, SUBCALL_POINTER_FORMAT};
use crate::core::text::{collapse_whitespace, truncate_utf8};
use crate::io::context_store::SearchHit;
use crate::io::state::PromptTruncation;

const PLANNER_TEMPLATE: &str = include_str!("prompts/planner.md");
const SUBCALL_PREVIEW_BYTES: usize = 160;

/// Results of the previous iteration fed back to the planner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriorResults {
    pub searches: Vec<PriorSearch>,
    pub reads: Vec<ReadExcerpt>,
    pub subcalls: Vec<SubcallSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriorSearch {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadExcerpt {
    pub pointer: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubcallSummary {
    pub id: String,
    pub pointer: String,
    pub preview: String,
    pub output_bytes: usize,
    pub output_var: Option<String>,
}

impl SubcallSummary {
    fn render(&self) -> String {
        let preview = collapse_whitespace(truncate_utf8(&self.preview, SUBCALL_PREVIEW_BYTES));
        let mut line = format!("{}: {} ({} bytes)", self.id, self.pointer, self.output_bytes);
        if let Some(var) = &self.output_var {
            line.push_str(&format!(" output_var={var}"));
        }
        if !preview.is_empty() {
            line.push_str(&format!(" preview=\"{preview}\""));
        }
        line
    }
}

/// What the planner needs to know about the open context object.
#[derive(Debug, Clone, Copy)]
pub struct PlannerPromptInputs<'a> {
    pub goal: &'a str,
    pub object_id: &'a str,
    pub chunk_count: usize,
    pub prior: &'a PriorResults,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerPrompt {
    pub text: String,
    pub truncation: PromptTruncation,
}

impl PlannerPrompt {
    pub fn bytes(&self) -> usize {
        self.text.len()
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Split rendered output on `<!-- section:KEY required|droppable -->` markers.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
            .expect("section marker regex compiles")
    });

    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn join_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|section| section.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Renders planner prompts that fit `max_planner_prompt_bytes`.
#[derive(Debug)]
pub struct PromptBuilder<'a> {
    budgets: &'a SymbolicBudgets,
    env: Environment<'static>,
}

impl<'a> PromptBuilder<'a> {
    pub fn new(budgets: &'a SymbolicBudgets) -> Self {
        let mut env = Environment::new();
        env.add_template("planner", PLANNER_TEMPLATE)
            .expect("planner template should be valid");
        Self { budgets, env }
    }

    fn render(&self, input: &PlannerPromptInputs<'_>) -> Result<String> {
        let search_lines = input
            .prior
            .searches
            .iter()
            .flat_map(|search| search.hits.iter())
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        let subcall_lines = input
            .prior
            .subcalls
            .iter()
            .map(SubcallSummary::render)
            .collect::<Vec<_>>();
        let template = self.env.get_template("planner")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            object_id => input.object_id,
            chunk_count => input.chunk_count,
            pointer_hint => format!("{CONTEXT_POINTER_FORMAT} | {SUBCALL_POINTER_FORMAT}"),
            budgets => self.budgets,
            searches => search_lines,
            reads => &input.prior.reads,
            subcalls => subcall_lines,
        })?;
        Ok(rendered)
    }

    /// Render, then drop prior-result sections (searches, reads, subcalls)
    /// until the prompt fits; cut the whole prompt as a last resort.
    pub fn build(&self, input: &PlannerPromptInputs<'_>) -> Result<PlannerPrompt> {
        let budget = self.budgets.max_planner_prompt_bytes;
        let mut sections = parse_sections(&self.render(input)?);
        let mut truncation = PromptTruncation::default();
        let mut text = join_sections(&sections);

        for key in ["searches", "reads", "subcalls"] {
            if text.len() <= budget {
                break;
            }
            let Some(idx) = sections
                .iter()
                .position(|section| section.key == key && !section.required)
            else {
                continue;
            };
            let dropped = sections.remove(idx);
            match key {
                "searches" => truncation.searches_dropped = true,
                "reads" => truncation.reads_dropped = true,
                _ => truncation.subcalls_dropped = true,
            }
            debug!(
                section = key,
                bytes_dropped = dropped.content.len(),
                "dropped section for budget"
            );
            text = join_sections(&sections);
        }

        if text.len() > budget {
            let before_len = text.len();
            text = truncate_utf8(&text, budget).to_string();
            truncation.prompt_truncated = true;
            debug!(before_len, after_len = text.len(), "truncated planner prompt");
        }
        Ok(PlannerPrompt { text, truncation })
    }
}

/// Prefix the first-attempt prompt with the errors of the rejected attempt.
pub fn build_retry_prompt(prompt: &str, errors: &[String]) -> String {
    let mut header = vec!["Return valid JSON only.".to_string()];
    if errors.iter().any(|code| code == "final_var_unbound") {
        header.push(
            "Use final_var only when it matches a previously declared subcalls[].output_var."
                .to_string(),
        );
    }
    if !errors.is_empty() {
        header.push(format!("Previous error: {}", errors.join("; ")));
    }
    format!("{}\n\n{prompt}", header.join(" "))
}

/// Subcall prompt: purpose, instruction, then numbered snippet blocks.
pub fn build_subcall_prompt(purpose: SubcallPurpose, snippets: &[String]) -> String {
    let mut blocks = vec![
        format!("Purpose: {}", purpose.as_str()),
        "Instructions: respond with the requested output only.".to_string(),
        String::new(),
    ];
    blocks.extend(
        snippets
            .iter()
            .enumerate()
            .map(|(idx, text)| format!("Snippet {}:\n{text}", idx + 1)),
    );
    blocks.join("\n\n")
}
