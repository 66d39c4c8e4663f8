//! Ports for the external planner and subcall oracles.
//!
//! The symbolic loop only sees these traits. Production callers wire them to
//! a model backend; tests use scripted implementations from `test_support`.

use anyhow::Result;

use crate::core::plan::SubcallPurpose;

/// Produces raw planner text expected to contain one JSON plan.
pub trait Planner {
    /// `attempt` is zero for the first call of a turn and one for the retry.
    fn plan(&self, prompt: &str, attempt: u32) -> Result<String>;
}

/// Identifies the subcall being executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubcallInvocation<'a> {
    pub id: &'a str,
    pub purpose: SubcallPurpose,
}

/// Answers one delegated subcall prompt.
pub trait Subcaller {
    fn run(&self, prompt: &str, invocation: SubcallInvocation<'_>) -> Result<String>;
}

impl<F> Planner for F
where
    F: Fn(&str, u32) -> Result<String>,
{
    fn plan(&self, prompt: &str, attempt: u32) -> Result<String> {
        self(prompt, attempt)
    }
}

impl<F> Subcaller for F
where
    F: Fn(&str, SubcallInvocation<'_>) -> Result<String>,
{
    fn run(&self, prompt: &str, invocation: SubcallInvocation<'_>) -> Result<String> {
        self(prompt, invocation)
    }
}
