//! Shared deterministic types for the loop and the governor.
//!
//! These types define stable contracts between components and serialize to the
//! exact lowercase/snake_case strings written into `state.json` and the ledger.

use serde::{Deserialize, Serialize};

use crate::exit_codes;

/// Planner-declared intent for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Continue,
    Final,
    Pause,
    Fail,
}

impl Intent {
    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Continue => "continue",
            Intent::Final => "final",
            Intent::Pause => "pause",
            Intent::Fail => "fail",
        }
    }
}

/// Control action chosen by the governor, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Pass,
    Nudge,
    Replan,
    BlockEscalate,
}

impl Action {
    /// All actions in severity order.
    pub const ALL: [Action; 4] = [
        Action::Pass,
        Action::Nudge,
        Action::Replan,
        Action::BlockEscalate,
    ];

    /// The next more severe action; `BlockEscalate` saturates.
    pub fn more_severe(self) -> Action {
        match self {
            Action::Pass => Action::Nudge,
            Action::Nudge => Action::Replan,
            Action::Replan | Action::BlockEscalate => Action::BlockEscalate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Pass => "pass",
            Action::Nudge => "nudge",
            Action::Replan => "replan",
            Action::BlockEscalate => "block_escalate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn is_elevated(self) -> bool {
        matches!(self, RiskLevel::Medium | RiskLevel::High)
    }
}

/// Evaluation route taken for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    Sentinel,
    DeepAudit,
    Arbitration,
}

/// How far the agent's operating intent moved in one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentChange {
    Patch,
    Minor,
    Major,
}

/// Terminal status of a symbolic loop run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    /// The planner returned `intent=final` with an answer.
    Passed,
    MaxIterations,
    MaxMinutes,
    /// Unusable plan after retry, unbounded limits, pause/fail, or an enforced block.
    InvalidConfig,
    /// Unexpected failure inside the loop body.
    Error,
}

impl FinalStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            FinalStatus::Passed => exit_codes::OK,
            FinalStatus::MaxIterations | FinalStatus::MaxMinutes => exit_codes::BUDGET_EXHAUSTED,
            FinalStatus::InvalidConfig => exit_codes::INVALID_CONFIG,
            FinalStatus::Error => exit_codes::ERROR,
        }
    }
}
