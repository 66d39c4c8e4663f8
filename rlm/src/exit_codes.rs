//! Stable exit codes for symbolic loop runs and the `rlm` CLI.

/// The planner produced a final answer, or a CLI command succeeded.
pub const OK: i32 = 0;
/// Generic CLI failure (bad arguments, unreadable context, broken ledger).
pub const INVALID: i32 = 1;
/// The loop stopped on its iteration ceiling or wall-clock deadline.
pub const BUDGET_EXHAUSTED: i32 = 3;
/// Unusable plan after retry, unbounded limits, pause/fail intent, or an enforced block.
pub const INVALID_CONFIG: i32 = 5;
/// Unexpected failure inside the loop body.
pub const ERROR: i32 = 10;
