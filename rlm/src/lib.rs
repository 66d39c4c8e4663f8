//! Recursive reasoning over oversized text with an audited decision trail.
//!
//! A run pairs three pieces:
//!
//! - **Context store** ([`io::context_store`]): an immutable, content-addressed
//!   byte-range index over one text source, addressed by chunk pointers.
//! - **Symbolic loop** ([`symbolic`]): a planner oracle proposes searches, reads and
//!   subcalls each turn under hard byte and call budgets; every plan is validated
//!   before anything runs.
//! - **Alignment governor** ([`governor`]): scores each turn, stabilizes the chosen
//!   action, runs periodic consensus, and appends every decision to a hash-chained
//!   ledger.
//!
//! The architecture keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic. No I/O, fully testable in isolation.
//! - **[`io`]**: Filesystem and oracle ports. Isolated to enable fakes in tests.

pub mod core;
pub mod exit_codes;
pub mod governor;
pub mod io;
pub mod logging;
pub mod symbolic;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
