//! Side-effecting pieces: filesystem, oracle ports, prompt rendering.

pub mod artifacts;
pub mod atomic;
pub mod clock;
pub mod config;
pub mod context_store;
pub mod ledger;
pub mod oracle;
pub mod prompt;
pub mod session;
pub mod state;
