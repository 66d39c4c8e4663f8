//! Deterministic, pure logic shared by the symbolic loop and the alignment governor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod chunking;
pub mod consensus;
pub mod decision;
pub mod gate;
pub mod intent;
pub mod oscillation;
pub mod plan;
pub mod pointer;
pub mod policy;
pub mod scoring;
pub mod text;
pub mod types;
