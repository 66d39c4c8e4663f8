//! Pointer formats for context chunks and recorded subcall outputs.
//!
//! Context pointers look like `ctx:<object_id>#chunk:<chunk_id>`; subcall
//! pointers look like `subcall:<iteration>:<subcall_id>`.

use std::fmt;

pub const CONTEXT_POINTER_PREFIX: &str = "ctx:";
pub const SUBCALL_POINTER_PREFIX: &str = "subcall:";
const CHUNK_SEPARATOR: &str = "#chunk:";

/// Human-readable pointer template used in planner prompts.
pub const CONTEXT_POINTER_FORMAT: &str = "ctx:<object_id>#chunk:<chunk_id>";
pub const SUBCALL_POINTER_FORMAT: &str = "subcall:<iteration>:<subcall_id>";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContextPointer {
    pub object_id: String,
    pub chunk_id: String,
}

impl ContextPointer {
    pub fn new(object_id: impl Into<String>, chunk_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            chunk_id: chunk_id.into(),
        }
    }

    /// Parse a context pointer; returns `None` for anything malformed.
    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(CONTEXT_POINTER_PREFIX)?;
        let split = rest.find(CHUNK_SEPARATOR)?;
        let object_id = &rest[..split];
        let chunk_id = &rest[split + CHUNK_SEPARATOR.len()..];
        if object_id.is_empty() || chunk_id.is_empty() {
            return None;
        }
        Some(Self::new(object_id, chunk_id))
    }
}

impl fmt::Display for ContextPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{CONTEXT_POINTER_PREFIX}{}{CHUNK_SEPARATOR}{}",
            self.object_id, self.chunk_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubcallPointer {
    pub iteration: u32,
    pub subcall_id: String,
}

impl SubcallPointer {
    pub fn new(iteration: u32, subcall_id: impl Into<String>) -> Self {
        Self {
            iteration,
            subcall_id: subcall_id.into(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let rest = raw.strip_prefix(SUBCALL_POINTER_PREFIX)?;
        let (iteration, subcall_id) = rest.split_once(':')?;
        let iteration: u32 = iteration.parse().ok()?;
        if iteration == 0 || subcall_id.is_empty() {
            return None;
        }
        Some(Self::new(iteration, subcall_id))
    }
}

impl fmt::Display for SubcallPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SUBCALL_POINTER_PREFIX}{}:{}",
            self.iteration, self.subcall_id
        )
    }
}

/// Any pointer a plan may reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer {
    Context(ContextPointer),
    Subcall(SubcallPointer),
}

impl Pointer {
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.starts_with(CONTEXT_POINTER_PREFIX) {
            ContextPointer::parse(raw).map(Pointer::Context)
        } else if raw.starts_with(SUBCALL_POINTER_PREFIX) {
            SubcallPointer::parse(raw).map(Pointer::Subcall)
        } else {
            None
        }
    }
}

/// Subcall identifier for a 1-based ordinal within a run.
pub fn subcall_id(ordinal: usize) -> String {
    format!("sc{ordinal:04}")
}
