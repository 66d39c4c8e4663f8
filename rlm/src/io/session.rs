//! Ingestion session marker (`alignment/ingestion-session.json`).
//!
//! The session key namespaces ledger idempotency keys. A restarted run with the
//! same run id resumes the open session; once the run completes, the next
//! start opens a fresh one.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::io::atomic::write_json_atomic;

pub const SESSION_FILE: &str = "ingestion-session.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionSession {
    pub run_id: String,
    pub session_key: String,
    pub completed: bool,
}

pub fn session_path(run_dir: &Path) -> PathBuf {
    run_dir.join("alignment").join(SESSION_FILE)
}

fn read_session(path: &Path) -> Option<IngestionSession> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

/// Reuse the open session for `run_id`, or start a new one.
///
/// An unreadable marker is treated as absent.
pub fn resolve_session(run_dir: &Path, run_id: &str) -> Result<IngestionSession> {
    let path = session_path(run_dir);
    if let Some(existing) = read_session(&path) {
        if existing.run_id == run_id && !existing.completed {
            debug!(session_key = %existing.session_key, "resuming ingestion session");
            return Ok(existing);
        }
    }
    let session = IngestionSession {
        run_id: run_id.to_string(),
        session_key: format!("{run_id}:{}", Uuid::new_v4()),
        completed: false,
    };
    write_json_atomic(&path, &session)
        .with_context(|| format!("write ingestion session {}", path.display()))?;
    debug!(session_key = %session.session_key, "started ingestion session");
    Ok(session)
}

/// Mark the session completed so the next run starts a new one.
pub fn mark_completed(run_dir: &Path, session: &IngestionSession) -> Result<()> {
    let path = session_path(run_dir);
    let completed = IngestionSession {
        completed: true,
        ..session.clone()
    };
    write_json_atomic(&path, &completed)
        .with_context(|| format!("write ingestion session {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_session_is_reused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = resolve_session(temp.path(), "run-1").expect("resolve");
        assert!(first.session_key.starts_with("run-1:"));
        assert!(!first.completed);
        let second = resolve_session(temp.path(), "run-1").expect("resolve");
        assert_eq!(first, second);
    }

    #[test]
    fn completed_session_is_replaced() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = resolve_session(temp.path(), "run-1").expect("resolve");
        mark_completed(temp.path(), &first).expect("complete");
        let stored = read_session(&session_path(temp.path())).expect("stored");
        assert!(stored.completed);

        let second = resolve_session(temp.path(), "run-1").expect("resolve");
        assert_ne!(first.session_key, second.session_key);
        assert!(!second.completed);
    }

    #[test]
    fn different_run_id_starts_new_session() {
        let temp = tempfile::tempdir().expect("tempdir");
        let first = resolve_session(temp.path(), "run-1").expect("resolve");
        let second = resolve_session(temp.path(), "run-2").expect("resolve");
        assert_ne!(first.session_key, second.session_key);
        assert!(second.session_key.starts_with("run-2:"));
    }

    #[test]
    fn corrupt_marker_is_ignored() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = session_path(temp.path());
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, "{ not json").expect("write");
        let session = resolve_session(temp.path(), "run-1").expect("resolve");
        assert!(session.session_key.starts_with("run-1:"));
    }
}
