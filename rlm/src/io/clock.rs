//! Timestamp source for indexes and ledger events.

use chrono::{SecondsFormat, Utc};

/// Produces RFC 3339 UTC timestamps.
pub trait Clock: Send + Sync {
    fn now_rfc3339(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_rfc3339(&self) -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_emits_utc_rfc3339() {
        let stamp = SystemClock.now_rfc3339();
        assert!(stamp.ends_with('Z'), "{stamp}");
        chrono::DateTime::parse_from_rfc3339(&stamp).expect("parse");
    }
}
