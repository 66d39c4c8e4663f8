//! Semantic versioning of the agent's operating intent.

use serde::{Deserialize, Serialize};

use crate::core::types::{Intent, IntentChange, RiskLevel};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub label: String,
}

impl Default for IntentVersion {
    fn default() -> Self {
        Self::new(1, 0, 0)
    }
}

impl IntentVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            label: format!("{major}.{minor}.{patch}"),
        }
    }

    /// Bump the component named by `change`, resetting lower components.
    pub fn bump(&self, change: IntentChange) -> Self {
        match change {
            IntentChange::Major => Self::new(self.major + 1, 0, 0),
            IntentChange::Minor => Self::new(self.major, self.minor + 1, 0),
            IntentChange::Patch => Self::new(self.major, self.minor, self.patch + 1),
        }
    }
}

/// Failures and heavy contradiction are major; terminal or risky turns are minor.
pub fn derive_intent_change(
    intent: Intent,
    contradictions: u32,
    risk_level: RiskLevel,
) -> IntentChange {
    if intent == Intent::Fail || contradictions >= 3 {
        IntentChange::Major
    } else if matches!(intent, Intent::Final | Intent::Pause) || risk_level == RiskLevel::High {
        IntentChange::Minor
    } else {
        IntentChange::Patch
    }
}
