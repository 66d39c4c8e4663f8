//! Anti-oscillation: hold severe actions through a cooldown.

use serde::{Deserialize, Serialize};

use crate::core::types::Action;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OscillationState {
    pub previous_action: Option<Action>,
    pub cooldown_remaining: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stabilized {
    pub action: Action,
    /// True when a relaxation was suppressed.
    pub held: bool,
    pub next: OscillationState,
}

/// Apply the cooldown to a candidate action.
///
/// A candidate less severe than the previous action is suppressed while the
/// cooldown is running. Any actual change of action, including the first
/// action of a run, restarts the cooldown.
pub fn stabilize(candidate: Action, state: OscillationState, cooldown_turns: u32) -> Stabilized {
    if let Some(previous) = state.previous_action {
        if state.cooldown_remaining > 0 && candidate < previous {
            return Stabilized {
                action: previous,
                held: true,
                next: OscillationState {
                    previous_action: Some(previous),
                    cooldown_remaining: state.cooldown_remaining - 1,
                },
            };
        }
    }
    let changed = state.previous_action != Some(candidate);
    let cooldown_remaining = if changed {
        cooldown_turns
    } else {
        state.cooldown_remaining.saturating_sub(1)
    };
    Stabilized {
        action: candidate,
        held: false,
        next: OscillationState {
            previous_action: Some(candidate),
            cooldown_remaining,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(sequence: &[Action], cooldown: u32) -> Vec<Action> {
        let mut state = OscillationState::default();
        sequence
            .iter()
            .map(|candidate| {
                let step = stabilize(*candidate, state, cooldown);
                state = step.next;
                step.action
            })
            .collect()
    }

    #[test]
    fn block_is_held_through_cooldown() {
        let actions = run(&[Action::BlockEscalate, Action::Pass, Action::Pass], 2);
        assert_eq!(
            actions,
            vec![
                Action::BlockEscalate,
                Action::BlockEscalate,
                Action::BlockEscalate
            ]
        );
    }

    #[test]
    fn relaxation_resumes_after_cooldown() {
        let actions = run(
            &[
                Action::BlockEscalate,
                Action::Pass,
                Action::Pass,
                Action::Pass,
                Action::Pass,
            ],
            2,
        );
        assert_eq!(actions[3], Action::Pass);
        assert_eq!(actions[4], Action::Pass);
    }

    #[test]
    fn escalation_is_never_suppressed() {
        let actions = run(&[Action::Pass, Action::Nudge, Action::BlockEscalate], 5);
        assert_eq!(
            actions,
            vec![Action::Pass, Action::Nudge, Action::BlockEscalate]
        );
    }

    #[test]
    fn zero_cooldown_disables_holding() {
        let actions = run(&[Action::BlockEscalate, Action::Pass], 0);
        assert_eq!(actions, vec![Action::BlockEscalate, Action::Pass]);
    }

    #[test]
    fn held_step_reports_suppression() {
        let state = OscillationState {
            previous_action: Some(Action::Replan),
            cooldown_remaining: 1,
        };
        let step = stabilize(Action::Nudge, state, 2);
        assert!(step.held);
        assert_eq!(step.action, Action::Replan);
        assert_eq!(step.next.cooldown_remaining, 0);
    }
}
