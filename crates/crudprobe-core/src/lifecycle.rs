//! Lifecycle state machine contract shared by run and test-case states.
//!
//! Both [`RunState`] (the orchestrator) and
//! [`CaseStatus`](crate::orchestrator::CaseStatus) implement [`LifecycleState`]
//! and are checked by the same conformance suite.

use serde::{Deserialize, Serialize};

/// A finite state machine with an explicit transition table.
///
/// `can_transition_to(next)` holds exactly when `next` is listed by
/// `valid_next_states()`. Terminal states list nothing; every other state
/// lists at least one successor. `all_states()` is exhaustive.
pub trait LifecycleState: Copy + Eq + Sized + 'static {
    fn can_transition_to(self, next: Self) -> bool {
        self.valid_next_states().contains(&next)
    }

    fn valid_next_states(self) -> Vec<Self>;

    fn is_terminal(self) -> bool;

    fn all_states() -> &'static [Self];
}

/// Orchestrator run state: `idle -> running -> aggregating -> done`.
///
/// `Aborted` is reachable from every non-terminal state when setup or
/// teardown fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
    Aggregating,
    Done,
    Aborted,
}

impl LifecycleState for RunState {
    fn valid_next_states(self) -> Vec<Self> {
        match self {
            Self::Idle => vec![Self::Running, Self::Aborted],
            Self::Running => vec![Self::Aggregating, Self::Aborted],
            Self::Aggregating => vec![Self::Done, Self::Aborted],
            Self::Done | Self::Aborted => Vec::new(),
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }

    fn all_states() -> &'static [Self] {
        &[
            Self::Idle,
            Self::Running,
            Self::Aggregating,
            Self::Done,
            Self::Aborted,
        ]
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONFORMANCE
// ═══════════════════════════════════════════════════════════════════════════


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_conformance() {
        conformance_tests::run_all_tests::<RunState>();
    }

    #[test]
    fn test_run_state_display_matches_serde() -> Result<(), serde_json::Error> {
        for &state in RunState::all_states() {
            assert_eq!(serde_json::to_string(&state)?, format!("\"{state}\""));
        }
        assert_eq!(RunState::Aggregating.to_string(), "aggregating");
        Ok(())
    }

    #[test]
    fn test_run_state_happy_path() {
        assert!(RunState::Idle.can_transition_to(RunState::Running));
        assert!(RunState::Running.can_transition_to(RunState::Aggregating));
        assert!(RunState::Aggregating.can_transition_to(RunState::Done));
    }

    #[test]
    fn test_run_state_cannot_skip_aggregation() {
        assert!(!RunState::Running.can_transition_to(RunState::Done));
        assert!(!RunState::Idle.can_transition_to(RunState::Aggregating));
    }

    #[test]
    fn test_aborted_reachable_from_every_live_state() {
        for &state in RunState::all_states() {
            if !state.is_terminal() {
                assert!(state.can_transition_to(RunState::Aborted));
            }
        }
    }
}
