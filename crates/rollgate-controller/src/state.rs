//! Rollout status and observable state snapshots.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a rollout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    /// Created, not started.
    Pending,
    /// The tick loop is driving stages.
    InProgress,
    /// Final stage completed its hold healthy. Terminal.
    Succeeded,
    /// Reverted to the prior stable version. Terminal.
    RolledBack,
    /// Operator-initiated or upstream cancellation. Terminal.
    Aborted,
}

impl RolloutStatus {
    /// Whether no further transitions can occur.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::RolledBack | Self::Aborted)
    }
}

/// Observable state of a rollout.
///
/// Owned and mutated only by its controller; external readers receive
/// cloned snapshots, never a torn mid-tick view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutState {
    pub rollout_id: String,
    pub status: RolloutStatus,
    pub current_stage: usize,
    pub consecutive_failures: u32,
    /// Unix ms when `start()` was accepted.
    pub started_at_ms: Option<u64>,
    /// Unix ms of the last evaluation tick.
    pub last_evaluation_at_ms: Option<u64>,
    /// False when a rollback was requested but the revert call failed;
    /// the target needs manual verification.
    pub rollback_verified: bool,
}

impl RolloutState {
    pub fn new(rollout_id: &str) -> Self {
        Self {
            rollout_id: rollout_id.to_string(),
            status: RolloutStatus::Pending,
            current_stage: 0,
            consecutive_failures: 0,
            started_at_ms: None,
            last_evaluation_at_ms: None,
            rollback_verified: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!RolloutStatus::Pending.is_terminal());
        assert!(!RolloutStatus::InProgress.is_terminal());
        assert!(RolloutStatus::Succeeded.is_terminal());
        assert!(RolloutStatus::RolledBack.is_terminal());
        assert!(RolloutStatus::Aborted.is_terminal());
    }

    #[test]
    fn fresh_state() {
        let state = RolloutState::new("checkout-v2");
        assert_eq!(state.status, RolloutStatus::Pending);
        assert_eq!(state.current_stage, 0);
        assert!(state.rollback_verified);
    }
}
