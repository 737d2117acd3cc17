//! Traffic shifting and rollback seams.

use thiserror::Error;

/// The platform rejected or failed a weight change.
///
/// Transient: the tick absorbs it and the change is retried on the
/// next tick, never in a loop within one tick.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("traffic shift failed: {0}")]
pub struct ShiftFailed(pub String);

/// The revert call failed. Fatal to automation: the controller does
/// not retry; the failure is surfaced as a critical event.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("rollback failed: {0}")]
pub struct RollbackFailed(pub String);

/// Applies a requested traffic-weight change to the underlying
/// platform.
#[async_trait::async_trait]
pub trait TrafficShifter: Send + Sync {
    /// Route `percent` of traffic for `target` to the new version.
    async fn set_weight(&self, target: &str, percent: u8) -> Result<(), ShiftFailed>;
}

/// Reverts traffic fully to the prior stable version.
#[async_trait::async_trait]
pub trait RollbackExecutor: Send + Sync {
    async fn revert(&self, target: &str) -> Result<(), RollbackFailed>;
}
