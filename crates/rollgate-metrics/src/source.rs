//! The metrics source interface.

use std::time::Duration;

use thiserror::Error;

use crate::sample::MetricSample;

/// The collector could not be reached or did not answer in time.
///
/// Transient by contract: the controller treats it as missing data for
/// the tick, never as a failed verdict.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("metrics source unavailable: {0}")]
pub struct SourceUnavailable(pub String);

/// Supplies point-in-time health readings for a deployment target.
///
/// Implementations may block on network I/O; callers bound each fetch
/// with a timeout.
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    /// Fetch samples for `metric` covering at most the trailing
    /// `window`. Returned samples need not be ordered.
    async fn fetch(
        &self,
        metric: &str,
        window: Duration,
    ) -> Result<Vec<MetricSample>, SourceUnavailable>;
}
