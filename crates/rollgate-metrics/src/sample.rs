//! A single metric reading.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point-in-time health reading for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

impl MetricSample {
    pub fn new(name: &str, value: f64, timestamp_ms: u64) -> Self {
        Self {
            name: name.to_string(),
            value,
            timestamp_ms,
        }
    }

    /// A sample stamped with the current wall clock.
    pub fn now(name: &str, value: f64) -> Self {
        Self::new(name, value, epoch_millis())
    }
}

/// Current wall clock as Unix milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
