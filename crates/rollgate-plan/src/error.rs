//! Plan construction errors.

use thiserror::Error;

/// A rollout plan that failed validation. Construction-time and fatal:
/// the rollout is rejected before it starts.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvalidPlan {
    #[error("plan has no stages")]
    EmptyStages,

    #[error("stage {index} weight {weight} is above 100")]
    WeightOutOfRange { index: usize, weight: u8 },

    #[error("stage weights must strictly increase: stage {index} is {weight}, previous was {previous}")]
    NonMonotonicWeights {
        index: usize,
        previous: u8,
        weight: u8,
    },

    #[error("final stage weight must be 100, got {0}")]
    FinalWeightNot100(u8),

    #[error("fixed step of {step} does not reproduce stage {index}: expected {expected}, declared {declared}")]
    IncrementMismatch {
        step: u8,
        index: usize,
        expected: u32,
        declared: u8,
    },

    #[error("{field}: cannot parse duration {value:?}")]
    InvalidDuration { field: String, value: String },

    #[error("max_failures must be at least 1")]
    MaxFailuresZero,

    #[error("plan tracks no metrics")]
    NoTrackedMetrics,

    #[error("no thresholds configured for tracked metric {0}")]
    MissingThreshold(String),

    #[error("metric {metric}: critical bound {critical} is below warning bound {warning}")]
    ThresholdInverted {
        metric: String,
        warning: f64,
        critical: f64,
    },
}
