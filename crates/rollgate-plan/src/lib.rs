//! rollgate-plan — rollout plan data model and validation.
//!
//! A [`RolloutPlan`] is the immutable description of a progressive
//! rollout: an ordered sequence of traffic-weight stages with hold
//! durations, per-metric health thresholds, and a failure budget.
//! Plans are validated at construction and never change afterwards.
//!
//! # Components
//!
//! - **`plan`** — `RolloutPlan`, `Stage`, `IncrementPolicy`, `Thresholds`
//! - **`config`** — TOML plan files (`rollout.toml`)
//! - **`error`** — `InvalidPlan` construction errors

pub mod config;
pub mod error;
pub mod plan;

pub use config::{PlanConfig, parse_duration};
pub use error::InvalidPlan;
pub use plan::{IncrementPolicy, RolloutPlan, Stage, Thresholds};
