//! rollgate-controller — the rollout state machine.
//!
//! A [`RolloutController`] drives a single rollout from start to
//! completion or rollback. On each tick it pulls metrics through a
//! [`MetricsSource`](rollgate_metrics::MetricsSource), asks the
//! evaluator for a verdict, and either advances the plan stage through
//! a [`TrafficShifter`], holds, or reverts through a
//! [`RollbackExecutor`], emitting [`RolloutEvent`]s throughout.
//!
//! # Components
//!
//! - **`state`** — `RolloutStatus`, `RolloutState` snapshots
//! - **`events`** — `RolloutEvent`, the `EventSink` seam, built-in sinks
//! - **`actuator`** — `TrafficShifter` / `RollbackExecutor` seams
//! - **`controller`** — the state machine (start, tick, abort)
//! - **`manager`** — per-rollout background tasks

pub mod actuator;
pub mod controller;
pub mod events;
pub mod manager;
pub mod state;

#[cfg(test)]
pub(crate) mod testutil;

pub use actuator::{RollbackExecutor, RollbackFailed, ShiftFailed, TrafficShifter};
pub use controller::{AbortHandle, ControllerError, ControllerSettings, RolloutController};
pub use events::{ChannelSink, EventKind, EventSink, MemorySink, RolloutEvent, TracingSink};
pub use manager::RolloutManager;
pub use state::{RolloutState, RolloutStatus};
