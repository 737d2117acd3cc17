//! rollgate-evaluator — turns metric windows into a stage verdict.
//!
//! The evaluator is pure: given window snapshots and the active stage's
//! thresholds it classifies each metric and folds the results into a
//! single [`StageVerdict`]. It holds no state and performs no I/O, so
//! any model-based classifier can replace the collector behind the
//! metrics-source seam without touching this logic.

pub mod evaluator;

pub use evaluator::{Aggregation, Breach, Health, Severity, StageEvaluator, StageVerdict};
