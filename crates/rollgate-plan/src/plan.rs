//! The rollout plan — stages, increment policy, thresholds.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::InvalidPlan;

/// A single stage of a progressive rollout: a target traffic weight and
/// the minimum time the stage must remain healthy before advancing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    /// Traffic weight for the new version, 0–100.
    pub target_weight: u8,
    /// Minimum healthy dwell time before the next stage.
    pub hold: Duration,
}

/// How stage weights are produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncrementPolicy {
    /// Stage weights are taken as declared.
    Declared,
    /// Each stage adds `step` percent over the previous one. The
    /// declared stages must match the computed sequence.
    Fixed { step: u8 },
}

impl Default for IncrementPolicy {
    fn default() -> Self {
        Self::Declared
    }
}

/// Warning/critical upper bounds for one metric. A value above
/// `warning` degrades the stage; above `critical` fails it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

/// Immutable description of a progressive rollout.
///
/// Validated on construction — see [`InvalidPlan`] for the rules.
/// The tracked metrics are exactly the keys of the thresholds map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutPlan {
    stages: Vec<Stage>,
    increment: IncrementPolicy,
    max_failures: u32,
    thresholds: HashMap<String, Thresholds>,
    insufficient_grace: Duration,
}

impl RolloutPlan {
    /// Build and validate a plan.
    ///
    /// Fails if stages are empty, weights are non-monotonic or out of
    /// range, the final weight is not 100, a fixed increment does not
    /// reproduce the declared stages, `max_failures` is zero, no
    /// metrics are tracked, or any threshold pair is inverted.
    pub fn new(
        stages: Vec<Stage>,
        increment: IncrementPolicy,
        max_failures: u32,
        thresholds: HashMap<String, Thresholds>,
        insufficient_grace: Duration,
    ) -> Result<Self, InvalidPlan> {
        if stages.is_empty() {
            return Err(InvalidPlan::EmptyStages);
        }

        let mut previous: Option<u8> = None;
        for (index, stage) in stages.iter().enumerate() {
            if stage.target_weight > 100 {
                return Err(InvalidPlan::WeightOutOfRange {
                    index,
                    weight: stage.target_weight,
                });
            }
            if let Some(prev) = previous
                && stage.target_weight <= prev
            {
                return Err(InvalidPlan::NonMonotonicWeights {
                    index,
                    previous: prev,
                    weight: stage.target_weight,
                });
            }
            previous = Some(stage.target_weight);
        }

        let final_weight = stages[stages.len() - 1].target_weight;
        if final_weight != 100 {
            return Err(InvalidPlan::FinalWeightNot100(final_weight));
        }

        if let IncrementPolicy::Fixed { step } = increment {
            let base = stages[0].target_weight as u32;
            for (index, stage) in stages.iter().enumerate() {
                let expected = base + index as u32 * step as u32;
                if stage.target_weight as u32 != expected {
                    return Err(InvalidPlan::IncrementMismatch {
                        step,
                        index,
                        expected,
                        declared: stage.target_weight,
                    });
                }
            }
        }

        if max_failures < 1 {
            return Err(InvalidPlan::MaxFailuresZero);
        }

        if thresholds.is_empty() {
            return Err(InvalidPlan::NoTrackedMetrics);
        }
        for (metric, bounds) in &thresholds {
            if bounds.critical < bounds.warning {
                return Err(InvalidPlan::ThresholdInverted {
                    metric: metric.clone(),
                    warning: bounds.warning,
                    critical: bounds.critical,
                });
            }
        }

        Ok(Self {
            stages,
            increment,
            max_failures,
            thresholds,
            insufficient_grace,
        })
    }

    /// The stage at `index`, if it exists.
    pub fn stage_at(&self, index: usize) -> Option<&Stage> {
        self.stages.get(index)
    }

    /// Number of stages in the plan.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Whether `index` is the last stage (the 100% stage).
    pub fn is_final_stage(&self, index: usize) -> bool {
        index + 1 == self.stages.len()
    }

    /// Consecutive degraded evaluations tolerated before failing.
    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    /// Per-metric warning/critical bounds.
    pub fn thresholds(&self) -> &HashMap<String, Thresholds> {
        &self.thresholds
    }

    /// Names of the tracked metrics.
    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.thresholds.keys().map(String::as_str)
    }

    /// How long a metric may stay without samples before the rollout
    /// is failed outright.
    pub fn insufficient_grace(&self) -> Duration {
        self.insufficient_grace
    }

    /// The increment policy the stages were declared under.
    pub fn increment(&self) -> &IncrementPolicy {
        &self.increment
    }
}
