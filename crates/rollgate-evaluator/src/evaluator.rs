//! Stage evaluation — aggregate, classify, fold.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use rollgate_metrics::MetricWindow;
use rollgate_plan::Thresholds;

/// How a metric window is reduced to one value before classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Use the newest sample. Default.
    #[default]
    MostRecent,
    /// Mean over the whole window.
    Mean,
}

impl std::str::FromStr for Aggregation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "most_recent" => Ok(Self::MostRecent),
            "mean" => Ok(Self::Mean),
            other => Err(format!("unknown aggregation policy: {other}")),
        }
    }
}

/// Breach severity against the stage thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// One metric that crossed a bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    pub metric: String,
    pub value: f64,
    pub severity: Severity,
}

/// The per-evaluation health classification for the active stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Failed,
    /// One or more tracked metrics have no samples in the window yet.
    Insufficient,
}

/// Verdict for one evaluation of the active stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageVerdict {
    pub health: Health,
    /// Metrics that crossed a bound, worst first.
    pub breaches: Vec<Breach>,
    /// Tracked metrics with no samples in the window.
    pub missing: Vec<String>,
}

impl StageVerdict {
    /// Short reason string for events: the breaching metric names, or
    /// the missing ones when no data drove the verdict.
    pub fn reason(&self) -> String {
        if !self.breaches.is_empty() {
            let names: Vec<&str> = self.breaches.iter().map(|b| b.metric.as_str()).collect();
            names.join(",")
        } else if !self.missing.is_empty() {
            format!("no samples for {}", self.missing.join(","))
        } else {
            "healthy".to_string()
        }
    }
}

/// Classifies metric windows against stage thresholds.
///
/// Stateless: every call works from the snapshots passed in.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageEvaluator {
    aggregation: Aggregation,
}

impl StageEvaluator {
    pub fn new(aggregation: Aggregation) -> Self {
        Self { aggregation }
    }

    /// Evaluate the active stage.
    ///
    /// Precedence: any critical breach fails the stage; otherwise a
    /// tracked metric without samples makes the verdict Insufficient;
    /// otherwise any warning breach degrades it; otherwise Healthy.
    pub fn evaluate(
        &self,
        windows: &HashMap<String, MetricWindow>,
        thresholds: &HashMap<String, Thresholds>,
    ) -> StageVerdict {
        let mut breaches = Vec::new();
        let mut missing = Vec::new();

        for (metric, bounds) in thresholds {
            let value = windows.get(metric).and_then(|w| self.aggregate(w));
            let Some(value) = value else {
                missing.push(metric.clone());
                continue;
            };

            if value > bounds.critical {
                breaches.push(Breach {
                    metric: metric.clone(),
                    value,
                    severity: Severity::Critical,
                });
            } else if value > bounds.warning {
                breaches.push(Breach {
                    metric: metric.clone(),
                    value,
                    severity: Severity::Warning,
                });
            }
        }

        // Worst first; ties by name for stable event reasons.
        breaches.sort_by(|a, b| {
            let rank = |s: Severity| match s {
                Severity::Critical => 0,
                Severity::Warning => 1,
            };
            rank(a.severity)
                .cmp(&rank(b.severity))
                .then_with(|| a.metric.cmp(&b.metric))
        });
        missing.sort();

        let health = if breaches.iter().any(|b| b.severity == Severity::Critical) {
            Health::Failed
        } else if !missing.is_empty() {
            Health::Insufficient
        } else if !breaches.is_empty() {
            Health::Degraded
        } else {
            Health::Healthy
        };

        debug!(?health, breaches = breaches.len(), missing = missing.len(), "stage evaluated");

        StageVerdict {
            health,
            breaches,
            missing,
        }
    }

    fn aggregate(&self, window: &MetricWindow) -> Option<f64> {
        match self.aggregation {
            Aggregation::MostRecent => window.latest().map(|s| s.value),
            Aggregation::Mean => window.mean(),
        }
    }
}
