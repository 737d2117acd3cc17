//! rollout.toml plan file parser.
//!
//! ```toml
//! target = "checkout-v2"
//! max_failures = 3
//! insufficient_grace = "2m"
//! tick_interval = "15s"
//! tick_timeout = "10s"
//! window = "1m"
//! aggregation = "most_recent"
//!
//! [increment]
//! type = "fixed"
//! step = 20
//!
//! [[stages]]
//! weight = 20
//! hold = "5m"
//!
//! [thresholds.error_rate]
//! warning = 2.0
//! critical = 5.0
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::InvalidPlan;
use crate::plan::{IncrementPolicy, RolloutPlan, Stage, Thresholds};

/// A rollout plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanConfig {
    /// Deployment target the rollout drives.
    pub target: String,
    pub stages: Vec<StageConfig>,
    pub increment: Option<IncrementPolicy>,
    pub max_failures: Option<u32>,
    pub thresholds: HashMap<String, Thresholds>,
    /// Metrics the rollout must track. Defaults to the thresholds keys;
    /// listing a metric without a thresholds table is an error.
    pub metrics: Option<Vec<String>>,
    /// How long a metric may stay without samples (e.g. "2m").
    pub insufficient_grace: Option<String>,
    /// Evaluation loop interval (e.g. "15s").
    pub tick_interval: Option<String>,
    /// Budget for collaborator calls within one tick (e.g. "10s").
    pub tick_timeout: Option<String>,
    /// Metric window span (e.g. "1m").
    pub window: Option<String>,
    /// Aggregation policy: "most_recent" (default) or "mean".
    pub aggregation: Option<String>,
}

/// One stage entry in the plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    pub weight: u8,
    /// Healthy dwell time before advancing (e.g. "5m").
    pub hold: String,
}

impl PlanConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PlanConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Convert into a validated [`RolloutPlan`].
    pub fn to_plan(&self) -> Result<RolloutPlan, InvalidPlan> {
        if let Some(metrics) = &self.metrics {
            for metric in metrics {
                if !self.thresholds.contains_key(metric) {
                    return Err(InvalidPlan::MissingThreshold(metric.clone()));
                }
            }
        }

        let mut stages = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            stages.push(Stage {
                target_weight: stage.weight,
                hold: require_duration("stages.hold", &stage.hold)?,
            });
        }

        // Loop timings live outside the plan itself, but a file with
        // unparseable durations is rejected here rather than running
        // on silent defaults.
        for (field, value) in [
            ("tick_interval", &self.tick_interval),
            ("tick_timeout", &self.tick_timeout),
            ("window", &self.window),
        ] {
            if let Some(value) = value {
                require_duration(field, value)?;
            }
        }

        let insufficient_grace = match &self.insufficient_grace {
            Some(value) => require_duration("insufficient_grace", value)?,
            None => Duration::from_secs(120),
        };

        RolloutPlan::new(
            stages,
            self.increment.clone().unwrap_or_default(),
            self.max_failures.unwrap_or(3),
            self.thresholds.clone(),
            insufficient_grace,
        )
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(15))
    }

    pub fn tick_timeout(&self) -> Duration {
        self.tick_timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(10))
    }

    pub fn window(&self) -> Duration {
        self.window
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(60))
    }
}

fn require_duration(field: &str, value: &str) -> Result<Duration, InvalidPlan> {
    parse_duration(value).ok_or_else(|| InvalidPlan::InvalidDuration {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
