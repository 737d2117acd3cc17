//! Scripted collaborators for controller and manager tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Semaphore;

use rollgate_metrics::sample::epoch_millis;
use rollgate_metrics::{MetricSample, MetricsSource, SourceUnavailable};
use rollgate_plan::{IncrementPolicy, RolloutPlan, Stage, Thresholds};

use crate::actuator::{RollbackExecutor, RollbackFailed, ShiftFailed, TrafficShifter};

/// A plan tracking `error_rate` (warning 2.0, critical 5.0) with the
/// given stage weights, failure budget, and a uniform hold.
pub(crate) fn fast_plan(weights: &[u8], max_failures: u32, hold: Duration) -> RolloutPlan {
    let stages = weights
        .iter()
        .map(|w| Stage {
            target_weight: *w,
            hold,
        })
        .collect();
    let thresholds: HashMap<String, Thresholds> = [(
        "error_rate".to_string(),
        Thresholds {
            warning: 2.0,
            critical: 5.0,
        },
    )]
    .into();

    RolloutPlan::new(
        stages,
        IncrementPolicy::Declared,
        max_failures,
        thresholds,
        Duration::from_secs(120),
    )
    .unwrap()
}

#[derive(Clone, Copy)]
enum Feed {
    Healthy,
    Degraded,
    Critical,
    Unavailable,
}

/// Metrics source whose behavior is switched from the test body.
pub(crate) struct ScriptedSource {
    mode: Mutex<Feed>,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self {
            mode: Mutex::new(Feed::Healthy),
        }
    }

    pub(crate) fn healthy(&self) {
        *self.mode.lock().unwrap() = Feed::Healthy;
    }

    pub(crate) fn degraded(&self) {
        *self.mode.lock().unwrap() = Feed::Degraded;
    }

    pub(crate) fn critical(&self) {
        *self.mode.lock().unwrap() = Feed::Critical;
    }

    pub(crate) fn unavailable(&self) {
        *self.mode.lock().unwrap() = Feed::Unavailable;
    }
}

#[async_trait::async_trait]
impl MetricsSource for ScriptedSource {
    async fn fetch(
        &self,
        metric: &str,
        _window: Duration,
    ) -> Result<Vec<MetricSample>, SourceUnavailable> {
        let mode = *self.mode.lock().unwrap();
        let value = match mode {
            Feed::Healthy => 0.5,
            Feed::Degraded => 3.0,
            Feed::Critical => 7.0,
            Feed::Unavailable => {
                return Err(SourceUnavailable("collector offline".to_string()));
            }
        };
        Ok(vec![MetricSample::new(metric, value, epoch_millis())])
    }
}

/// Shifter that records every requested weight and can fail on demand.
pub(crate) struct RecordingShifter {
    calls: Mutex<Vec<u8>>,
    fail_budget: AtomicU32,
}

impl RecordingShifter {
    pub(crate) fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fail_budget: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` calls.
    pub(crate) fn fail_next(&self, n: u32) {
        self.fail_budget.store(n, Ordering::SeqCst);
    }

    /// Every requested weight, in call order (including failed calls).
    pub(crate) fn calls(&self) -> Vec<u8> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl TrafficShifter for RecordingShifter {
    async fn set_weight(&self, _target: &str, percent: u8) -> Result<(), ShiftFailed> {
        self.calls.lock().unwrap().push(percent);
        if self.fail_budget.load(Ordering::SeqCst) > 0 {
            self.fail_budget.fetch_sub(1, Ordering::SeqCst);
            return Err(ShiftFailed("gateway refused weight change".to_string()));
        }
        Ok(())
    }
}

/// Shifter that parks every call until a permit is released on the
/// shared gate. Lets tests hold a shift in flight deterministically.
pub(crate) struct GatedShifter {
    gate: Arc<Semaphore>,
}

impl GatedShifter {
    pub(crate) fn new(gate: Arc<Semaphore>) -> Self {
        Self { gate }
    }
}

#[async_trait::async_trait]
impl TrafficShifter for GatedShifter {
    async fn set_weight(&self, _target: &str, _percent: u8) -> Result<(), ShiftFailed> {
        match self.gate.acquire().await {
            Ok(permit) => {
                permit.forget();
                Ok(())
            }
            Err(_) => Err(ShiftFailed("gate closed".to_string())),
        }
    }
}

/// Rollback executor that counts invocations and can be made to fail.
pub(crate) struct RecordingRollback {
    calls: AtomicU32,
    fail: AtomicBool,
}

impl RecordingRollback {
    pub(crate) fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_always(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl RollbackExecutor for RecordingRollback {
    async fn revert(&self, _target: &str) -> Result<(), RollbackFailed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(RollbackFailed("revert rejected".to_string()));
        }
        Ok(())
    }
}
