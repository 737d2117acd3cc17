//! The rollout state machine.
//!
//! One controller instance owns one rollout. The state is mutated only
//! on `start()`, `tick()`, and abort handling; readers observe it
//! through watch-channel snapshots.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use rollgate_evaluator::{Aggregation, Health, StageEvaluator, StageVerdict};
use rollgate_metrics::sample::epoch_millis;
use rollgate_metrics::{MetricWindow, MetricsSource};
use rollgate_plan::RolloutPlan;

use crate::actuator::{RollbackExecutor, TrafficShifter};
use crate::events::{EventKind, EventSink, RolloutEvent};
use crate::state::{RolloutState, RolloutStatus};

/// Caller errors from the control surface.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControllerError {
    /// `start()` on a controller whose rollout already reached a
    /// terminal status.
    #[error("rollout {0} already terminated")]
    AlreadyTerminated(String),

    /// `start()` while the rollout is in progress.
    #[error("rollout {0} already started")]
    AlreadyStarted(String),
}

/// Tick-level tuning for a controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Metric window span handed to the source and kept locally.
    pub window: Duration,
    /// Budget for each collaborator call within a tick.
    pub tick_timeout: Duration,
    /// How windows are reduced before classification.
    pub aggregation: Aggregation,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            tick_timeout: Duration::from_secs(10),
            aggregation: Aggregation::MostRecent,
        }
    }
}

/// Cross-task abort signal for a running rollout.
///
/// Setting it takes effect before the next tick begins; the loop also
/// checks it before issuing shifter or rollback calls.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Drives a single rollout from start to a terminal status.
pub struct RolloutController {
    plan: RolloutPlan,
    evaluator: StageEvaluator,
    settings: ControllerSettings,

    source: Arc<dyn MetricsSource>,
    shifter: Arc<dyn TrafficShifter>,
    rollback: Arc<dyn RollbackExecutor>,
    sink: Arc<dyn EventSink>,

    state: RolloutState,
    windows: HashMap<String, MetricWindow>,

    /// When the current stage was entered (hold-duration clock).
    stage_entered_at: Option<Instant>,
    /// When metric data first went missing, for grace escalation.
    insufficient_since: Option<Instant>,
    /// Weight last applied through the shifter, if any.
    applied_weight: Option<u8>,
    /// Set once a rollback has been requested; no shifter call is ever
    /// issued afterwards, and at most one revert is in flight.
    rollback_requested: bool,

    abort_flag: Arc<AtomicBool>,
    state_tx: watch::Sender<RolloutState>,
}

impl RolloutController {
    pub fn new(
        rollout_id: &str,
        plan: RolloutPlan,
        settings: ControllerSettings,
        source: Arc<dyn MetricsSource>,
        shifter: Arc<dyn TrafficShifter>,
        rollback: Arc<dyn RollbackExecutor>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let windows = plan
            .metrics()
            .map(|m| (m.to_string(), MetricWindow::new(m, settings.window)))
            .collect();
        let state = RolloutState::new(rollout_id);
        let (state_tx, _) = watch::channel(state.clone());
        let evaluator = StageEvaluator::new(settings.aggregation);

        Self {
            plan,
            evaluator,
            settings,
            source,
            shifter,
            rollback,
            sink,
            state,
            windows,
            stage_entered_at: None,
            insufficient_since: None,
            applied_weight: None,
            rollback_requested: false,
            abort_flag: Arc::new(AtomicBool::new(false)),
            state_tx,
        }
    }

    /// The rollout this controller drives.
    pub fn rollout_id(&self) -> &str {
        &self.state.rollout_id
    }

    /// Immutable snapshot of the current state.
    pub fn snapshot(&self) -> RolloutState {
        self.state.clone()
    }

    /// Watch-channel receiver for state snapshots.
    pub fn subscribe(&self) -> watch::Receiver<RolloutState> {
        self.state_tx.subscribe()
    }

    /// Handle for aborting from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: self.abort_flag.clone(),
        }
    }

    /// Begin the rollout: transition to InProgress and route the first
    /// stage's weight to the new version.
    pub async fn start(&mut self) -> Result<(), ControllerError> {
        if self.state.status.is_terminal() {
            return Err(ControllerError::AlreadyTerminated(
                self.state.rollout_id.clone(),
            ));
        }
        if self.state.status == RolloutStatus::InProgress {
            return Err(ControllerError::AlreadyStarted(
                self.state.rollout_id.clone(),
            ));
        }

        let from = self.state.status;
        self.state.status = RolloutStatus::InProgress;
        self.state.started_at_ms = Some(epoch_millis());
        self.stage_entered_at = Some(Instant::now());

        let first_weight = self
            .plan
            .stage_at(0)
            .map(|s| s.target_weight)
            .unwrap_or(100);

        info!(
            rollout = %self.state.rollout_id,
            stages = self.plan.stage_count(),
            first_weight,
            "rollout started"
        );
        self.emit(
            EventKind::Started,
            from,
            RolloutStatus::InProgress,
            format!("first stage at {first_weight}%"),
        );

        self.apply_weight(first_weight).await;
        self.publish_state();
        Ok(())
    }

    /// Run one evaluation tick. Returns the status afterwards.
    ///
    /// Terminal rollouts ignore ticks. Transient collaborator errors
    /// are absorbed here and surface only as verdict degradation.
    pub async fn tick(&mut self) -> RolloutStatus {
        if self.state.status.is_terminal() {
            return self.state.status;
        }
        if self.state.status == RolloutStatus::Pending {
            debug!(rollout = %self.state.rollout_id, "tick before start ignored");
            return self.state.status;
        }

        // Abort wins over everything else on this tick.
        if self.abort_flag.load(Ordering::SeqCst) {
            self.do_abort().await;
            return self.state.status;
        }

        // A weight change that failed earlier is retried first.
        if self.applied_weight != self.current_stage_weight() {
            let weight = self.current_stage_weight().unwrap_or(100);
            self.apply_weight(weight).await;
        }

        self.fetch_samples().await;
        self.state.last_evaluation_at_ms = Some(epoch_millis());

        let verdict = self.evaluator.evaluate(&self.windows, self.plan.thresholds());
        self.handle_verdict(verdict).await;

        self.publish_state();
        self.state.status
    }

    /// Abort the rollout from the owning task. Idempotent; reverts
    /// traffic only if any weight was applied.
    pub async fn abort(&mut self) {
        self.abort_flag.store(true, Ordering::SeqCst);
        if !self.state.status.is_terminal() {
            self.do_abort().await;
            self.publish_state();
        }
    }

    async fn handle_verdict(&mut self, verdict: StageVerdict) {
        match verdict.health {
            Health::Healthy => {
                self.insufficient_since = None;
                self.state.consecutive_failures = 0;
                self.try_advance().await;
            }
            Health::Degraded => {
                self.insufficient_since = None;
                self.state.consecutive_failures += 1;
                if self.state.consecutive_failures >= self.plan.max_failures() {
                    warn!(
                        rollout = %self.state.rollout_id,
                        failures = self.state.consecutive_failures,
                        budget = self.plan.max_failures(),
                        "failure budget exhausted"
                    );
                    self.fail(verdict.reason()).await;
                } else {
                    debug!(
                        rollout = %self.state.rollout_id,
                        failures = self.state.consecutive_failures,
                        budget = self.plan.max_failures(),
                        reason = %verdict.reason(),
                        "degraded — holding stage"
                    );
                }
            }
            Health::Insufficient => {
                // Missing data holds the stage without consuming the
                // failure budget; only the grace period escalates it.
                let since = *self.insufficient_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.plan.insufficient_grace() {
                    warn!(
                        rollout = %self.state.rollout_id,
                        grace_secs = self.plan.insufficient_grace().as_secs(),
                        "metric data missing past grace period"
                    );
                    self.fail(verdict.reason()).await;
                } else {
                    debug!(
                        rollout = %self.state.rollout_id,
                        reason = %verdict.reason(),
                        "insufficient data — holding stage"
                    );
                }
            }
            Health::Failed => {
                self.fail(verdict.reason()).await;
            }
        }
    }

    /// Healthy verdict: advance if the hold duration has elapsed and
    /// the stage weight is actually in effect.
    async fn try_advance(&mut self) {
        let stage_index = self.state.current_stage;
        let Some(stage) = self.plan.stage_at(stage_index) else {
            return;
        };

        let held_long_enough = self
            .stage_entered_at
            .map(|t| t.elapsed() >= stage.hold)
            .unwrap_or(false);
        if !held_long_enough {
            debug!(
                rollout = %self.state.rollout_id,
                stage = stage_index,
                "healthy but hold duration not elapsed"
            );
            return;
        }
        if self.applied_weight != Some(stage.target_weight) {
            // The stage weight never took effect; the hold is not
            // meaningful until it does.
            return;
        }

        if self.plan.is_final_stage(stage_index) {
            self.state.status = RolloutStatus::Succeeded;
            info!(rollout = %self.state.rollout_id, "rollout succeeded");
            self.emit(
                EventKind::Succeeded,
                RolloutStatus::InProgress,
                RolloutStatus::Succeeded,
                "final stage held healthy".to_string(),
            );
            return;
        }

        // Re-check abort before touching the platform.
        if self.abort_flag.load(Ordering::SeqCst) {
            self.do_abort().await;
            return;
        }

        let next_index = stage_index + 1;
        let Some(next) = self.plan.stage_at(next_index) else {
            return;
        };
        let next_weight = next.target_weight;

        match self.shift(next_weight).await {
            Ok(()) => {
                self.applied_weight = Some(next_weight);
                self.state.current_stage = next_index;
                self.state.consecutive_failures = 0;
                self.stage_entered_at = Some(Instant::now());
                info!(
                    rollout = %self.state.rollout_id,
                    stage = next_index,
                    weight = next_weight,
                    "stage advanced"
                );
                self.emit(
                    EventKind::StageAdvanced,
                    RolloutStatus::InProgress,
                    RolloutStatus::InProgress,
                    format!("advanced to {next_weight}%"),
                );
            }
            Err(e) => {
                // Retried next tick; the stage and its clock stay put.
                warn!(
                    rollout = %self.state.rollout_id,
                    weight = next_weight,
                    error = %e,
                    "traffic shift failed — retrying next tick"
                );
            }
        }
    }

    /// Terminal failure path: revert traffic once and emit the outcome.
    async fn fail(&mut self, reason: String) {
        if self.rollback_requested {
            return;
        }
        self.rollback_requested = true;

        warn!(rollout = %self.state.rollout_id, %reason, "rolling back");
        let reverted = self.revert().await;

        self.state.status = RolloutStatus::RolledBack;
        match reverted {
            Ok(()) => {
                self.emit(
                    EventKind::RolledBack,
                    RolloutStatus::InProgress,
                    RolloutStatus::RolledBack,
                    reason,
                );
            }
            Err(e) => {
                self.state.rollback_verified = false;
                self.emit(
                    EventKind::RollbackFailed,
                    RolloutStatus::InProgress,
                    RolloutStatus::RolledBack,
                    format!("{reason}; revert failed: {e}"),
                );
            }
        }
    }

    async fn do_abort(&mut self) {
        if self.state.status.is_terminal() {
            return;
        }
        let from = self.state.status;

        // Revert only if traffic was actually moved off the baseline.
        let mut reason = "aborted before any traffic shift".to_string();
        if let Some(weight) = self.applied_weight
            && weight > 0
            && !self.rollback_requested
        {
            self.rollback_requested = true;
            match self.revert().await {
                Ok(()) => reason = format!("aborted at {weight}%, traffic reverted"),
                Err(e) => {
                    self.state.rollback_verified = false;
                    reason = format!("aborted at {weight}%, revert failed: {e}");
                }
            }
        }

        self.state.status = RolloutStatus::Aborted;
        info!(rollout = %self.state.rollout_id, %reason, "rollout aborted");
        let kind = if self.state.rollback_verified {
            EventKind::Aborted
        } else {
            EventKind::RollbackFailed
        };
        self.emit(kind, from, RolloutStatus::Aborted, reason);
    }

    /// Pull fresh samples for every tracked metric, bounded by the tick
    /// timeout. Unavailable or slow sources contribute nothing this
    /// tick; the windows keep pruning so stale data ages out.
    async fn fetch_samples(&mut self) {
        let now_ms = epoch_millis();
        for (metric, window) in &mut self.windows {
            let fetched = tokio::time::timeout(
                self.settings.tick_timeout,
                self.source.fetch(metric, self.settings.window),
            )
            .await;

            match fetched {
                Ok(Ok(samples)) => window.extend(samples),
                Ok(Err(e)) => {
                    debug!(rollout = %self.state.rollout_id, %metric, error = %e, "metrics fetch unavailable");
                }
                Err(_) => {
                    debug!(rollout = %self.state.rollout_id, %metric, "metrics fetch timed out");
                }
            }
            window.prune(now_ms);
        }
    }

    /// Apply `weight` through the shifter unless a rollback was
    /// already requested. Failure is logged and retried next tick.
    async fn apply_weight(&mut self, weight: u8) {
        if self.rollback_requested {
            return;
        }
        match self.shift(weight).await {
            Ok(()) => {
                self.applied_weight = Some(weight);
                debug!(rollout = %self.state.rollout_id, weight, "traffic weight applied");
            }
            Err(e) => {
                warn!(
                    rollout = %self.state.rollout_id,
                    weight,
                    error = %e,
                    "traffic shift failed — retrying next tick"
                );
            }
        }
    }

    async fn shift(&self, weight: u8) -> Result<(), crate::actuator::ShiftFailed> {
        tokio::time::timeout(
            self.settings.tick_timeout,
            self.shifter.set_weight(&self.state.rollout_id, weight),
        )
        .await
        .unwrap_or_else(|_| {
            Err(crate::actuator::ShiftFailed(
                "shift timed out".to_string(),
            ))
        })
    }

    async fn revert(&self) -> Result<(), crate::actuator::RollbackFailed> {
        tokio::time::timeout(
            self.settings.tick_timeout,
            self.rollback.revert(&self.state.rollout_id),
        )
        .await
        .unwrap_or_else(|_| {
            Err(crate::actuator::RollbackFailed(
                "revert timed out".to_string(),
            ))
        })
    }

    fn current_stage_weight(&self) -> Option<u8> {
        self.plan
            .stage_at(self.state.current_stage)
            .map(|s| s.target_weight)
    }

    fn emit(&self, kind: EventKind, from: RolloutStatus, to: RolloutStatus, reason: String) {
        self.sink.publish(RolloutEvent {
            rollout_id: self.state.rollout_id.clone(),
            timestamp_ms: epoch_millis(),
            kind,
            from_status: from,
            to_status: to,
            stage_index: self.state.current_stage,
            reason,
        });
    }

    fn publish_state(&self) {
        let _ = self.state_tx.send(self.state.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::testutil::{RecordingRollback, RecordingShifter, ScriptedSource, fast_plan};

    struct Fixture {
        controller: RolloutController,
        source: Arc<ScriptedSource>,
        shifter: Arc<RecordingShifter>,
        rollback: Arc<RecordingRollback>,
        sink: Arc<MemorySink>,
    }

    fn fixture(plan: RolloutPlan) -> Fixture {
        let source = Arc::new(ScriptedSource::new());
        let shifter = Arc::new(RecordingShifter::new());
        let rollback = Arc::new(RecordingRollback::new());
        let sink = Arc::new(MemorySink::new());
        let controller = RolloutController::new(
            "checkout-v2",
            plan,
            ControllerSettings::default(),
            source.clone(),
            shifter.clone(),
            rollback.clone(),
            sink.clone(),
        );
        Fixture {
            controller,
            source,
            shifter,
            rollback,
            sink,
        }
    }

    async fn tick_after_hold(f: &mut Fixture, hold: Duration) -> RolloutStatus {
        tokio::time::advance(hold + Duration::from_secs(1)).await;
        f.controller.tick().await
    }

    fn kinds(sink: &MemorySink) -> Vec<EventKind> {
        sink.events().iter().map(|e| e.kind).collect()
    }

    const HOLD: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn scenario_a_healthy_rollout_succeeds() {
        // Stages 20/40/100, all metrics healthy every tick.
        let mut f = fixture(fast_plan(&[20, 40, 100], 2, HOLD));
        f.source.healthy();

        f.controller.start().await.unwrap();
        assert_eq!(f.controller.snapshot().status, RolloutStatus::InProgress);
        assert_eq!(f.shifter.calls(), vec![20]);

        // Healthy before the hold elapses: no advancement.
        assert_eq!(f.controller.tick().await, RolloutStatus::InProgress);
        assert_eq!(f.controller.snapshot().current_stage, 0);

        assert_eq!(tick_after_hold(&mut f, HOLD).await, RolloutStatus::InProgress);
        assert_eq!(f.controller.snapshot().current_stage, 1);

        assert_eq!(tick_after_hold(&mut f, HOLD).await, RolloutStatus::InProgress);
        assert_eq!(f.controller.snapshot().current_stage, 2);

        assert_eq!(tick_after_hold(&mut f, HOLD).await, RolloutStatus::Succeeded);

        assert_eq!(f.shifter.calls(), vec![20, 40, 100]);
        assert_eq!(f.rollback.calls(), 0);
        assert_eq!(
            kinds(&f.sink),
            vec![
                EventKind::Started,
                EventKind::StageAdvanced,
                EventKind::StageAdvanced,
                EventKind::Succeeded,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_b_critical_breach_rolls_back() {
        // Stages 20/100, first evaluation breaches error_rate critically.
        let mut f = fixture(fast_plan(&[20, 100], 1, HOLD));
        f.source.critical();

        f.controller.start().await.unwrap();
        assert_eq!(f.controller.tick().await, RolloutStatus::RolledBack);

        // Shifter was only ever asked for the initial 20% stage.
        assert_eq!(f.shifter.calls(), vec![20]);
        assert_eq!(f.rollback.calls(), 1);

        let events = f.sink.events();
        assert_eq!(events.last().unwrap().kind, EventKind::RolledBack);
        assert!(events.last().unwrap().reason.contains("error_rate"));
        assert!(f.controller.snapshot().rollback_verified);
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_c_source_outage_holds_then_advances() {
        let mut f = fixture(fast_plan(&[20, 100], 1, HOLD));
        // Collector outage: every fetch fails.
        f.source.unavailable();

        f.controller.start().await.unwrap();

        // Hold elapses during the outage; still no advancement and,
        // crucially, no rollback even with max_failures = 1.
        tokio::time::advance(HOLD + Duration::from_secs(1)).await;
        for _ in 0..3 {
            assert_eq!(f.controller.tick().await, RolloutStatus::InProgress);
        }
        assert_eq!(f.controller.snapshot().current_stage, 0);
        assert_eq!(f.controller.snapshot().consecutive_failures, 0);
        assert_eq!(f.rollback.calls(), 0);

        // Collector recovers; the next healthy tick advances.
        f.source.healthy();
        assert_eq!(f.controller.tick().await, RolloutStatus::InProgress);
        assert_eq!(f.controller.snapshot().current_stage, 1);
        assert_eq!(f.shifter.calls(), vec![20, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_holds_until_budget_exhausted() {
        let mut f = fixture(fast_plan(&[50, 100], 3, HOLD));
        f.source.degraded();

        f.controller.start().await.unwrap();

        assert_eq!(f.controller.tick().await, RolloutStatus::InProgress);
        assert_eq!(f.controller.snapshot().consecutive_failures, 1);
        assert_eq!(f.controller.tick().await, RolloutStatus::InProgress);
        assert_eq!(f.controller.snapshot().consecutive_failures, 2);

        // Third consecutive degraded verdict escalates to Failed.
        assert_eq!(f.controller.tick().await, RolloutStatus::RolledBack);
        assert_eq!(f.rollback.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn healthy_tick_resets_failure_streak() {
        let mut f = fixture(fast_plan(&[50, 100], 2, HOLD));

        f.controller.start().await.unwrap();

        f.source.degraded();
        f.controller.tick().await;
        assert_eq!(f.controller.snapshot().consecutive_failures, 1);

        f.source.healthy();
        f.controller.tick().await;
        assert_eq!(f.controller.snapshot().consecutive_failures, 0);

        f.source.degraded();
        f.controller.tick().await;
        assert_eq!(f.controller.snapshot().status, RolloutStatus::InProgress);
    }

    #[tokio::test(start_paused = true)]
    async fn insufficient_escalates_after_grace() {
        let plan = fast_plan(&[50, 100], 3, HOLD);
        let grace = plan.insufficient_grace();
        let mut f = fixture(plan);
        f.source.unavailable();

        f.controller.start().await.unwrap();
        assert_eq!(f.controller.tick().await, RolloutStatus::InProgress);

        tokio::time::advance(grace + Duration::from_secs(1)).await;
        assert_eq!(f.controller.tick().await, RolloutStatus::RolledBack);
        assert_eq!(f.rollback.calls(), 1);

        let last = f.sink.events().pop().unwrap();
        assert_eq!(last.kind, EventKind::RolledBack);
        assert!(last.reason.contains("no samples"));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_before_start_skips_revert() {
        let mut f = fixture(fast_plan(&[20, 100], 2, HOLD));
        f.controller.abort().await;

        assert_eq!(f.controller.snapshot().status, RolloutStatus::Aborted);
        assert_eq!(f.rollback.calls(), 0);
        assert_eq!(f.shifter.calls(), Vec::<u8>::new());
    }

    #[tokio::test(start_paused = true)]
    async fn abort_mid_rollout_reverts_once() {
        let mut f = fixture(fast_plan(&[20, 100], 2, HOLD));
        f.source.healthy();

        f.controller.start().await.unwrap();
        f.controller.tick().await;

        f.controller.abort().await;
        assert_eq!(f.controller.snapshot().status, RolloutStatus::Aborted);
        assert_eq!(f.rollback.calls(), 1);

        // Second abort is a no-op.
        f.controller.abort().await;
        assert_eq!(f.rollback.calls(), 1);
        let aborted = f
            .sink
            .events()
            .iter()
            .filter(|e| e.kind == EventKind::Aborted)
            .count();
        assert_eq!(aborted, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abort_handle_takes_effect_before_next_tick() {
        let mut f = fixture(fast_plan(&[20, 100], 2, HOLD));
        f.source.healthy();

        f.controller.start().await.unwrap();
        let handle = f.controller.abort_handle();

        // Signalled from "another task" between ticks.
        handle.abort();
        tokio::time::advance(HOLD + Duration::from_secs(1)).await;
        assert_eq!(f.controller.tick().await, RolloutStatus::Aborted);

        // The tick never advanced the stage or shifted traffic again.
        assert_eq!(f.shifter.calls(), vec![20]);
        assert_eq!(f.rollback.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_rollout_ignores_ticks_and_rejects_start() {
        let mut f = fixture(fast_plan(&[100], 1, Duration::from_secs(0)));
        f.source.healthy();

        f.controller.start().await.unwrap();
        assert_eq!(f.controller.tick().await, RolloutStatus::Succeeded);

        // Further ticks change nothing.
        assert_eq!(f.controller.tick().await, RolloutStatus::Succeeded);
        assert_eq!(f.shifter.calls(), vec![100]);

        let err = f.controller.start().await.unwrap_err();
        assert_eq!(
            err,
            ControllerError::AlreadyTerminated("checkout-v2".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn double_start_rejected_while_in_progress() {
        let mut f = fixture(fast_plan(&[20, 100], 2, HOLD));
        f.controller.start().await.unwrap();
        assert_eq!(
            f.controller.start().await.unwrap_err(),
            ControllerError::AlreadyStarted("checkout-v2".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shift_failure_is_retried_next_tick() {
        let mut f = fixture(fast_plan(&[20, 100], 2, HOLD));
        f.source.healthy();
        f.shifter.fail_next(1);

        // Initial shift fails; the weight is applied on the next tick.
        f.controller.start().await.unwrap();
        assert_eq!(f.controller.snapshot().status, RolloutStatus::InProgress);

        f.controller.tick().await;
        assert_eq!(f.shifter.calls(), vec![20, 20]);

        // With the weight finally in effect the rollout advances once
        // the hold passes.
        tokio::time::advance(HOLD + Duration::from_secs(1)).await;
        f.controller.tick().await;
        assert_eq!(f.controller.snapshot().current_stage, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_revert_is_surfaced_not_retried() {
        let mut f = fixture(fast_plan(&[20, 100], 1, HOLD));
        f.source.critical();
        f.rollback.fail_always();

        f.controller.start().await.unwrap();
        assert_eq!(f.controller.tick().await, RolloutStatus::RolledBack);

        let snapshot = f.controller.snapshot();
        assert!(!snapshot.rollback_verified);
        assert_eq!(f.rollback.calls(), 1);
        assert_eq!(
            f.sink.events().last().unwrap().kind,
            EventKind::RollbackFailed
        );

        // No retry on later ticks: the rollout is terminal.
        f.controller.tick().await;
        assert_eq!(f.rollback.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_shifter_calls_after_rollback() {
        let mut f = fixture(fast_plan(&[20, 100], 1, HOLD));
        f.source.critical();

        f.controller.start().await.unwrap();
        f.controller.tick().await;
        let shifts_at_rollback = f.shifter.calls().len();

        f.controller.tick().await;
        f.controller.tick().await;
        assert_eq!(f.shifter.calls().len(), shifts_at_rollback);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_flow_through_watch_channel() {
        let mut f = fixture(fast_plan(&[100], 1, Duration::from_secs(0)));
        f.source.healthy();
        let mut rx = f.controller.subscribe();

        f.controller.start().await.unwrap();
        f.controller.tick().await;

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, RolloutStatus::Succeeded);
    }
}
