//! Rollout manager — one background tick loop per active rollout.
//!
//! Each launched rollout gets its own task; concurrent rollouts for
//! different targets share no mutable state. Abort is cooperative: the
//! flag is observed at the top of the next tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::controller::{AbortHandle, ControllerError, RolloutController};
use crate::state::RolloutState;

/// Per-rollout bookkeeping.
struct RolloutSlot {
    handle: JoinHandle<()>,
    abort: AbortHandle,
    shutdown_tx: watch::Sender<bool>,
    status_rx: watch::Receiver<RolloutState>,
}

/// Slots for running rollouts plus the targets whose initial traffic
/// shift is still in flight.
#[derive(Default)]
struct Registry {
    slots: HashMap<String, RolloutSlot>,
    starting: HashSet<String>,
}

/// Owns the background tasks for all active rollouts.
pub struct RolloutManager {
    registry: Arc<RwLock<Registry>>,
}

impl RolloutManager {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
        }
    }

    /// Start a rollout and spawn its tick loop.
    ///
    /// Rejects a launch while another rollout for the same target is
    /// still active. A finished rollout's slot is replaced.
    pub async fn launch(
        &self,
        mut controller: RolloutController,
        tick_interval: Duration,
    ) -> Result<(), ControllerError> {
        let rollout_id = controller.rollout_id().to_string();

        {
            let mut registry = self.registry.write().await;
            let active = registry
                .slots
                .get(&rollout_id)
                .map(|slot| !slot.status_rx.borrow().status.is_terminal())
                .unwrap_or(false);
            if active || registry.starting.contains(&rollout_id) {
                return Err(ControllerError::AlreadyStarted(rollout_id));
            }
            registry.starting.insert(rollout_id.clone());
        }

        // The initial shift talks to the platform and can take a
        // while; the registry stays unlocked so other rollouts remain
        // reachable meanwhile. The target is reserved above.
        if let Err(e) = controller.start().await {
            self.registry.write().await.starting.remove(&rollout_id);
            return Err(e);
        }

        let status_rx = controller.subscribe();
        let abort = controller.abort_handle();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_rollout_loop(controller, tick_interval, shutdown_rx));

        let mut registry = self.registry.write().await;
        registry.starting.remove(&rollout_id);
        registry.slots.insert(
            rollout_id.clone(),
            RolloutSlot {
                handle,
                abort,
                shutdown_tx,
                status_rx,
            },
        );
        info!(rollout = %rollout_id, interval_secs = tick_interval.as_secs(), "rollout loop launched");
        Ok(())
    }

    /// Signal an abort. Takes effect before the rollout's next tick.
    /// Returns false if no such rollout is known.
    pub async fn abort(&self, rollout_id: &str) -> bool {
        let registry = self.registry.read().await;
        match registry.slots.get(rollout_id) {
            Some(slot) => {
                slot.abort.abort();
                // Wake the loop so the abort lands now, not a tick later.
                let _ = slot.shutdown_tx.send(true);
                debug!(rollout = %rollout_id, "abort signalled");
                true
            }
            None => false,
        }
    }

    /// Latest state snapshot for a rollout.
    pub async fn status(&self, rollout_id: &str) -> Option<RolloutState> {
        let registry = self.registry.read().await;
        registry
            .slots
            .get(rollout_id)
            .map(|slot| slot.status_rx.borrow().clone())
    }

    /// IDs of all known rollouts (active and finished-but-unclaimed).
    pub async fn rollout_ids(&self) -> Vec<String> {
        let registry = self.registry.read().await;
        registry.slots.keys().cloned().collect()
    }

    /// Wait for a rollout's loop to finish and return its final state.
    pub async fn wait(&self, rollout_id: &str) -> Option<RolloutState> {
        let slot = {
            let mut registry = self.registry.write().await;
            registry.slots.remove(rollout_id)?
        };
        let _ = slot.handle.await;
        Some(slot.status_rx.borrow().clone())
    }

    /// Abort every rollout and wait for the loops to drain.
    pub async fn shutdown_all(&self) {
        let slots: Vec<(String, RolloutSlot)> = {
            let mut registry = self.registry.write().await;
            registry.slots.drain().collect()
        };
        for (id, slot) in slots {
            slot.abort.abort();
            let _ = slot.shutdown_tx.send(true);
            let _ = slot.handle.await;
            debug!(rollout = %id, "rollout loop stopped");
        }
        info!("all rollout loops stopped");
    }
}

impl Default for RolloutManager {
    fn default() -> Self {
        Self::new()
    }
}

/// The tick loop for a single rollout.
async fn run_rollout_loop(
    mut controller: RolloutController,
    tick_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(tick_interval) => {
                let status = controller.tick().await;
                if status.is_terminal() {
                    debug!(rollout = %controller.rollout_id(), ?status, "rollout loop finished");
                    break;
                }
            }
            _ = shutdown.changed() => {
                // Shutdown doubles as the abort wake-up; the tick path
                // in abort handling decides whether a revert is due.
                controller.abort().await;
                break;
            }
        }
    }
}
