//! Rollout events and the event sink seam.
//!
//! Events are immutable records emitted on every state transition.
//! Publishing is best-effort and non-blocking: a lost event never
//! affects state-machine progress. Fan-out to channels (chat, paging,
//! dashboards) is a composition concern behind the sink.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::state::RolloutStatus;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Started,
    StageAdvanced,
    Succeeded,
    RolledBack,
    Aborted,
    /// The revert call itself failed. Manual intervention required.
    RollbackFailed,
}

/// Immutable record of a rollout transition. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutEvent {
    pub rollout_id: String,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
    pub kind: EventKind,
    pub from_status: RolloutStatus,
    pub to_status: RolloutStatus,
    pub stage_index: usize,
    pub reason: String,
}

/// Receives structured rollout events for reporting/alerting.
///
/// `publish` must not block the controller; implementations buffer or
/// drop rather than stall the tick loop.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: RolloutEvent);
}

/// Sink that logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: RolloutEvent) {
        match event.kind {
            EventKind::RollbackFailed => {
                error!(
                    rollout = %event.rollout_id,
                    stage = event.stage_index,
                    reason = %event.reason,
                    "rollback failed — manual intervention required"
                );
            }
            kind => {
                info!(
                    rollout = %event.rollout_id,
                    ?kind,
                    stage = event.stage_index,
                    from = ?event.from_status,
                    to = ?event.to_status,
                    reason = %event.reason,
                    "rollout event"
                );
            }
        }
    }
}

/// Sink that forwards events into an unbounded channel. Send failures
/// (receiver gone) are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: tokio::sync::mpsc::UnboundedSender<RolloutEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<RolloutEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, event: RolloutEvent) {
        let _ = self.tx.send(event);
    }
}

/// Sink that buffers events in memory. Handy for tests and for polling
/// readers that drain on their own schedule.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: std::sync::Mutex<Vec<RolloutEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far.
    pub fn events(&self) -> Vec<RolloutEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Remove and return the buffered events.
    pub fn drain(&self) -> Vec<RolloutEvent> {
        self.events
            .lock()
            .map(|mut e| e.drain(..).collect())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: RolloutEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollgate_metrics::sample::epoch_millis;

    fn event(kind: EventKind) -> RolloutEvent {
        RolloutEvent {
            rollout_id: "checkout-v2".to_string(),
            timestamp_ms: epoch_millis(),
            kind,
            from_status: RolloutStatus::InProgress,
            to_status: RolloutStatus::InProgress,
            stage_index: 1,
            reason: "advanced to 40%".to_string(),
        }
    }

    #[test]
    fn memory_sink_buffers_and_drains() {
        let sink = MemorySink::new();
        sink.publish(event(EventKind::Started));
        sink.publish(event(EventKind::StageAdvanced));

        assert_eq!(sink.events().len(), 2);
        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.publish(event(EventKind::Succeeded));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, EventKind::Succeeded);
    }

    #[test]
    fn channel_sink_without_receiver_is_silent() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        // Must not panic or block.
        sink.publish(event(EventKind::Aborted));
    }

    #[test]
    fn events_serialize_for_external_consumers() {
        let json = serde_json::to_string(&event(EventKind::RolledBack)).unwrap();
        assert!(json.contains("\"rolled_back\""));
        let back: RolloutEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, EventKind::RolledBack);
    }
}
