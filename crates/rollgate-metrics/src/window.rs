//! Time-bounded sample window for one metric.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::sample::MetricSample;

/// An ordered-by-time sequence of samples for one metric, bounded by
/// the evaluation span. Samples older than `span` relative to the
/// newest known time are dropped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricWindow {
    name: String,
    span: Duration,
    samples: VecDeque<MetricSample>,
}

impl MetricWindow {
    pub fn new(name: &str, span: Duration) -> Self {
        Self {
            name: name.to_string(),
            span,
            samples: VecDeque::new(),
        }
    }

    /// Metric this window tracks.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Insert a sample, keeping the window time-ordered, then drop
    /// everything that fell out of the span. Samples for other metrics
    /// are ignored.
    pub fn push(&mut self, sample: MetricSample) {
        if sample.name != self.name {
            return;
        }
        // Collectors deliver in order almost always; walk back only
        // when they don't.
        let pos = self
            .samples
            .iter()
            .rposition(|s| s.timestamp_ms <= sample.timestamp_ms)
            .map(|p| p + 1)
            .unwrap_or(0);
        self.samples.insert(pos, sample);
        self.prune_to_newest();
    }

    /// Extend with a batch of samples (a fetch result).
    pub fn extend(&mut self, samples: Vec<MetricSample>) {
        for sample in samples {
            self.push(sample);
        }
    }

    /// Drop samples older than the span relative to `now_ms`. Used by
    /// the evaluation loop so a stalled collector cannot keep stale
    /// readings alive forever.
    pub fn prune(&mut self, now_ms: u64) {
        let cutoff = now_ms.saturating_sub(self.span.as_millis() as u64);
        while let Some(front) = self.samples.front() {
            if front.timestamp_ms < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn prune_to_newest(&mut self) {
        if let Some(newest) = self.samples.back().map(|s| s.timestamp_ms) {
            self.prune(newest);
        }
    }

    /// Most recent sample, if any.
    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    /// Mean value over the window, if any samples exist.
    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.value).sum();
        Some(sum / self.samples.len() as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Samples oldest-first.
    pub fn samples(&self) -> impl Iterator<Item = &MetricSample> {
        self.samples.iter()
    }
}
