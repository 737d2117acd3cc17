//! rollgate-metrics — health readings for a deployment target.
//!
//! A [`MetricSample`] is a point-in-time reading of one metric. Samples
//! are held in a [`MetricWindow`], a time-ordered buffer bounded by the
//! evaluation span; readings older than the span are dropped. Samples
//! are pulled through the [`MetricsSource`] interface, behind which any
//! collector (Prometheus, a model-based classifier, a test script) can
//! sit without the state machine knowing.

pub mod sample;
pub mod source;
pub mod window;

pub use sample::MetricSample;
pub use source::{MetricsSource, SourceUnavailable};
pub use window::MetricWindow;
