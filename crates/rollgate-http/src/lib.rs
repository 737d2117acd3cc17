//! rollgate-http — HTTP implementations of the collaborator seams.
//!
//! - [`PromMetricsSource`] — pulls instant-query results from a
//!   Prometheus-compatible collector.
//! - [`GatewayClient`] — drives a traffic gateway's admin API for
//!   weight changes and rollbacks.
//!
//! All calls are plain HTTP/1.1 over a fresh connection with a bounded
//! timeout; failures map onto the transient error of each interface so
//! the controller can degrade gracefully.

mod client;
pub mod gateway;
pub mod prom;

pub use gateway::GatewayClient;
pub use prom::PromMetricsSource;
