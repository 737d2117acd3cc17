//! Prometheus-compatible metrics source.
//!
//! Issues instant queries (`GET /api/v1/query`) and maps the first
//! result of each query onto a [`MetricSample`]. Any transport or
//! payload problem becomes [`SourceUnavailable`], which the controller
//! treats as missing data for the tick.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use tracing::debug;

use rollgate_metrics::{MetricSample, MetricsSource, SourceUnavailable};

use crate::client::{encode_query_value, send_request};

/// Metrics source backed by a Prometheus-compatible HTTP API.
pub struct PromMetricsSource {
    /// Collector address, host:port.
    address: String,
    /// PromQL query per tracked metric. A metric without an entry is
    /// queried by its own name.
    queries: HashMap<String, String>,
    timeout: Duration,
}

impl PromMetricsSource {
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            queries: HashMap::new(),
            timeout,
        }
    }

    /// Map a tracked metric onto a PromQL expression.
    pub fn with_query(mut self, metric: &str, query: &str) -> Self {
        self.queries.insert(metric.to_string(), query.to_string());
        self
    }

    fn query_for<'a>(&'a self, metric: &'a str) -> &'a str {
        self.queries.get(metric).map(String::as_str).unwrap_or(metric)
    }
}

#[async_trait::async_trait]
impl MetricsSource for PromMetricsSource {
    async fn fetch(
        &self,
        metric: &str,
        _window: Duration,
    ) -> Result<Vec<MetricSample>, SourceUnavailable> {
        let query = self.query_for(metric);
        let path = format!("/api/v1/query?query={}", encode_query_value(query));
        let uri = format!("http://{}{}", self.address, path);

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", self.address.as_str())
            .header("user-agent", "rollgate/0.1")
            .body(Full::new(Bytes::new()))
            .map_err(|e| SourceUnavailable(format!("build request: {e}")))?;

        let (status, body) = send_request(&self.address, req, self.timeout)
            .await
            .map_err(SourceUnavailable)?;

        if !status.is_success() {
            return Err(SourceUnavailable(format!(
                "collector returned {status} for {metric}"
            )));
        }

        let samples = parse_instant_query(metric, &body)
            .map_err(|e| SourceUnavailable(format!("parse {metric}: {e}")))?;
        debug!(%metric, samples = samples.len(), "prometheus query answered");
        Ok(samples)
    }
}

/// Parse a Prometheus instant-query response into samples.
///
/// Response shape:
/// `{"status":"success","data":{"result":[{"value":[<unix secs>, "<value>"]}]}}`
fn parse_instant_query(metric: &str, body: &[u8]) -> Result<Vec<MetricSample>, String> {
    let json: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| format!("invalid json: {e}"))?;

    if json.get("status").and_then(|s| s.as_str()) != Some("success") {
        return Err("query status was not success".to_string());
    }

    let results = json
        .get("data")
        .and_then(|d| d.get("result"))
        .and_then(|r| r.as_array())
        .ok_or("missing data.result")?;

    let mut samples = Vec::new();
    for result in results {
        let Some(value) = result.get("value").and_then(|v| v.as_array()) else {
            continue;
        };
        let (Some(ts), Some(raw)) = (
            value.first().and_then(|t| t.as_f64()),
            value.get(1).and_then(|v| v.as_str()),
        ) else {
            continue;
        };
        let parsed: f64 = raw
            .parse()
            .map_err(|e| format!("non-numeric sample {raw:?}: {e}"))?;
        samples.push(MetricSample::new(metric, parsed, (ts * 1000.0) as u64));
    }

    Ok(samples)
}
