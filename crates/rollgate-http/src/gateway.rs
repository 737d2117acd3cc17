//! Traffic gateway admin client.
//!
//! Implements both actuator seams against a gateway's admin API:
//!
//! - `PUT /admin/targets/{id}/weight` with `{"weight": <0-100>}`
//! - `POST /admin/targets/{id}/rollback`
//!
//! Non-2xx answers and transport errors map onto `ShiftFailed` /
//! `RollbackFailed`; the controller decides what that means for the
//! rollout.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use tracing::{debug, warn};

use rollgate_controller::{RollbackExecutor, RollbackFailed, ShiftFailed, TrafficShifter};

use crate::client::send_request;

/// Client for a traffic gateway's admin API.
pub struct GatewayClient {
    /// Gateway admin address, host:port.
    address: String,
    timeout: Duration,
}

impl GatewayClient {
    pub fn new(address: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            timeout,
        }
    }

    async fn call(
        &self,
        method: &str,
        path: &str,
        body: Bytes,
    ) -> Result<(), String> {
        let uri = format!("http://{}{}", self.address, path);
        let req = http::Request::builder()
            .method(method)
            .uri(&uri)
            .header("host", self.address.as_str())
            .header("content-type", "application/json")
            .header("user-agent", "rollgate/0.1")
            .body(Full::new(body))
            .map_err(|e| format!("build request: {e}"))?;

        let (status, body) = send_request(&self.address, req, self.timeout).await?;
        if !status.is_success() {
            let detail = String::from_utf8_lossy(&body);
            return Err(format!("gateway returned {status}: {detail}"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl TrafficShifter for GatewayClient {
    async fn set_weight(&self, target: &str, percent: u8) -> Result<(), ShiftFailed> {
        let body = serde_json::json!({ "weight": percent }).to_string();
        let path = format!("/admin/targets/{target}/weight");

        match self.call("PUT", &path, Bytes::from(body)).await {
            Ok(()) => {
                debug!(%target, percent, "gateway weight updated");
                Ok(())
            }
            Err(e) => {
                warn!(%target, percent, error = %e, "gateway weight update failed");
                Err(ShiftFailed(e))
            }
        }
    }
}

#[async_trait::async_trait]
impl RollbackExecutor for GatewayClient {
    async fn revert(&self, target: &str) -> Result<(), RollbackFailed> {
        let path = format!("/admin/targets/{target}/rollback");

        match self.call("POST", &path, Bytes::new()).await {
            Ok(()) => {
                debug!(%target, "gateway rollback accepted");
                Ok(())
            }
            Err(e) => {
                warn!(%target, error = %e, "gateway rollback failed");
                Err(RollbackFailed(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Accept one connection and answer with a canned status line.
    async fn one_shot_server(status_line: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let response =
                    format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = stream.write_all(response.as_bytes()).await;
            }
        });

        addr
    }

    #[tokio::test]
    async fn set_weight_succeeds_on_2xx() {
        let addr = one_shot_server("HTTP/1.1 200 OK").await;
        let client = GatewayClient::new(&addr, Duration::from_secs(1));
        client.set_weight("checkout-v2", 40).await.unwrap();
    }

    #[tokio::test]
    async fn set_weight_fails_on_5xx() {
        let addr = one_shot_server("HTTP/1.1 503 Service Unavailable").await;
        let client = GatewayClient::new(&addr, Duration::from_secs(1));

        let err = client.set_weight("checkout-v2", 40).await.unwrap_err();
        let ShiftFailed(msg) = err;
        assert!(msg.contains("503"));
    }

    #[tokio::test]
    async fn revert_fails_when_gateway_unreachable() {
        let client = GatewayClient::new("127.0.0.1:1", Duration::from_millis(200));
        let err = client.revert("checkout-v2").await.unwrap_err();
        let RollbackFailed(msg) = err;
        assert!(!msg.is_empty());
    }

    #[tokio::test]
    async fn revert_succeeds_on_2xx() {
        let addr = one_shot_server("HTTP/1.1 202 Accepted").await;
        let client = GatewayClient::new(&addr, Duration::from_secs(1));
        client.revert("checkout-v2").await.unwrap();
    }
}
