//! One-shot HTTP/1.1 request helper.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use tracing::debug;

/// Send `req` to `address` over a fresh connection, bounded by
/// `timeout`. Returns the status and collected body, or a description
/// of what went wrong.
pub(crate) async fn send_request(
    address: &str,
    req: http::Request<Full<Bytes>>,
    timeout: Duration,
) -> Result<(http::StatusCode, Bytes), String> {
    let uri = req.uri().to_string();

    let result = tokio::time::timeout(timeout, async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| format!("connect {address}: {e}"))?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| format!("handshake {address}: {e}"))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| format!("request {uri}: {e}"))?;

        let status = resp.status();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| format!("body {uri}: {e}"))?
            .to_bytes();

        Ok::<_, String>((status, body))
    })
    .await;

    match result {
        Ok(inner) => inner,
        Err(_) => {
            debug!(%address, "http request timed out");
            Err(format!("request to {address} timed out"))
        }
    }
}

/// Percent-encode a query-string value.
pub(crate) fn encode_query_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            other => {
                out.push('%');
                out.push_str(&format!("{other:02X}"));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_reserved_characters() {
        assert_eq!(encode_query_value("up"), "up");
        assert_eq!(
            encode_query_value("rate(errors[1m])"),
            "rate%28errors%5B1m%5D%29"
        );
        assert_eq!(encode_query_value("a b"), "a%20b");
        assert_eq!(encode_query_value("code=~\"5..\""), "code%3D~%225..%22");
    }

    #[tokio::test]
    async fn closed_port_reports_connect_error() {
        let req = http::Request::builder()
            .method("GET")
            .uri("http://127.0.0.1:1/")
            .header("host", "127.0.0.1:1")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let err = send_request("127.0.0.1:1", req, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.contains("connect") || err.contains("timed out"));
    }
}
