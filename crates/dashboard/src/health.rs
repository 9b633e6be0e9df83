//! Liveness check for an adapter's MCP endpoint: one `initialize` over streamable HTTP.

use axum::http::StatusCode;
use serde_json::{Value, json};
use std::error::Error as _;
use std::time::Duration;
use tracing::{debug, warn};

const CLIENT_NAME: &str = "yarr-mcp-dashboard";
const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckFailure {
    Timeout,
    ConnectionRefused,
    Other(String),
}

impl CheckFailure {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ConnectionRefused => StatusCode::SERVICE_UNAVAILABLE,
            Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Timeout => "timeout".to_string(),
            Self::ConnectionRefused => "connection refused".to_string(),
            Self::Other(e) => e.clone(),
        }
    }
}

impl From<reqwest::Error> for CheckFailure {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if is_connection_refused(&e) {
            Self::ConnectionRefused
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Walk the source chain looking for an `ECONNREFUSED`.
fn is_connection_refused(e: &reqwest::Error) -> bool {
    if !e.is_connect() {
        return false;
    }
    let mut source = e.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            return io.kind() == std::io::ErrorKind::ConnectionRefused;
        }
        if err.to_string().to_ascii_lowercase().contains("connection refused") {
            return true;
        }
        source = err.source();
    }
    false
}

/// Host names accepted in the health-check path.
#[must_use]
pub fn valid_service(service: &str) -> bool {
    !service.is_empty()
        && service
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Check `http://{service}:{port}/mcp` and render the dashboard's reply.
pub async fn check(
    client: &reqwest::Client,
    service: &str,
    port: u16,
    timeout: Duration,
) -> (StatusCode, Value) {
    let url = format!("http://{service}:{port}/mcp");
    let outcome = match tokio::time::timeout(timeout, initialize(client, &url)).await {
        Ok(result) => result,
        Err(_) => Err(CheckFailure::Timeout),
    };

    match outcome {
        Ok(server_info) => {
            debug!(service, port, "adapter responsive");
            (
                StatusCode::OK,
                json!({
                    "service": service,
                    "port": port,
                    "mcp_service_responsive": true,
                    "server_info": server_info,
                }),
            )
        }
        Err(failure) => {
            warn!(service, port, reason = %failure.reason(), "adapter health check failed");
            (
                failure.status(),
                json!({
                    "service": service,
                    "port": port,
                    "mcp_service_responsive": false,
                    "reason": failure.reason(),
                }),
            )
        }
    }
}

async fn initialize(client: &reqwest::Client, url: &str) -> Result<Value, CheckFailure> {
    let request = json!({
        "jsonrpc": "2.0",
        "id": 0,
        "method": "initialize",
        "params": {
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") }
        }
    });

    let resp = client
        .post(url)
        .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
        .json(&request)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(CheckFailure::Other(format!("HTTP {status} from {url}")));
    }
    let session = resp
        .headers()
        .get("Mcp-Session-Id")
        .and_then(|h| h.to_str().ok())
        .map(str::to_string);

    let message = first_message(resp).await?;

    if let Some(id) = session {
        close_session(client, url, &id).await;
    }

    if let Some(error) = message.get("error") {
        return Err(CheckFailure::Other(format!("MCP error: {error}")));
    }
    Ok(message
        .pointer("/result/serverInfo")
        .cloned()
        .unwrap_or(Value::Null))
}

/// Best-effort `DELETE` of the session `initialize` opened. Returns whether the adapter accepted it.
async fn close_session(client: &reqwest::Client, url: &str, session: &str) -> bool {
    match client.delete(url).header("Mcp-Session-Id", session).send().await {
        Ok(resp) if resp.status().is_success() => true,
        Ok(resp) => {
            debug!(url, status = %resp.status(), "adapter did not close the health-check session");
            false
        }
        Err(e) => {
            debug!(url, error = %e, "closing the health-check session failed");
            false
        }
    }
}

/// First JSON-RPC message of a plain JSON or `text/event-stream` body.
async fn first_message(mut resp: reqwest::Response) -> Result<Value, CheckFailure> {
    let event_stream = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));
    if !event_stream {
        return resp
            .json()
            .await
            .map_err(|e| CheckFailure::Other(format!("invalid JSON reply: {e}")));
    }

    let mut buf = String::new();
    while let Some(chunk) = resp.chunk().await? {
        buf.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(pos) = buf.find('\n') {
            let line: String = buf.drain(..=pos).collect();
            if let Some(data) = line.trim_end().strip_prefix("data:")
                && let Ok(msg) = serde_json::from_str::<Value>(data.trim())
            {
                return Ok(msg);
            }
        }
    }
    Err(CheckFailure::Other(
        "event stream ended without a message".to_string(),
    ))
}
