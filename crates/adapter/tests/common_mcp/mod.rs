use anyhow::Context as _;
use futures::TryStreamExt as _;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncBufReadExt as _;
use tokio_util::io::StreamReader;

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Test-only MCP client for an adapter's `/mcp` endpoint.
pub struct McpClient {
    http: reqwest::Client,
    endpoint: String,
    session: String,
    next_id: AtomicU64,
    timeout: Duration,
}

impl McpClient {
    /// `initialize` + `notifications/initialized` against `endpoint` (the full `/mcp` URL).
    pub async fn connect(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::new();
        let init = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "yarr-mcp-adapter-tests", "version": "0" }
            }
        });
        let resp = send(&http, endpoint, None, &init).await?;
        let session = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|h| h.to_str().ok())
            .context("initialize reply has no session id")?
            .to_string();
        let reply = tokio::time::timeout(timeout, first_sse_message(resp))
            .await
            .context("timeout waiting for initialize")??;
        anyhow::ensure!(reply.get("result").is_some(), "initialize failed: {reply}");

        let ack = send(
            &http,
            endpoint,
            Some(&session),
            &json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .await?;
        anyhow::ensure!(ack.status() == 202, "initialized notification got {}", ack.status());

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            session,
            next_id: AtomicU64::new(1),
            timeout,
        })
    }

    /// One JSON-RPC request; returns the whole reply message.
    pub async fn rpc(&self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let resp = send(&self.http, &self.endpoint, Some(&self.session), &body).await?;
        let reply = tokio::time::timeout(self.timeout, first_sse_message(resp))
            .await
            .with_context(|| format!("timeout waiting for {method}"))??;
        anyhow::ensure!(reply.get("id") == Some(&json!(id)), "reply id mismatch: {reply}");
        Ok(reply)
    }

    pub async fn tool_names(&self) -> anyhow::Result<Vec<String>> {
        let reply = self.rpc("tools/list", json!({})).await?;
        let tools = reply
            .pointer("/result/tools")
            .and_then(Value::as_array)
            .context("tools/list has no result.tools")?;
        Ok(tools
            .iter()
            .filter_map(|t| t["name"].as_str().map(str::to_string))
            .collect())
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> anyhow::Result<ToolReply> {
        let reply = self
            .rpc("tools/call", json!({"name": name, "arguments": arguments}))
            .await?;
        let result = reply.get("result").with_context(|| format!("tools/call failed: {reply}"))?;
        let text = result
            .pointer("/content/0/text")
            .and_then(Value::as_str)
            .context("tools/call result has no text content")?;
        Ok(ToolReply {
            is_error: result.get("isError") == Some(&Value::Bool(true)),
            body: serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        })
    }
}

/// A rendered tool result: text content parsed as JSON when it is JSON.
#[derive(Debug)]
pub struct ToolReply {
    pub is_error: bool,
    pub body: Value,
}

async fn send(
    http: &reqwest::Client,
    endpoint: &str,
    session: Option<&str>,
    body: &Value,
) -> anyhow::Result<reqwest::Response> {
    let mut req = http
        .post(endpoint)
        .header("Accept", "application/json, text/event-stream")
        .json(body);
    if let Some(session) = session {
        req = req.header(SESSION_HEADER, session);
    }
    let resp = req.send().await.context("POST /mcp")?;
    resp.error_for_status().context("POST /mcp status")
}

/// First `data:` event of an SSE reply, parsed as JSON.
async fn first_sse_message(resp: reqwest::Response) -> anyhow::Result<Value> {
    let bytes = resp.bytes_stream().map_err(std::io::Error::other);
    let mut lines = tokio::io::BufReader::new(StreamReader::new(bytes)).lines();

    let mut data = String::new();
    while let Some(line) = lines.next_line().await? {
        match line.trim_end() {
            "" if data.is_empty() => {}
            "" => return serde_json::from_str(&data).context("SSE data is not JSON"),
            l => {
                if let Some(chunk) = l.strip_prefix("data:") {
                    data.push_str(chunk.trim_start());
                }
            }
        }
    }
    anyhow::bail!("SSE stream ended before a message")
}
