mod common;

use anyhow::Context as _;
use common::{MockResponse, MockUpstream, adapter_command};
use serde_json::json;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader};

async fn read_reply<R>(lines: &mut tokio::io::Lines<R>, id: u64) -> anyhow::Result<serde_json::Value>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
            .await
            .context("timeout waiting for stdout")??
            .context("adapter closed stdout")?;
        let msg: serde_json::Value = serde_json::from_str(&line)?;
        if msg.get("id") == Some(&json!(id)) {
            return Ok(msg);
        }
    }
}

#[tokio::test]
async fn stdio_transport_serves_tools_until_stdin_closes() -> anyhow::Result<()> {
    let upstream = MockUpstream::start(vec![MockResponse::json(
        200,
        &json!([{"id": 1, "name": "NZBgeek", "enable": true, "protocol": "usenet", "priority": 25}]),
    )])
    .await?;

    let std_cmd = adapter_command(
        "prowlarr",
        &[
            ("PROWLARR_URL", upstream.base_url()),
            ("PROWLARR_API_KEY", "key"),
        ],
    );
    let mut cmd = tokio::process::Command::from(std_cmd);
    cmd.arg("--transport")
        .arg("stdio")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    let mut child = cmd.spawn().context("spawn adapter")?;

    let mut stdin = child.stdin.take().context("stdin")?;
    let mut lines = BufReader::new(child.stdout.take().context("stdout")?).lines();

    let send = |msg: serde_json::Value| format!("{msg}\n");
    stdin
        .write_all(
            send(json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "yarr-stdio-test", "version": "0"}
                }
            }))
            .as_bytes(),
        )
        .await?;
    let init = read_reply(&mut lines, 0).await?;
    assert_eq!(init.pointer("/result/serverInfo/name"), Some(&json!("yarr-mcp-prowlarr")));

    stdin
        .write_all(send(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).as_bytes())
        .await?;
    stdin
        .write_all(
            send(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/call",
                "params": {"name": "list_indexers", "arguments": {}}
            }))
            .as_bytes(),
        )
        .await?;
    let called = read_reply(&mut lines, 1).await?;
    assert_ne!(called.pointer("/result/isError"), Some(&json!(true)), "{called}");
    assert_eq!(upstream.requests()[0].path, "/api/v1/indexer");
    assert_eq!(upstream.requests()[0].header("x-api-key"), Some("key"));

    drop(stdin);
    let status = tokio::time::timeout(Duration::from_secs(10), child.wait())
        .await
        .context("adapter did not exit after stdin closed")??;
    assert!(status.success(), "exit status {status}");
    Ok(())
}
