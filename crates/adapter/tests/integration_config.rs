mod common;

use common::adapter_command;
use std::process::Stdio;

#[test]
fn missing_required_credential_fails_startup() -> anyhow::Result<()> {
    let output = adapter_command("prowlarr", &[("PROWLARR_URL", "http://127.0.0.1:9696")])
        .stderr(Stdio::piped())
        .output()?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("PROWLARR_API_KEY"), "stderr: {stderr}");
    Ok(())
}

#[test]
fn unknown_transport_is_rejected() -> anyhow::Result<()> {
    let output = adapter_command(
        "gotify",
        &[
            ("GOTIFY_URL", "http://127.0.0.1:8080"),
            ("GOTIFY_MCP_TRANSPORT", "carrier-pigeon"),
        ],
    )
    .stderr(Stdio::piped())
    .output()?;

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("GOTIFY_MCP_TRANSPORT"), "stderr: {stderr}");
    Ok(())
}
