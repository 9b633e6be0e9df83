use anyhow::Context as _;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

pub use yarr_test_support::{KillOnDrop, MockResponse, MockUpstream};

pub fn pick_unused_port() -> anyhow::Result<u16> {
    yarr_test_support::pick_unused_port()
}

pub async fn wait_port_open(port: u16, timeout_dur: Duration) -> anyhow::Result<()> {
    yarr_test_support::wait_port_open(port, timeout_dur).await
}

/// Adapter command with a clean environment: only `vars` are set and no `.env` file is read.
pub fn adapter_command(service: &str, vars: &[(&str, &str)]) -> Command {
    let bin = env!("CARGO_BIN_EXE_yarr-mcp-adapter");
    let mut cmd = Command::new(bin);
    cmd.env_clear()
        .arg(service)
        .arg("--env-file")
        .arg("/nonexistent/yarr-mcp-test.env")
        .arg("--log-level")
        .arg("info")
        .envs(vars.iter().copied())
        .stdout(Stdio::null());
    cmd
}

/// Start `service` on the HTTP transport at `127.0.0.1:port`.
pub fn spawn_http_adapter(service: &str, port: u16, vars: &[(&str, &str)]) -> anyhow::Result<Child> {
    adapter_command(service, vars)
        .arg("--transport")
        .arg("sse")
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg(port.to_string())
        .spawn()
        .context("spawn adapter")
}
