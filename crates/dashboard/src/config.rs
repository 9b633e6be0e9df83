//! Dashboard configuration from CLI flags and environment.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "yarr-mcp-dashboard", version, about = "Yarr MCP dashboard backend")]
pub struct DashboardConfig {
    /// Shared `.env` listing the adapters
    #[arg(long, env = "DASHBOARD_ENV_FILE", default_value = ".env")]
    pub env_file: PathBuf,

    #[arg(long, env = "DASHBOARD_BIND", default_value = "0.0.0.0:8081")]
    pub bind: SocketAddr,

    #[arg(long, env = "DOCKER_SOCKET", default_value = "/var/run/docker.sock")]
    pub docker_socket: PathBuf,

    /// Container whose logs `/api/logs/yarr-mcp` returns
    #[arg(long, env = "DASHBOARD_LOG_CONTAINER", default_value = "yarr-mcp")]
    pub log_container: String,

    /// Allowed browser origin (repeatable)
    #[arg(
        long = "cors-origin",
        default_values_t = [
            "http://localhost:5173".to_string(),
            "http://127.0.0.1:5173".to_string(),
        ]
    )]
    pub cors_origins: Vec<String>,

    /// Adapter health check timeout in milliseconds
    #[arg(long, env = "DASHBOARD_HEALTH_TIMEOUT_MS", default_value_t = 5000)]
    pub health_timeout_ms: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl DashboardConfig {
    #[must_use]
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }
}
