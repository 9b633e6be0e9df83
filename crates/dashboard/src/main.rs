//! Yarr MCP dashboard backend binary.

use anyhow::Context as _;
use clap::Parser;
use std::io::{IsTerminal as _, stderr};
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};
use yarr_mcp_dashboard::{AppState, DashboardConfig, create_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Values from the env file feed clap's `env` fallbacks.
    let env_file = std::env::var("DASHBOARD_ENV_FILE").unwrap_or_else(|_| ".env".to_string());
    if let Err(e) = dotenvy::from_path(&env_file)
        && !e.not_found()
    {
        return Err(e).with_context(|| format!("read env file {env_file}"));
    }

    let config = DashboardConfig::parse();
    init_logging(&config.log_level);

    let addr = config.bind;
    tracing::info!(
        %addr,
        env_file = %config.env_file.display(),
        docker_socket = %config.docker_socket.display(),
        "Starting Yarr MCP dashboard backend"
    );

    let state = Arc::new(AppState::new(config).context("build HTTP client")?);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    tracing::info!("Dashboard shut down gracefully");
    Ok(())
}

fn init_logging(log_level: &str) {
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let console = if stderr().is_terminal() {
        tracing_subscriber::fmt::layer()
            .with_writer(stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(stderr)
            .boxed()
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
