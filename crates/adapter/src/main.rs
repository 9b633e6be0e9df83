//! Yarr MCP Adapter
//!
//! `yarr-mcp-adapter <service>` serves one upstream over stdio or streamable HTTP.

use anyhow::Context as _;
use clap::Parser;
use rmcp::ServiceExt as _;
use std::fs::OpenOptions;
use std::io::{IsTerminal as _, stderr};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Mutex;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};
use url::Url;
use yarr_http_tools::redact::redact_url;
use yarr_mcp_adapter::{AdapterServer, CliArgs, ServiceConfig, Transport, build, http};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliArgs::parse();
    let config = ServiceConfig::load(&cli)?;

    init_logging(&config.log_level, config.log_file.as_deref())?;

    let service = config.service.name();
    let upstream = Url::parse(&config.base_url)
        .map_or_else(|_| "<unparseable>".to_string(), |u| redact_url(&u));
    tracing::info!(
        service,
        version = VERSION,
        upstream = %upstream,
        transport = ?config.transport,
        "Starting Yarr MCP Adapter"
    );

    let ct = CancellationToken::new();
    let adapter = build(&config, ct.clone())?;
    tracing::info!(service, tools = adapter.tools().len(), "tool registry loaded");

    match config.transport {
        Transport::Stdio => {
            let running = AdapterServer::new(adapter)
                .serve(rmcp::transport::stdio())
                .await
                .context("start stdio transport")?;
            tokio::select! {
                quit = running.waiting() => {
                    quit.context("stdio transport")?;
                    tracing::info!("stdio peer closed");
                }
                () = shutdown_signal() => {}
            }
            ct.cancel();
        }
        Transport::Sse => {
            let addr: SocketAddr = config
                .bind_addr()
                .parse()
                .with_context(|| format!("invalid bind address '{}'", config.bind_addr()))?;
            let app = http::app(adapter, &ct);

            tracing::info!(%addr, "Starting HTTP server (MCP + health)");
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind {addr}"))?;

            let ct_signal = ct.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                ct_signal.cancel();
            });

            let ct_serve = ct.clone();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { ct_serve.cancelled().await })
                .await
                .context("http server")?;
        }
    }

    tracing::info!(service, "Adapter shut down gracefully");
    Ok(())
}

/// Console logging on stderr (stdout belongs to the stdio transport), plus an optional plain
/// text file.
fn init_logging(log_level: &str, log_file: Option<&Path>) -> anyhow::Result<()> {
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

    let file = match log_file {
        Some(path) => {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(f))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .init();
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
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
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}
