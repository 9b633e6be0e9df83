//! Dashboard HTTP API.

use crate::config::DashboardConfig;
use crate::docker::{DockerClient, LogOptions};
use crate::error::{DashboardError, Result};
use crate::{health, services};
use axum::extract::{Path, Query, State};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

pub struct AppState {
    pub config: DashboardConfig,
    pub docker: DockerClient,
    pub http: reqwest::Client,
}

impl AppState {
    /// # Errors
    ///
    /// Fails if the health-check HTTP client cannot be built.
    pub fn new(config: DashboardConfig) -> reqwest::Result<Self> {
        // Adapters live on the local network; never route health checks through a proxy.
        let http = reqwest::Client::builder()
            .timeout(config.health_timeout())
            .no_proxy()
            .build()?;
        let docker = DockerClient::new(config.docker_socket.clone());
        Ok(Self {
            config,
            docker,
            http,
        })
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/api/mcp-services", get(list_services))
        .route("/api/logs/yarr-mcp", get(container_logs))
        .route("/api/health-check/{service}/{port}", get(health_check))
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "message": "Welcome to the Yarr-MCP WebUI Backend!" }))
}

async fn list_services(State(state): State<Arc<AppState>>) -> Result<Json<Vec<services::McpService>>> {
    services::load(&state.config.env_file).map(Json)
}

#[derive(Debug, Deserialize)]
struct LogParams {
    tail: Option<String>,
    since: Option<String>,
}

async fn container_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogParams>,
) -> Result<Json<serde_json::Value>> {
    let opts = LogOptions {
        tail: parse_tail(params.tail.as_deref())?,
        since: params.since.as_deref().map(parse_since).transpose()?,
    };
    let container = &state.config.log_container;
    let logs = state
        .docker
        .container_logs(container, &opts)
        .await
        .inspect_err(|e| warn!(container = %container, error = %e, "log fetch failed"))?;
    Ok(Json(json!({ "container_name": container, "logs": logs })))
}

async fn health_check(
    State(state): State<Arc<AppState>>,
    Path((service, port)): Path<(String, u16)>,
) -> Response {
    if !health::valid_service(&service) {
        return DashboardError::InvalidInput(format!("invalid service name '{service}'"))
            .into_response();
    }
    let (status, body) =
        health::check(&state.http, &service, port, state.config.health_timeout()).await;
    (status, Json(body)).into_response()
}

/// `all` or a line count; defaults to 100.
fn parse_tail(raw: Option<&str>) -> Result<String> {
    match raw.map(str::trim) {
        None | Some("") => Ok("100".to_string()),
        Some("all") => Ok("all".to_string()),
        Some(n) => n
            .parse::<u32>()
            .map(|n| n.to_string())
            .map_err(|_| DashboardError::InvalidInput(format!("tail must be 'all' or a line count, got '{n}'"))),
    }
}

/// Unix seconds, an RFC 3339 timestamp, or a relative age such as `10m`.
fn parse_since(raw: &str) -> Result<i64> {
    parse_since_at(raw, Utc::now().timestamp())
}

fn parse_since_at(raw: &str, now: i64) -> Result<i64> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<i64>() {
        return Ok(secs);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.timestamp());
    }
    relative_age(raw)
        .map(|age| now.saturating_sub(age))
        .ok_or_else(|| {
            DashboardError::InvalidInput(format!(
                "since must be unix seconds, RFC 3339 or an age like '10m', got '{raw}'"
            ))
        })
}

/// `<n>s`, `<n>m`, `<n>h` or `<n>d` in seconds.
fn relative_age(raw: &str) -> Option<i64> {
    let unit = raw.chars().last()?;
    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        _ => return None,
    };
    let count: i64 = raw[..raw.len() - 1].parse().ok().filter(|n| *n >= 0)?;
    count.checked_mul(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    #[test]
    fn tail_defaults_and_validates() {
        assert_eq!(parse_tail(None).expect("default"), "100");
        assert_eq!(parse_tail(Some("all")).expect("all"), "all");
        assert_eq!(parse_tail(Some("25")).expect("n"), "25");
        assert!(parse_tail(Some("-1")).is_err());
    }

    #[test]
    fn since_accepts_absolute_forms() {
        assert_eq!(parse_since("1760000000").expect("unix"), 1_760_000_000);
        assert_eq!(
            parse_since("2026-10-18T00:00:00Z").expect("rfc3339"),
            1_792_281_600
        );
    }

    #[test]
    fn since_accepts_relative_ages() {
        let now = 1_792_281_600;
        assert_eq!(parse_since_at("30s", now).expect("s"), now - 30);
        assert_eq!(parse_since_at("10m", now).expect("m"), now - 600);
        assert_eq!(parse_since_at("2h", now).expect("h"), now - 7_200);
        assert_eq!(parse_since_at("1d", now).expect("d"), now - 86_400);
        for bad in ["10w", "m", "-5m", "ten minutes"] {
            assert!(
                matches!(parse_since_at(bad, now), Err(DashboardError::InvalidInput(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn router_builds_with_every_route() {
        let config = DashboardConfig::try_parse_from(["yarr-mcp-dashboard"]).expect("config");
        let state = Arc::new(AppState::new(config).expect("state"));
        let _router: Router = create_router(state);
    }
}
