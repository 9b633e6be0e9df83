//! HTTP front-end: `/health` plus rmcp's streamable HTTP transport at `/mcp`.

use crate::server::AdapterServer;
use crate::services::ServiceAdapter;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::{StreamableHttpServerConfig, StreamableHttpService};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct AppState {
    pub adapter: Arc<dyn ServiceAdapter>,
}

/// Auxiliary endpoints (currently only `/health`).
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

/// `/health` merged with the MCP endpoint. `ct` stops open SSE streams on shutdown.
pub fn app(adapter: Arc<dyn ServiceAdapter>, ct: &CancellationToken) -> Router {
    let mcp = build_streamable_http_service(adapter.clone(), ct);
    create_router(Arc::new(AppState { adapter })).nest_service("/mcp", mcp)
}

fn build_streamable_http_service(
    adapter: Arc<dyn ServiceAdapter>,
    ct: &CancellationToken,
) -> StreamableHttpService<AdapterServer, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(AdapterServer::new(adapter.clone())),
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig {
            stateful_mode: true,
            sse_keep_alive: Some(Duration::from_secs(15)),
            sse_retry: None,
            cancellation_token: ct.child_token(),
        },
    )
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.adapter.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "service_accessible": true })),
        ),
        Err(e) => {
            warn!(
                service = state.adapter.service().name(),
                kind = e.kind(),
                error = %e,
                "health check failed"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "error",
                    "service_accessible": false,
                    "reason": e.to_string(),
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::prowlarr::Prowlarr;
    use yarr_http_tools::{AuthStyle, UpstreamClient, UpstreamConfig};
    use yarr_test_support::{MockResponse, MockUpstream};

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn prowlarr(base_url: &str, key: Option<&str>) -> Arc<dyn ServiceAdapter> {
        let client = UpstreamClient::new(
            UpstreamConfig::new(format!("{base_url}/api/v1"), AuthStyle::Header("X-Api-Key".into()))
                .credential(key.map(str::to_string)),
        )
        .expect("client");
        Arc::new(Prowlarr::new(client))
    }

    #[tokio::test]
    async fn health_reports_reachable_upstream() {
        let upstream = MockUpstream::start(vec![MockResponse::json(200, &json!({"version": "1.20"}))])
            .await
            .expect("mock");
        let base = serve(create_router(Arc::new(AppState {
            adapter: prowlarr(upstream.base_url(), Some("k")),
        })))
        .await;

        let resp = reqwest::get(format!("{base}/health")).await.expect("get");
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.expect("json");
        assert_eq!(body, json!({"status": "ok", "service_accessible": true}));
        assert_eq!(upstream.requests()[0].path, "/api/v1/system/status");
    }

    #[tokio::test]
    async fn health_is_503_when_the_check_fails() {
        let upstream = MockUpstream::start(vec![MockResponse::json(401, &json!({"error": "Unauthorized"}))])
            .await
            .expect("mock");
        let base = serve(create_router(Arc::new(AppState {
            adapter: prowlarr(upstream.base_url(), Some("bad")),
        })))
        .await;

        let resp = reqwest::get(format!("{base}/health")).await.expect("get");
        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = resp.json().await.expect("json");
        assert_eq!(body["status"], "error");
        assert_eq!(body["service_accessible"], false);
        assert!(body["reason"].as_str().expect("reason").contains("401"));
    }
}
