//! Docker Engine API client over the local unix socket.
//!
//! One HTTP/1 connection per call; the dashboard only ever issues a couple of GETs per request.

use crate::error::{DashboardError, Result};
use http_body_util::{BodyExt as _, Empty};
use hyper::body::Bytes;
use hyper::client::conn::http1;
use hyper::{Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UnixStream;
use tracing::debug;
use url::form_urlencoded;
use yarr_http_tools::docker_stream;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for [`DockerClient::container_logs`].
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Line count or `all`
    pub tail: String,
    /// Unix seconds
    pub since: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    socket: PathBuf,
    timeout: Duration,
}

impl DockerClient {
    pub fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Combined stdout/stderr of `container` with timestamps, frame headers stripped.
    ///
    /// # Errors
    ///
    /// [`DashboardError::ContainerNotFound`] on a 404, [`DashboardError::Docker`] for anything
    /// else that goes wrong.
    pub async fn container_logs(&self, container: &str, opts: &LogOptions) -> Result<String> {
        let inspect = self.get_json(&format!("/containers/{container}/json"), container).await?;
        let tty = inspect
            .pointer("/Config/Tty")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // `Serializer` is not `Send`; finish it before the next await.
        let query = {
            let mut query = form_urlencoded::Serializer::new(String::new());
            query
                .append_pair("stdout", "1")
                .append_pair("stderr", "1")
                .append_pair("timestamps", "1")
                .append_pair("tail", &opts.tail);
            if let Some(since) = opts.since {
                query.append_pair("since", &since.to_string());
            }
            query.finish()
        };
        let path = format!("/containers/{container}/logs?{query}");

        let (status, body) = self.get(&path).await?;
        check_status(status, &body, container)?;
        Ok(if tty {
            String::from_utf8_lossy(&body).into_owned()
        } else {
            docker_stream::demux(&body)
        })
    }

    async fn get_json(&self, path: &str, container: &str) -> Result<Value> {
        let (status, body) = self.get(path).await?;
        check_status(status, &body, container)?;
        serde_json::from_slice(&body)
            .map_err(|e| DashboardError::Docker(format!("invalid JSON from {path}: {e}")))
    }

    async fn get(&self, path: &str) -> Result<(StatusCode, Bytes)> {
        tokio::time::timeout(self.timeout, self.get_inner(path))
            .await
            .map_err(|_| {
                DashboardError::Docker(format!("no answer from Docker within {:?}", self.timeout))
            })?
    }

    async fn get_inner(&self, path: &str) -> Result<(StatusCode, Bytes)> {
        debug!(socket = %self.socket.display(), path, "docker request");
        let stream = UnixStream::connect(&self.socket).await.map_err(|e| {
            DashboardError::Docker(format!("cannot connect to {}: {e}", self.socket.display()))
        })?;
        let (mut sender, conn) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(docker_err)?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "docker connection closed with error");
            }
        });

        let request = Request::get(path)
            .header(hyper::header::HOST, "docker")
            .body(Empty::<Bytes>::new())
            .map_err(docker_err)?;
        let response = sender.send_request(request).await.map_err(docker_err)?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(docker_err)?
            .to_bytes();
        Ok((status, body))
    }
}

fn docker_err(e: impl std::fmt::Display) -> DashboardError {
    DashboardError::Docker(e.to_string())
}

/// Engine API errors carry `{"message": "..."}`.
fn check_status(status: StatusCode, body: &[u8], container: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    if status == StatusCode::NOT_FOUND {
        return Err(DashboardError::ContainerNotFound(container.to_string()));
    }
    let message = serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    Err(DashboardError::Docker(format!("{status}: {message}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, RawQuery};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn frame(stream: u8, payload: &str) -> Vec<u8> {
        let mut out = vec![stream, 0, 0, 0];
        out.extend_from_slice(&u32::try_from(payload.len()).expect("len").to_be_bytes());
        out.extend_from_slice(payload.as_bytes());
        out
    }

    fn socket_path() -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        std::env::temp_dir().join(format!(
            "yarr-dashboard-docker-{}-{}.sock",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ))
    }

    /// Fake Engine API: one container `yarr-mcp`, `tty` chooses the log format.
    async fn fake_docker(tty: bool) -> (PathBuf, Arc<Mutex<Option<String>>>) {
        let last_query = Arc::new(Mutex::new(None));
        let seen = last_query.clone();
        let router = Router::new()
            .route(
                "/containers/{name}/json",
                get(move |Path(name): Path<String>| async move {
                    if name == "yarr-mcp" {
                        Json(json!({"Name": "/yarr-mcp", "Config": {"Tty": tty}})).into_response()
                    } else {
                        (
                            axum::http::StatusCode::NOT_FOUND,
                            Json(json!({"message": format!("No such container: {name}")})),
                        )
                            .into_response()
                    }
                }),
            )
            .route(
                "/containers/{name}/logs",
                get(move |RawQuery(q): RawQuery| async move {
                    *seen.lock().expect("lock") = q;
                    let body = if tty {
                        b"2026-10-18T09:00:00Z tty line\n".to_vec()
                    } else {
                        let mut b = frame(1, "2026-10-18T09:00:00Z out\n");
                        b.extend(frame(2, "2026-10-18T09:00:01Z err\n"));
                        b
                    };
                    body.into_response()
                }),
            );

        let path = socket_path();
        let _ = std::fs::remove_file(&path);
        let listener = tokio::net::UnixListener::bind(&path).expect("bind socket");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        (path, last_query)
    }

    fn opts() -> LogOptions {
        LogOptions {
            tail: "50".to_string(),
            since: Some(1_760_000_000),
        }
    }

    fn assert_send<T: Send>(_: &T) {}

    #[test]
    fn log_future_is_send() {
        let client = DockerClient::new(socket_path());
        let opts = opts();
        let fut = client.container_logs("yarr-mcp", &opts);
        assert_send(&fut);
    }

    #[tokio::test]
    async fn multiplexed_logs_are_demuxed() {
        let (path, query) = fake_docker(false).await;
        let logs = DockerClient::new(&path)
            .container_logs("yarr-mcp", &opts())
            .await
            .expect("logs");
        assert_eq!(logs, "2026-10-18T09:00:00Z out\n2026-10-18T09:00:01Z err\n");
        assert_eq!(
            query.lock().expect("lock").as_deref(),
            Some("stdout=1&stderr=1&timestamps=1&tail=50&since=1760000000")
        );
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn tty_logs_are_returned_as_is() {
        let (path, _) = fake_docker(true).await;
        let logs = DockerClient::new(&path)
            .container_logs("yarr-mcp", &opts())
            .await
            .expect("logs");
        assert_eq!(logs, "2026-10-18T09:00:00Z tty line\n");
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn unknown_container_is_not_found() {
        let (path, _) = fake_docker(false).await;
        let err = DockerClient::new(&path)
            .container_logs("nope", &opts())
            .await
            .expect_err("missing");
        assert!(matches!(err, DashboardError::ContainerNotFound(ref n) if n == "nope"));
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn missing_socket_is_a_docker_error() {
        let err = DockerClient::new(socket_path())
            .container_logs("yarr-mcp", &opts())
            .await
            .expect_err("no socket");
        assert!(matches!(err, DashboardError::Docker(_)));
        assert_eq!(err.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
