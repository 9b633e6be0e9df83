//! Error type for the dashboard API. Every variant renders as `{"error": "..."}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DashboardError {
    /// The env file exists but could not be parsed
    #[error("Failed to read env file: {0}")]
    EnvFile(String),

    /// Request parameter rejected before any I/O
    #[error("{0}")]
    InvalidInput(String),

    #[error("Container '{0}' not found.")]
    ContainerNotFound(String),

    /// Docker socket unreachable or the Engine API answered with an error
    #[error("Docker API error: {0}")]
    Docker(String),
}

impl DashboardError {
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::ContainerNotFound(_) => StatusCode::NOT_FOUND,
            Self::EnvFile(_) | Self::Docker(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DashboardError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DashboardError>;
