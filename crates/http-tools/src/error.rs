//! Error taxonomy for a single tool call.
//!
//! Every variant is non-fatal: the tool boundary turns it into a structured error result. Startup
//! configuration failures live in the adapter crate, not here.

use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// No credential could be resolved; nothing was sent.
    #[error("authentication missing: {0}")]
    AuthenticationMissing(String),

    /// Upstream answered with a 4xx/5xx status.
    #[error("upstream returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// DNS, TCP, TLS or timeout failure. Also used for cancelled calls.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// A 2xx body that could not be decoded or reshaped.
    #[error("response decode error: {0}")]
    Decode(String),

    /// A 2xx body carrying the upstream's own failure envelope.
    #[error("upstream application error: {0}")]
    Application(String),

    /// Tool arguments rejected before any network call.
    #[error("invalid arguments: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, UpstreamError>;

impl UpstreamError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn application(message: impl Into<String>) -> Self {
        Self::Application(message.into())
    }

    /// Stable label used in error payloads and log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AuthenticationMissing(_) => "AuthenticationMissing",
            Self::Http { .. } => "UpstreamHttpError",
            Self::Transport(_) => "UpstreamTransportError",
            Self::Decode(_) => "ResponseDecodeError",
            Self::Application(_) => "UpstreamApplicationError",
            Self::Validation(_) => "LocalValidationError",
        }
    }

    /// HTTP-style code reported to callers.
    ///
    /// Upstream statuses are passed through untouched; locally detected failures get 401
    /// (missing credential), 400 (bad arguments) or 502 (anything wrong on the upstream side).
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AuthenticationMissing(_) => 401,
            Self::Http { status, .. } => *status,
            Self::Validation(_) => 400,
            Self::Transport(_) | Self::Decode(_) | Self::Application(_) => 502,
        }
    }

    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::AuthenticationMissing(m)
            | Self::Transport(m)
            | Self::Decode(m)
            | Self::Application(m)
            | Self::Validation(m)
            | Self::Http { message: m, .. } => m,
        }
    }

    /// JSON body returned to the caller in place of a success payload.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        json!({
            "error": self.kind(),
            "errorCode": self.status_code(),
            "errorDescription": self.description(),
        })
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(value: serde_json::Error) -> Self {
        Self::Decode(value.to_string())
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(value: reqwest::Error) -> Self {
        let detail = crate::redact::sanitize_reqwest_error(&value);
        if value.is_timeout() {
            Self::Transport(format!("request timed out: {detail}"))
        } else {
            Self::Transport(detail)
        }
    }
}
