//! Error types for the MCP adapter.
//!
//! These are startup failures; per-call failures use `yarr_http_tools::UpstreamError` and never
//! leave the tool boundary.

use thiserror::Error;

/// Main error type for the adapter.
#[derive(Error, Debug)]
pub enum AdapterError {
    /// A required environment variable is unset or blank
    #[error("Configuration error: {var} must be set for the {service} adapter")]
    ConfigurationMissing { service: &'static str, var: String },

    /// A variable is set but unusable (bad port, unknown transport, unreadable env file)
    #[error("Configuration error: {0}")]
    InvalidConfig(String),

    /// The upstream HTTP client could not be built
    #[error("Upstream client error: {0}")]
    Client(#[from] yarr_http_tools::gateway::ClientBuildError),

    /// Startup errors (bind failures, transport setup)
    #[error("Startup error: {0}")]
    Startup(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for adapter operations.
pub type Result<T> = std::result::Result<T, AdapterError>;
