//! Yarr MCP dashboard backend.
//!
//! Lists the adapters configured in the shared `.env`, tails the adapter container's logs
//! through the Docker socket, and checks adapters' MCP endpoints.

pub mod config;
pub mod docker;
pub mod error;
pub mod health;
pub mod http;
pub mod services;

pub use config::DashboardConfig;
pub use error::{DashboardError, Result};
pub use http::{AppState, create_router};
