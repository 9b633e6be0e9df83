//! Yarr MCP adapter
//!
//! Exposes one self-hosted service's HTTP API as MCP tools, over stdio or streamable HTTP.

pub mod config;
pub mod error;
pub mod http;
pub mod server;
pub mod services;

pub use config::{CliArgs, Service, ServiceConfig, Transport};
pub use error::{AdapterError, Result};
pub use server::AdapterServer;
pub use services::{ServiceAdapter, build};
