//! Shared upstream plumbing for the yarr MCP adapters.
//!
//! - [`gateway`]: one outbound HTTP/GraphQL call with a normalized outcome
//! - [`registry`]: statically declared tools, argument validation, result rendering
//! - [`error`]: the per-call error taxonomy
//!
//! It contains no service-specific knowledge; adapters live in `yarr-mcp-adapter`.

pub mod docker_stream;
pub mod error;
pub mod gateway;
pub mod redact;
pub mod registry;
pub mod reshape;
pub mod semantics;

pub use error::UpstreamError;
pub use gateway::{
    AuthStyle, Page, RateLimitPolicy, TlsMode, UpstreamClient, UpstreamConfig, UpstreamRequest,
    UpstreamResponse,
};
pub use registry::{ParamKind, ParamSpec, ToolArgs, ToolSpec};
pub use semantics::Effect;
