//! Service adapters.
//!
//! Each adapter owns an [`UpstreamClient`] and a static tool table. Calls are validated against
//! the table before the adapter sees them, so adapters can trust [`ToolArgs`].

pub mod gotify;
pub mod overseerr;
pub mod plex;
pub mod portainer;
pub mod prowlarr;
pub mod qbittorrent;
pub mod sabnzbd;
pub mod tautulli;
pub mod unifi;
pub mod unraid;

use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use yarr_http_tools::registry::{find_tool, render_outcome};
use yarr_http_tools::{AuthStyle, ToolArgs, ToolSpec, UpstreamConfig, UpstreamError};

#[async_trait]
pub trait ServiceAdapter: Send + Sync {
    fn service(&self) -> Service;

    /// Static tool table.
    fn tools(&self) -> &'static [ToolSpec];

    /// Short usage notes returned in the MCP `initialize` response.
    fn instructions(&self) -> &'static str;

    /// Run one already-validated tool call.
    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError>;

    /// Cheapest authenticated request that proves the upstream is reachable.
    async fn health_check(&self) -> std::result::Result<(), UpstreamError>;
}

/// Validate and run a tool call. `None` if the tool does not exist.
pub async fn dispatch(
    adapter: &dyn ServiceAdapter,
    name: &str,
    arguments: Option<&JsonObject>,
) -> Option<CallToolResult> {
    let tool = find_tool(adapter.tools(), name)?;
    let outcome = match tool.validate(arguments) {
        Ok(args) => {
            debug!(service = adapter.service().name(), tool = name, "tool call");
            adapter.call(name, &args).await
        }
        Err(e) => Err(e),
    };
    if let Err(e) = &outcome {
        warn!(
            service = adapter.service().name(),
            tool = name,
            kind = e.kind(),
            error = %e,
            "tool call failed"
        );
    }
    Some(render_outcome(outcome))
}

/// Error for a tool name that passed registry lookup but has no handler arm.
pub(crate) fn unknown_tool(tool: &str) -> UpstreamError {
    UpstreamError::validation(format!("unknown tool '{tool}'"))
}

/// Upstream settings shared by every adapter: base URL plus `path`, the configured credential,
/// TLS mode and the process-wide cancellation token.
pub(crate) fn upstream_config(
    config: &ServiceConfig,
    path: &str,
    auth: AuthStyle,
    timeout: Duration,
    cancel: CancellationToken,
) -> UpstreamConfig {
    UpstreamConfig::new(
        format!("{}{path}", config.base_url.trim_end_matches('/')),
        auth,
    )
    .credential(config.credential.clone())
    .timeout(timeout)
    .tls(config.tls.clone())
    .cancel_on(cancel)
}

/// Build the adapter selected by `config`.
///
/// # Errors
///
/// Returns an error if the upstream client cannot be constructed.
pub fn build(config: &ServiceConfig, cancel: CancellationToken) -> Result<Arc<dyn ServiceAdapter>> {
    let adapter: Arc<dyn ServiceAdapter> = match config.service {
        Service::Gotify => Arc::new(gotify::Gotify::from_config(config, cancel)?),
        Service::Prowlarr => Arc::new(prowlarr::Prowlarr::from_config(config, cancel)?),
        Service::Unifi => Arc::new(unifi::Unifi::from_config(config, cancel)?),
        Service::Tautulli => Arc::new(tautulli::Tautulli::from_config(config, cancel)?),
        Service::Overseerr => Arc::new(overseerr::Overseerr::from_config(config, cancel)?),
        Service::Sabnzbd => Arc::new(sabnzbd::Sabnzbd::from_config(config, cancel)?),
        Service::Portainer => Arc::new(portainer::Portainer::from_config(config, cancel)?),
        Service::Unraid => Arc::new(unraid::Unraid::from_config(config, cancel)?),
        Service::Qbittorrent => Arc::new(qbittorrent::Qbittorrent::from_config(config, cancel)?),
        Service::Plex => Arc::new(plex::Plex::from_config(config, cancel)?),
    };
    Ok(adapter)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn all_tables() -> Vec<(&'static str, &'static [ToolSpec])> {
        vec![
            ("gotify", gotify::TOOLS),
            ("prowlarr", prowlarr::TOOLS),
            ("unifi", unifi::TOOLS),
            ("tautulli", tautulli::TOOLS),
            ("overseerr", overseerr::TOOLS),
            ("sabnzbd", sabnzbd::TOOLS),
            ("portainer", portainer::TOOLS),
            ("unraid", unraid::TOOLS),
            ("qbittorrent", qbittorrent::TOOLS),
            ("plex", plex::TOOLS),
        ]
    }

    #[test]
    fn tool_names_are_unique_per_service() {
        for (service, table) in all_tables() {
            let mut seen = HashSet::new();
            for t in table {
                assert!(seen.insert(t.name), "{service}: duplicate tool {}", t.name);
                assert!(!t.description.is_empty(), "{service}: {} lacks a description", t.name);
            }
        }
    }

    #[test]
    fn every_service_builds_from_minimal_config() {
        for service in Service::ALL {
            let cfg = ServiceConfig::from_lookup(service, |key| {
                if key.ends_with("_URL") {
                    Some("http://127.0.0.1:1".to_string())
                } else if ["_API_KEY", "_TOKEN", "_USER", "_PASS"]
                    .iter()
                    .any(|suffix| key.ends_with(suffix))
                {
                    Some("x".to_string())
                } else {
                    None
                }
            })
            .expect("config");
            let adapter = build(&cfg, CancellationToken::new()).expect("adapter");
            assert_eq!(adapter.service(), service);
            assert!(!adapter.tools().is_empty());
        }
    }
}
