//! Adapter discovery from the shared `.env` file.

use crate::error::{DashboardError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::LazyLock;
use url::Url;

static URL_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([A-Z0-9_]+?)_(?:MCP_)?(?:BASE_|API_)?URL$").ok());

/// Key suffixes tried, in order, for a service's URL.
const URL_SUFFIXES: [&str; 4] = ["_MCP_URL", "_URL", "_BASE_URL", "_API_URL"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct McpService {
    pub name: String,
    pub mcp_url: Option<String>,
    pub mcp_host_inferred: Option<String>,
    pub mcp_port: Option<String>,
    pub enabled: bool,
}

/// Parse `path` and list the services it configures. A missing file lists nothing.
///
/// # Errors
///
/// Returns [`DashboardError::EnvFile`] when the file exists but is malformed.
pub fn load(path: &Path) -> Result<Vec<McpService>> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(e) if e.not_found() => return Ok(Vec::new()),
        Err(e) => return Err(DashboardError::EnvFile(e.to_string())),
    };
    let vars = iter
        .collect::<std::result::Result<HashMap<_, _>, _>>()
        .map_err(|e| DashboardError::EnvFile(e.to_string()))?;
    Ok(discover(&vars))
}

/// Services named by `*_URL`-style keys, sorted by name.
#[must_use]
pub fn discover(vars: &HashMap<String, String>) -> Vec<McpService> {
    let Some(url_key) = URL_KEY.as_ref() else {
        return Vec::new();
    };
    let names: BTreeSet<&str> = vars
        .keys()
        .filter_map(|k| url_key.captures(k))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .collect();

    names.into_iter().map(|name| describe(name, vars)).collect()
}

fn describe(name: &str, vars: &HashMap<String, String>) -> McpService {
    let mcp_url = URL_SUFFIXES
        .iter()
        .find_map(|suffix| vars.get(&format!("{name}{suffix}")))
        .cloned();
    let mcp_host_inferred = mcp_url
        .as_deref()
        .and_then(|u| Url::parse(u).ok())
        .and_then(|u| u.host_str().map(str::to_string));
    // Disabled unless explicitly opted in with `<NAME>_MCP_DISABLE=false`.
    let enabled = vars
        .get(&format!("{name}_MCP_DISABLE"))
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("false"));

    McpService {
        name: capitalize(name),
        mcp_url,
        mcp_host_inferred,
        mcp_port: vars.get(&format!("{name}_MCP_PORT")).cloned(),
        enabled,
    }
}

/// `SABNZBD` -> `Sabnzbd`.
fn capitalize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}
