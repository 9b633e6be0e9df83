//! Adapter configuration.
//!
//! Precedence: CLI flags, then process environment, then the `.env` file, then built-in defaults.
//! Everything is read once at startup into an immutable [`ServiceConfig`].

use crate::error::{AdapterError, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use yarr_http_tools::TlsMode;

#[derive(Debug, Parser)]
#[command(
    name = "yarr-mcp-adapter",
    version,
    about = "Expose one self-hosted service's API as MCP tools"
)]
pub struct CliArgs {
    /// Upstream service to expose.
    #[arg(value_enum, env = "YARR_MCP_SERVICE")]
    pub service: Service,

    /// Env file loaded before configuration is read (ignored if missing).
    #[arg(long, env = "YARR_MCP_ENV_FILE", default_value = ".env")]
    pub env_file: PathBuf,

    /// Transport override (`sse` or `stdio`); defaults to `<SERVICE>_MCP_TRANSPORT`.
    #[arg(long)]
    pub transport: Option<String>,

    /// Bind host override; defaults to `<SERVICE>_MCP_HOST`.
    #[arg(long)]
    pub host: Option<String>,

    /// Bind port override; defaults to `<SERVICE>_MCP_PORT`.
    #[arg(long)]
    pub port: Option<u16>,

    /// Log filter override; defaults to `<SERVICE>_MCP_LOG_LEVEL`, then `LOG_LEVEL`.
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Service {
    Gotify,
    Prowlarr,
    Unifi,
    Tautulli,
    Overseerr,
    Sabnzbd,
    Portainer,
    Unraid,
    Qbittorrent,
    Plex,
}

impl Service {
    pub const ALL: [Self; 10] = [
        Self::Gotify,
        Self::Prowlarr,
        Self::Unifi,
        Self::Tautulli,
        Self::Overseerr,
        Self::Sabnzbd,
        Self::Portainer,
        Self::Unraid,
        Self::Qbittorrent,
        Self::Plex,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Gotify => "gotify",
            Self::Prowlarr => "prowlarr",
            Self::Unifi => "unifi",
            Self::Tautulli => "tautulli",
            Self::Overseerr => "overseerr",
            Self::Sabnzbd => "sabnzbd",
            Self::Portainer => "portainer",
            Self::Unraid => "unraid",
            Self::Qbittorrent => "qbittorrent",
            Self::Plex => "plex",
        }
    }

    /// Prefix of every environment variable for this service (`GOTIFY`, `UNRAID`, ...).
    #[must_use]
    pub fn env_prefix(self) -> String {
        self.name().to_ascii_uppercase()
    }

    #[must_use]
    pub fn url_var(self) -> String {
        match self {
            Self::Unifi => "UNIFI_BASE_URL".to_string(),
            Self::Unraid => "UNRAID_API_URL".to_string(),
            other => format!("{}_URL", other.env_prefix()),
        }
    }

    #[must_use]
    pub fn default_url(self) -> Option<&'static str> {
        match self {
            Self::Unifi => Some("https://api.ui.com"),
            _ => None,
        }
    }

    /// Variable holding the primary credential (API key or token).
    #[must_use]
    pub fn credential_var(self) -> String {
        match self {
            Self::Gotify => "GOTIFY_CLIENT_TOKEN".to_string(),
            Self::Plex => "PLEX_TOKEN".to_string(),
            Self::Qbittorrent => "QBITTORRENT_USER".to_string(),
            other => format!("{}_API_KEY", other.env_prefix()),
        }
    }

    /// Whether startup fails without the primary credential.
    #[must_use]
    pub fn credential_required(self) -> bool {
        !matches!(self, Self::Gotify)
    }

    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Gotify | Self::Qbittorrent | Self::Plex => 8000,
            Self::Prowlarr => 6973,
            Self::Unifi => 6969,
            Self::Tautulli => 8002,
            Self::Overseerr => 8001,
            Self::Sabnzbd => 8004,
            Self::Portainer => 6971,
            Self::Unraid => 6970,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Newline-delimited JSON-RPC on stdin/stdout.
    Stdio,
    /// HTTP with `/mcp` (SSE streams) and `/health`.
    Sse,
}

impl Transport {
    fn parse(raw: &str, var: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stdio" => Ok(Self::Stdio),
            "sse" | "http" | "streamable-http" => Ok(Self::Sse),
            other => Err(AdapterError::InvalidConfig(format!(
                "{var} must be 'sse' or 'stdio', got '{other}'"
            ))),
        }
    }
}

/// Immutable per-process configuration for one adapter.
#[derive(Clone)]
pub struct ServiceConfig {
    pub service: Service,
    pub base_url: String,
    /// API key / token. For qBittorrent this is the username.
    pub credential: Option<String>,
    /// Gotify application token used by `create_message` when none is passed.
    pub app_token: Option<String>,
    /// qBittorrent password.
    pub password: Option<String>,
    pub tls: TlsMode,
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl std::fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("service", &self.service)
            .field("base_url", &self.base_url)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("app_token", &self.app_token.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("tls", &self.tls)
            .field("transport", &self.transport)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("log_file", &self.log_file)
            .finish()
    }
}

impl ServiceConfig {
    /// Load from CLI arguments and the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::ConfigurationMissing`] for a missing required variable and
    /// [`AdapterError::InvalidConfig`] for a malformed one.
    pub fn load(cli: &CliArgs) -> Result<Self> {
        match dotenvy::from_path(&cli.env_file) {
            Ok(()) => {}
            Err(e) if e.not_found() => {}
            Err(e) => {
                return Err(AdapterError::InvalidConfig(format!(
                    "failed to read env file '{}': {e}",
                    cli.env_file.display()
                )));
            }
        }

        let mut config = Self::from_lookup(cli.service, |key| std::env::var(key).ok())?;
        if let Some(t) = &cli.transport {
            config.transport = Transport::parse(t, "--transport")?;
        }
        if let Some(h) = &cli.host {
            config.host.clone_from(h);
        }
        if let Some(p) = cli.port {
            config.port = p;
        }
        if let Some(l) = &cli.log_level {
            config.log_level.clone_from(l);
        }
        Ok(config)
    }

    /// Build from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`ServiceConfig::load`].
    pub fn from_lookup<F>(service: Service, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let prefix = service.env_prefix();
        let require = |key: String| {
            get(&key).ok_or_else(|| AdapterError::ConfigurationMissing {
                service: service.name(),
                var: key,
            })
        };

        let url_var = service.url_var();
        let base_url = match (get(&url_var), service.default_url()) {
            (Some(u), _) => u,
            (None, Some(default)) => default.to_string(),
            (None, None) => {
                return Err(AdapterError::ConfigurationMissing {
                    service: service.name(),
                    var: url_var,
                });
            }
        };

        let credential_var = service.credential_var();
        let credential = if service.credential_required() {
            Some(require(credential_var)?)
        } else {
            get(&credential_var)
        };

        let (app_token, password) = match service {
            Service::Gotify => (get("GOTIFY_APP_TOKEN"), None),
            Service::Qbittorrent => (None, Some(require("QBITTORRENT_PASS".to_string())?)),
            _ => (None, None),
        };

        let tls = match service {
            Service::Unraid => parse_verify_ssl(get("UNRAID_VERIFY_SSL").as_deref()),
            _ => TlsMode::Verify,
        };

        let transport_var = format!("{prefix}_MCP_TRANSPORT");
        let transport = match get(&transport_var) {
            Some(raw) => Transport::parse(&raw, &transport_var)?,
            None => Transport::Sse,
        };

        let port_var = format!("{prefix}_MCP_PORT");
        let port = match get(&port_var) {
            Some(raw) => raw.parse::<u16>().map_err(|e| {
                AdapterError::InvalidConfig(format!("{port_var} must be a port number: {e}"))
            })?,
            None => service.default_port(),
        };

        Ok(Self {
            service,
            base_url,
            credential,
            app_token,
            password,
            tls,
            transport,
            host: get(&format!("{prefix}_MCP_HOST")).unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            log_level: get(&format!("{prefix}_MCP_LOG_LEVEL"))
                .or_else(|| get("LOG_LEVEL"))
                .unwrap_or_else(|| "info".to_string()),
            log_file: get(&format!("{prefix}_MCP_LOG_FILE")).map(PathBuf::from),
        })
    }

    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `true`/`false` toggle verification; anything else is a CA bundle path.
fn parse_verify_ssl(raw: Option<&str>) -> TlsMode {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        None | Some("true" | "1" | "yes") => TlsMode::Verify,
        Some("false" | "0" | "no") => TlsMode::Insecure,
        Some(_) => raw.map_or(TlsMode::Verify, |p| TlsMode::CustomCa(PathBuf::from(p))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn prowlarr_defaults() {
        let cfg = ServiceConfig::from_lookup(
            Service::Prowlarr,
            lookup(&[("PROWLARR_URL", "http://prowlarr:9696"), ("PROWLARR_API_KEY", "k")]),
        )
        .expect("config");
        assert_eq!(cfg.port, 6973);
        assert_eq!(cfg.transport, Transport::Sse);
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.credential.as_deref(), Some("k"));
    }

    #[test]
    fn missing_required_credential_is_fatal() {
        let err = ServiceConfig::from_lookup(
            Service::Prowlarr,
            lookup(&[("PROWLARR_URL", "http://prowlarr:9696")]),
        )
        .expect_err("missing key");
        assert!(matches!(
            err,
            AdapterError::ConfigurationMissing { ref var, .. } if var == "PROWLARR_API_KEY"
        ));
    }

    #[test]
    fn missing_url_is_fatal_unless_defaulted() {
        let err = ServiceConfig::from_lookup(Service::Gotify, lookup(&[]))
            .expect_err("missing url");
        assert!(err.to_string().contains("GOTIFY_URL"));

        let cfg = ServiceConfig::from_lookup(Service::Unifi, lookup(&[("UNIFI_API_KEY", "k")]))
            .expect("unifi has a default base url");
        assert_eq!(cfg.base_url, "https://api.ui.com");
    }

    #[test]
    fn gotify_token_is_optional() {
        let cfg = ServiceConfig::from_lookup(
            Service::Gotify,
            lookup(&[("GOTIFY_URL", "http://gotify"), ("GOTIFY_APP_TOKEN", "app")]),
        )
        .expect("config");
        assert!(cfg.credential.is_none());
        assert_eq!(cfg.app_token.as_deref(), Some("app"));
    }

    #[test]
    fn invalid_transport_is_rejected() {
        let err = ServiceConfig::from_lookup(
            Service::Tautulli,
            lookup(&[
                ("TAUTULLI_URL", "http://t"),
                ("TAUTULLI_API_KEY", "k"),
                ("TAUTULLI_MCP_TRANSPORT", "carrier-pigeon"),
            ]),
        )
        .expect_err("bad transport");
        assert!(matches!(err, AdapterError::InvalidConfig(_)));
    }

    #[test]
    fn service_overrides_and_log_fallback() {
        let cfg = ServiceConfig::from_lookup(
            Service::Sabnzbd,
            lookup(&[
                ("SABNZBD_URL", "http://sab"),
                ("SABNZBD_API_KEY", "k"),
                ("SABNZBD_MCP_TRANSPORT", "STDIO"),
                ("SABNZBD_MCP_PORT", "9100"),
                ("LOG_LEVEL", "debug"),
            ]),
        )
        .expect("config");
        assert_eq!(cfg.transport, Transport::Stdio);
        assert_eq!(cfg.port, 9100);
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn qbittorrent_needs_user_and_password() {
        let err = ServiceConfig::from_lookup(
            Service::Qbittorrent,
            lookup(&[("QBITTORRENT_URL", "http://qb"), ("QBITTORRENT_USER", "admin")]),
        )
        .expect_err("missing password");
        assert!(err.to_string().contains("QBITTORRENT_PASS"));
    }

    #[test]
    fn unraid_verify_ssl_variants() {
        assert_eq!(parse_verify_ssl(None), TlsMode::Verify);
        assert_eq!(parse_verify_ssl(Some("False")), TlsMode::Insecure);
        assert_eq!(
            parse_verify_ssl(Some("/certs/ca.pem")),
            TlsMode::CustomCa(PathBuf::from("/certs/ca.pem"))
        );
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = ServiceConfig::from_lookup(
            Service::Plex,
            lookup(&[("PLEX_URL", "http://plex:32400"), ("PLEX_TOKEN", "very-secret")]),
        )
        .expect("config");
        assert!(!format!("{cfg:?}").contains("very-secret"));
    }
}
