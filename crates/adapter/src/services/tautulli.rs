//! Tautulli (Plex monitoring). Single endpoint: `GET /api/v2?apikey=..&cmd=..`.

use super::{ServiceAdapter, unknown_tool, upstream_config};
use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yarr_http_tools::{
    AuthStyle, Effect, ParamKind, ParamSpec, ToolArgs, ToolSpec, UpstreamClient, UpstreamError,
    UpstreamRequest,
};

const TIMEOUT: Duration = Duration::from_secs(30);

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_tautulli_activity",
        description: "Current Plex streams as seen by Tautulli.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_tautulli_home_stats",
        description: "Home page statistics (most watched, most active users, ...).",
        effect: Effect::Read,
        params: &[ParamSpec::optional(
            "stats_count",
            ParamKind::int_min(1),
            "Items per statistic",
        )],
    },
    ToolSpec {
        name: "get_tautulli_history",
        description: "Watch history, optionally for one library section.",
        effect: Effect::Read,
        params: &[
            ParamSpec::optional("section_id", ParamKind::String, "Library section id"),
            ParamSpec::optional("length", ParamKind::int_range(1, 1000), "Entries to return")
                .default_int(25),
        ],
    },
    ToolSpec {
        name: "get_tautulli_users",
        description: "Users known to Tautulli.",
        effect: Effect::Read,
        params: &[],
    },
];

/// Value for a Tautulli query parameter. Booleans are sent as `1`/`0`.
fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Envelope {
    response: Option<CommandResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommandResponse {
    result: Option<String>,
    message: Option<String>,
    /// Command specific; passed through as is.
    data: Option<Value>,
}

/// Unwrap `{"response": {"result": "success", "data": ...}}`.
fn unwrap_response(body: Value) -> std::result::Result<Value, UpstreamError> {
    let Some(response) = serde_json::from_value::<Envelope>(body)?.response else {
        return Err(UpstreamError::decode("Tautulli reply has no 'response' object"));
    };
    if response.result.as_deref() == Some("success") {
        return Ok(response.data.unwrap_or_else(|| json!({})));
    }
    let message = response
        .message
        .unwrap_or_else(|| "Unknown Tautulli API error".to_string());
    Err(UpstreamError::application(format!("Tautulli API - {message}")))
}

pub struct Tautulli {
    client: UpstreamClient,
}

impl Tautulli {
    #[must_use]
    pub fn new(client: UpstreamClient) -> Self {
        Self { client }
    }

    /// # Errors
    ///
    /// Returns an error if the upstream client cannot be built.
    pub fn from_config(config: &ServiceConfig, cancel: CancellationToken) -> Result<Self> {
        let upstream = upstream_config(
            config,
            "/api/v2",
            AuthStyle::Query("apikey".to_string()),
            TIMEOUT,
            cancel,
        );
        Ok(Self::new(UpstreamClient::new(upstream)?))
    }

    async fn command(
        &self,
        cmd: &str,
        params: &[(&str, Value)],
    ) -> std::result::Result<Value, UpstreamError> {
        let mut request = UpstreamRequest::get("").query("cmd", cmd);
        for (key, value) in params {
            request = request.query_opt(key, query_value(value));
        }
        unwrap_response(self.client.send_json(request).await?)
    }
}

#[async_trait]
impl ServiceAdapter for Tautulli {
    fn service(&self) -> Service {
        Service::Tautulli
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "Tautulli monitoring for Plex: live activity, home statistics, watch history and users."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let arg = |name: &str| args.value(name).cloned().unwrap_or(Value::Null);
        match tool {
            "get_tautulli_activity" => self.command("get_activity", &[]).await,
            "get_tautulli_home_stats" => {
                match self
                    .command("get_home_stats", &[("stats_count", arg("stats_count"))])
                    .await?
                {
                    Value::Array(stats) => Ok(json!({ "stats": stats })),
                    other => Ok(other),
                }
            }
            "get_tautulli_history" => {
                self.command(
                    "get_history",
                    &[("section_id", arg("section_id")), ("length", arg("length"))],
                )
                .await
            }
            "get_tautulli_users" => self.command("get_users", &[]).await,
            other => Err(unknown_tool(other)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), UpstreamError> {
        self.command("arnold", &[]).await.map(|_| ())
    }
}
