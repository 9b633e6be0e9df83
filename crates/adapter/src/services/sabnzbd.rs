//! SABnzbd. Everything is `GET /sabnzbd/api?mode=..&output=json&apikey=..`.
//!
//! Failures usually come back as HTTP 200 with `{"status": false, "error": ".."}`, or a bare
//! `{"error": ".."}` for a bad key.

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

const START: ParamSpec =
    ParamSpec::optional("start", ParamKind::int_min(0), "First slot index").default_int(0);
const LIMIT: ParamSpec =
    ParamSpec::optional("limit", ParamKind::int_min(0), "Slots to return").default_int(20);
const CATEGORY: ParamSpec = ParamSpec::optional("category", ParamKind::String, "Category filter");

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_server_stats",
        description: "Server status (speed, free space, pause state) from the queue endpoint.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_sab_queue",
        description: "Download queue.",
        effect: Effect::Read,
        params: &[START, LIMIT, CATEGORY],
    },
    ToolSpec {
        name: "get_sab_history",
        description: "Download history.",
        effect: Effect::Read,
        params: &[START, LIMIT, CATEGORY],
    },
    ToolSpec {
        name: "pause_sab_queue",
        description: "Pause the whole queue.",
        effect: Effect::Action,
        params: &[],
    },
    ToolSpec {
        name: "resume_sab_queue",
        description: "Resume the whole queue.",
        effect: Effect::Action,
        params: &[],
    },
    ToolSpec {
        name: "add_nzb_url",
        description: "Queue an NZB by URL.",
        effect: Effect::Create,
        params: &[
            ParamSpec::required("nzb_url", ParamKind::String, "Direct URL of the .nzb file"),
            CATEGORY,
        ],
    },
    ToolSpec {
        name: "set_sab_speedlimit",
        description: "Set the download speed limit as a percentage of the configured maximum (0 = no limit).",
        effect: Effect::Action,
        params: &[ParamSpec::required(
            "percentage",
            ParamKind::int_range(0, 100),
            "0-100",
        )],
    },
    ToolSpec {
        name: "toggle_pause_sabnzbd",
        description: "Pause the queue if it is running, resume it if it is paused.",
        effect: Effect::Action,
        params: &[],
    },
];

/// The status fields shared by every SABnzbd reply; the rest passes through.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Reply {
    status: Option<bool>,
    error: Option<String>,
    nzo_ids: Option<Vec<String>>,
}

impl Reply {
    fn of(body: &Value) -> std::result::Result<Self, UpstreamError> {
        if body.is_object() {
            Ok(Self::deserialize(body)?)
        } else {
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueueReply {
    queue: Option<QueueFlags>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct QueueFlags {
    paused: Option<bool>,
}

/// Reject SABnzbd's in-body failure shapes.
fn check_status(body: Value) -> std::result::Result<Value, UpstreamError> {
    let reply = Reply::of(&body)?;
    let failed = match reply.status {
        Some(status) => !status,
        None => reply.error.is_some(),
    };
    if failed {
        return Err(UpstreamError::application(format!(
            "SABnzbd API - {}",
            reply.error.as_deref().unwrap_or("Unknown SABnzbd API error")
        )));
    }
    Ok(body)
}

fn succeeded(body: &Value) -> std::result::Result<bool, UpstreamError> {
    Ok(Reply::of(body)?.status == Some(true))
}

pub struct Sabnzbd {
    client: UpstreamClient,
}

impl Sabnzbd {
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
            "/sabnzbd/api",
            AuthStyle::Query("apikey".to_string()),
            TIMEOUT,
            cancel,
        );
        Ok(Self::new(UpstreamClient::new(upstream)?))
    }

    fn mode(mode: &str) -> UpstreamRequest {
        UpstreamRequest::get("")
            .query("output", "json")
            .query("mode", mode)
    }

    async fn run(&self, request: UpstreamRequest) -> std::result::Result<Value, UpstreamError> {
        check_status(self.client.send_json(request).await?)
    }

    async fn listing(
        &self,
        mode: &str,
        args: &ToolArgs,
    ) -> std::result::Result<Value, UpstreamError> {
        self.run(
            Self::mode(mode)
                .query_opt("start", args.opt_i64("start"))
                .query_opt("limit", args.opt_i64("limit"))
                .query_opt("cat", args.opt_str("category")),
        )
        .await
    }

    async fn switch_queue(&self, pause: bool) -> std::result::Result<Value, UpstreamError> {
        let (mode, done) = if pause {
            ("pause", "SABnzbd queue paused.")
        } else {
            ("resume", "SABnzbd queue resumed.")
        };
        let body = self.run(Self::mode(mode)).await?;
        if succeeded(&body)? {
            Ok(json!({"status": "success", "message": done}))
        } else {
            Err(UpstreamError::decode(format!(
                "unexpected reply to {mode}: {body}"
            )))
        }
    }

    async fn is_paused(&self) -> std::result::Result<bool, UpstreamError> {
        let body = self
            .run(Self::mode("queue").query("start", 0).query("limit", 0))
            .await?;
        QueueReply::deserialize(&body)?
            .queue
            .and_then(|q| q.paused)
            .ok_or_else(|| UpstreamError::decode("queue status has no 'paused' flag"))
    }
}

#[async_trait]
impl ServiceAdapter for Sabnzbd {
    fn service(&self) -> Service {
        Service::Sabnzbd
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "SABnzbd Usenet downloader: inspect queue and history, pause or resume, add NZBs by URL, \
         throttle speed."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        match tool {
            "get_server_stats" => {
                self.run(Self::mode("queue").query("start", 0).query("limit", 0))
                    .await
            }
            "get_sab_queue" => self.listing("queue", args).await,
            "get_sab_history" => self.listing("history", args).await,
            "pause_sab_queue" => self.switch_queue(true).await,
            "resume_sab_queue" => self.switch_queue(false).await,
            "add_nzb_url" => {
                let body = self
                    .run(
                        Self::mode("addurl")
                            .query("name", args.str("nzb_url")?)
                            .query_opt("cat", args.opt_str("category")),
                    )
                    .await?;
                let reply = Reply::of(&body)?;
                if reply.status == Some(true) && reply.nzo_ids.is_some() {
                    Ok(body)
                } else {
                    Err(UpstreamError::decode(format!("unexpected reply to addurl: {body}")))
                }
            }
            "set_sab_speedlimit" => {
                let percentage = args.i64("percentage")?;
                let body = self
                    .run(Self::mode("config").query("name", "speedlimit").query("value", percentage))
                    .await?;
                if succeeded(&body)? {
                    Ok(json!({
                        "status": "success",
                        "message": format!("SABnzbd speed limit set to {percentage}%."),
                    }))
                } else {
                    Err(UpstreamError::decode(format!("unexpected reply to speedlimit: {body}")))
                }
            }
            "toggle_pause_sabnzbd" => {
                let pause = !self.is_paused().await?;
                self.switch_queue(pause).await
            }
            other => Err(unknown_tool(other)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), UpstreamError> {
        self.run(Self::mode("version")).await.map(|_| ())
    }
}
