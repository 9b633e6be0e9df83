//! Gotify push-notification server.
//!
//! Auth is `X-Gotify-Key`. Most endpoints want a client token; `create_message` wants an
//! application token, passed per call or taken from `GOTIFY_APP_TOKEN`.

use super::{ServiceAdapter, unknown_tool, upstream_config};
use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yarr_http_tools::{
    AuthStyle, Effect, ParamKind, ParamSpec, ToolArgs, ToolSpec, UpstreamClient, UpstreamError,
    UpstreamRequest,
};

const TIMEOUT: Duration = Duration::from_secs(20);

const PRIORITY: ParamKind = ParamKind::int_range(0, 10);
const LIMIT: ParamSpec =
    ParamSpec::optional("limit", ParamKind::int_range(1, 200), "Maximum messages to return")
        .default_int(100);
const SINCE: ParamSpec = ParamSpec::optional(
    "since",
    ParamKind::int_min(0),
    "Return only messages with an id lower than this (paging cursor)",
);

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "create_message",
        description: "Send a push message. Needs an application token (argument or GOTIFY_APP_TOKEN).",
        effect: Effect::Create,
        params: &[
            ParamSpec::optional("app_token", ParamKind::String, "Application token to send as"),
            ParamSpec::required("message", ParamKind::String, "Message body (markdown allowed)"),
            ParamSpec::optional("title", ParamKind::String, "Message title"),
            ParamSpec::optional("priority", PRIORITY, "Priority 0-10"),
            ParamSpec::optional("extras", ParamKind::Object, "Gotify extras object"),
        ],
    },
    ToolSpec {
        name: "get_messages",
        description: "List messages for the client token, newest first.",
        effect: Effect::Read,
        params: &[LIMIT, SINCE],
    },
    ToolSpec {
        name: "delete_message",
        description: "Delete one message by id.",
        effect: Effect::Delete,
        params: &[ParamSpec::required("message_id", ParamKind::int_min(1), "Message id")],
    },
    ToolSpec {
        name: "create_application",
        description: "Create an application (a message source with its own token).",
        effect: Effect::Create,
        params: &[
            ParamSpec::required("name", ParamKind::String, "Application name"),
            ParamSpec::optional("description", ParamKind::String, ""),
            ParamSpec::optional("default_priority", PRIORITY, "Default message priority"),
        ],
    },
    ToolSpec {
        name: "get_applications",
        description: "List applications.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "update_application",
        description: "Update an application's name, description or default priority.",
        effect: Effect::Update,
        params: &[
            ParamSpec::required("app_id", ParamKind::int_min(1), "Application id"),
            ParamSpec::optional("name", ParamKind::String, ""),
            ParamSpec::optional("description", ParamKind::String, ""),
            ParamSpec::optional("default_priority", PRIORITY, ""),
        ],
    },
    ToolSpec {
        name: "delete_application",
        description: "Delete an application and all of its messages.",
        effect: Effect::Delete,
        params: &[ParamSpec::required("app_id", ParamKind::int_min(1), "Application id")],
    },
    ToolSpec {
        name: "create_client",
        description: "Create a client (a message consumer with its own token).",
        effect: Effect::Create,
        params: &[ParamSpec::required("name", ParamKind::String, "Client name")],
    },
    ToolSpec {
        name: "get_clients",
        description: "List clients.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_health",
        description: "Server health (no token needed).",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_version",
        description: "Server version (no token needed).",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_application_messages",
        description: "List messages of one application.",
        effect: Effect::Read,
        params: &[
            ParamSpec::required("app_id", ParamKind::int_min(1), "Application id"),
            LIMIT,
            SINCE,
        ],
    },
    ToolSpec {
        name: "get_current_user",
        description: "The user owning the client token.",
        effect: Effect::Read,
        params: &[],
    },
];

#[derive(Debug, Serialize)]
struct NewMessage<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    priority: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extras: Option<&'a Value>,
}

/// Application fields for create and update; absent fields are left untouched upstream.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationFields<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    default_priority: Option<i64>,
}

impl<'a> ApplicationFields<'a> {
    fn from_args(args: &'a ToolArgs) -> Self {
        Self {
            name: args.opt_str("name"),
            description: args.opt_str("description"),
            default_priority: args.opt_i64("default_priority"),
        }
    }

    fn is_empty(&self) -> bool {
        self.name.is_none() && self.description.is_none() && self.default_priority.is_none()
    }
}

/// `GET /health`: `{"health": "green", "database": "green"}`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Health {
    health: Option<String>,
}

pub struct Gotify {
    client: UpstreamClient,
    app_token: Option<String>,
}

impl Gotify {
    #[must_use]
    pub fn new(client: UpstreamClient, app_token: Option<String>) -> Self {
        Self { client, app_token }
    }

    /// # Errors
    ///
    /// Returns an error if the upstream client cannot be built.
    pub fn from_config(config: &ServiceConfig, cancel: CancellationToken) -> Result<Self> {
        let upstream = upstream_config(
            config,
            "",
            AuthStyle::Header("X-Gotify-Key".to_string()),
            TIMEOUT,
            cancel,
        );
        Ok(Self::new(
            UpstreamClient::new(upstream)?,
            config.app_token.clone(),
        ))
    }

    async fn create_message(&self, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let token = args
            .opt_str("app_token")
            .map(str::to_string)
            .or_else(|| self.app_token.clone());

        let payload = NewMessage {
            message: args.str("message")?,
            title: args.opt_str("title"),
            priority: args.opt_i64("priority"),
            extras: args.value("extras"),
        };

        self.client
            .send_json(
                UpstreamRequest::post("message")
                    .credential(token)
                    .json(serde_json::to_value(payload)?),
            )
            .await
    }

    async fn update_application(
        &self,
        args: &ToolArgs,
    ) -> std::result::Result<Value, UpstreamError> {
        let app_id = args.i64("app_id")?;
        let payload = ApplicationFields::from_args(args);
        if payload.is_empty() {
            return Err(UpstreamError::validation(
                "provide at least one of name, description or default_priority",
            ));
        }
        self.client
            .send_json(UpstreamRequest::put(format!("application/{app_id}")).json(serde_json::to_value(payload)?))
            .await
    }
}

#[async_trait]
impl ServiceAdapter for Gotify {
    fn service(&self) -> Service {
        Service::Gotify
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "Gotify notifications. create_message needs an application token; everything else uses \
         the configured client token. get_health and get_version need no token."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let c = &self.client;
        match tool {
            "create_message" => self.create_message(args).await,
            "get_messages" => {
                c.send_json(
                    UpstreamRequest::get("message")
                        .query_opt("limit", args.opt_i64("limit"))
                        .query_opt("since", args.opt_i64("since")),
                )
                .await
            }
            "delete_message" => {
                c.send_json(UpstreamRequest::delete(format!(
                    "message/{}",
                    args.i64("message_id")?
                )))
                .await
            }
            "create_application" => {
                c.send_json(
                    UpstreamRequest::post("application")
                        .json(serde_json::to_value(ApplicationFields::from_args(args))?),
                )
                .await
            }
            "get_applications" => c.send_json(UpstreamRequest::get("application")).await,
            "update_application" => self.update_application(args).await,
            "delete_application" => {
                c.send_json(UpstreamRequest::delete(format!(
                    "application/{}",
                    args.i64("app_id")?
                )))
                .await
            }
            "create_client" => {
                c.send_json(UpstreamRequest::post("client").json(json!({"name": args.str("name")?})))
                    .await
            }
            "get_clients" => c.send_json(UpstreamRequest::get("client")).await,
            "get_health" => c.send_json(UpstreamRequest::get("health").anonymous()).await,
            "get_version" => c.send_json(UpstreamRequest::get("version").anonymous()).await,
            "get_application_messages" => {
                c.send_json(
                    UpstreamRequest::get(format!("application/{}/message", args.i64("app_id")?))
                        .query_opt("limit", args.opt_i64("limit"))
                        .query_opt("since", args.opt_i64("since")),
                )
                .await
            }
            "get_current_user" => c.send_json(UpstreamRequest::get("current/user")).await,
            other => Err(unknown_tool(other)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), UpstreamError> {
        let health = self
            .client
            .send_json(UpstreamRequest::get("health").anonymous())
            .await?;
        let report = if health.is_object() {
            Health::deserialize(&health)?
        } else {
            Health::default()
        };
        match report.health.as_deref() {
            Some("green") | None => Ok(()),
            Some(other) => Err(UpstreamError::application(format!(
                "gotify reports health '{other}'"
            ))),
        }
    }
}
