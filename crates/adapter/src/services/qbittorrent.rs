//! qBittorrent WebUI API (`/api/v2`). Authentication is a cookie session: the adapter logs in
//! with username and password on first use, and again whenever a call comes back 403.

use super::{ServiceAdapter, unknown_tool, upstream_config};
use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use yarr_http_tools::reshape::{lenient_f64, round2};
use yarr_http_tools::{
    AuthStyle, Effect, ParamKind, ParamSpec, ToolArgs, ToolSpec, UpstreamClient, UpstreamError,
    UpstreamRequest, UpstreamResponse,
};

const TIMEOUT: Duration = Duration::from_secs(30);

const TORRENT_HASH: ParamSpec =
    ParamSpec::required("torrent_hash", ParamKind::String, "Info hash of the torrent");

const FILTERS: &[&str] = &[
    "all",
    "downloading",
    "seeding",
    "completed",
    "paused",
    "stopped",
    "active",
    "inactive",
    "resumed",
    "running",
    "stalled",
    "errored",
];

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_torrents",
        description: "Torrents with progress, ratio and speeds.",
        effect: Effect::Read,
        params: &[
            ParamSpec::optional("filter", ParamKind::Enum(FILTERS), "State filter").default_str("all"),
            ParamSpec::optional("category", ParamKind::String, ""),
            ParamSpec::optional("tag", ParamKind::String, ""),
        ],
    },
    ToolSpec {
        name: "add_torrent_url",
        description: "Add a torrent from a .torrent URL or magnet link.",
        effect: Effect::Create,
        params: &[
            ParamSpec::required("torrent_url", ParamKind::String, "URL or magnet link"),
            ParamSpec::optional("save_path", ParamKind::String, ""),
            ParamSpec::optional("category", ParamKind::String, ""),
            ParamSpec::optional("tags", ParamKind::StringList, ""),
            ParamSpec::optional("is_paused", ParamKind::Boolean, "Add in paused state")
                .default_bool(false),
            ParamSpec::optional("upload_limit_kib", ParamKind::int_min(0), "KiB/s"),
            ParamSpec::optional("download_limit_kib", ParamKind::int_min(0), "KiB/s"),
        ],
    },
    ToolSpec {
        name: "pause_torrent",
        description: "Pause one torrent.",
        effect: Effect::Action,
        params: &[TORRENT_HASH],
    },
    ToolSpec {
        name: "resume_torrent",
        description: "Resume one torrent.",
        effect: Effect::Action,
        params: &[TORRENT_HASH],
    },
    ToolSpec {
        name: "get_qb_transfer_info",
        description: "Global transfer speeds, totals and connection status.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_qb_app_preferences",
        description: "Commonly used application preferences (paths, limits, queueing, ports).",
        effect: Effect::Read,
        params: &[],
    },
];

/// The commonly used subset of `app/preferences`; the full object has well over a hundred keys.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct Preferences {
    save_path: Option<String>,
    temp_path_enabled: Option<bool>,
    temp_path: Option<String>,
    dl_limit: Option<i64>,
    up_limit: Option<i64>,
    alt_dl_limit: Option<i64>,
    alt_up_limit: Option<i64>,
    scheduler_enabled: Option<bool>,
    queueing_enabled: Option<bool>,
    max_active_downloads: Option<i64>,
    max_active_torrents: Option<i64>,
    max_active_uploads: Option<i64>,
    max_ratio_enabled: Option<bool>,
    max_ratio: Option<f64>,
    listen_port: Option<i64>,
    web_ui_port: Option<i64>,
    dht: Option<bool>,
    pex: Option<bool>,
    lsd: Option<bool>,
    encryption: Option<i64>,
}

/// One entry of `torrents/info`. Byte and rate fields are read leniently.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Torrent {
    hash: Option<String>,
    name: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    size: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    progress: Option<f64>,
    state: Option<String>,
    category: Option<String>,
    tags: Option<String>,
    #[serde(deserialize_with = "lenient_f64")]
    ratio: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    dlspeed: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    upspeed: Option<f64>,
    eta: Option<i64>,
    num_seeds: Option<i64>,
    num_leechs: Option<i64>,
    added_on: Option<i64>,
    save_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct TorrentSummary {
    hash: Option<String>,
    name: Option<String>,
    size_gb: f64,
    progress_percent: f64,
    status: Option<String>,
    category: Option<String>,
    tags: Vec<String>,
    ratio: f64,
    download_speed_kib: f64,
    upload_speed_kib: f64,
    eta_seconds: Option<i64>,
    num_seeds: Option<i64>,
    num_leechers: Option<i64>,
    added_on_timestamp: Option<i64>,
    save_path: Option<String>,
}

impl From<Torrent> for TorrentSummary {
    fn from(t: Torrent) -> Self {
        let kib = |bytes: Option<f64>| bytes.map_or(0.0, |b| round2(b / 1024.0));
        Self {
            size_gb: t.size.map_or(0.0, |b| round2(b / 1024f64.powi(3))),
            progress_percent: t.progress.map_or(0.0, |p| round2(p * 100.0)),
            tags: t
                .tags
                .as_deref()
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            ratio: t.ratio.map_or(0.0, round2),
            download_speed_kib: kib(t.dlspeed),
            upload_speed_kib: kib(t.upspeed),
            hash: t.hash,
            name: t.name,
            status: t.state,
            category: t.category,
            eta_seconds: t.eta,
            num_seeds: t.num_seeds,
            num_leechers: t.num_leechs,
            added_on_timestamp: t.added_on,
            save_path: t.save_path,
        }
    }
}

fn text_reply(response: UpstreamResponse) -> String {
    match response {
        UpstreamResponse::Text(s) => s.trim().to_string(),
        other => match other.into_value() {
            Value::String(s) => s.trim().to_string(),
            _ => String::new(),
        },
    }
}

pub struct Qbittorrent {
    client: UpstreamClient,
    username: Option<String>,
    password: Option<String>,
    logged_in: Mutex<bool>,
}

impl Qbittorrent {
    #[must_use]
    pub fn new(client: UpstreamClient, username: Option<String>, password: Option<String>) -> Self {
        Self {
            client,
            username,
            password,
            logged_in: Mutex::new(false),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the upstream client cannot be built.
    pub fn from_config(config: &ServiceConfig, cancel: CancellationToken) -> Result<Self> {
        let upstream = upstream_config(config, "/api/v2", AuthStyle::Session, TIMEOUT, cancel)
            .cookie_store(true);
        Ok(Self::new(
            UpstreamClient::new(upstream)?,
            config.credential.clone(),
            config.password.clone(),
        ))
    }

    /// Log in unless a session already exists. `force` discards the current session first.
    async fn login(&self, force: bool) -> std::result::Result<(), UpstreamError> {
        let mut logged_in = self.logged_in.lock().await;
        if *logged_in && !force {
            return Ok(());
        }
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Err(UpstreamError::AuthenticationMissing(
                "qBittorrent username and password are required".to_string(),
            ));
        };

        *logged_in = false;
        let reply = self
            .client
            .send(
                UpstreamRequest::post("auth/login")
                    .form(vec![
                        ("username".to_string(), username.clone()),
                        ("password".to_string(), password.clone()),
                    ])
                    .header("Referer", self.client.base_url())
                    .anonymous()
                    .text(),
            )
            .await?;
        if text_reply(reply) == "Fails." {
            return Err(UpstreamError::Http {
                status: 401,
                message: "qBittorrent login failed: invalid username or password".to_string(),
            });
        }
        info!("qBittorrent session established");
        *logged_in = true;
        Ok(())
    }

    async fn send(&self, request: UpstreamRequest) -> std::result::Result<UpstreamResponse, UpstreamError> {
        self.login(false).await?;
        match self.client.send(request.clone()).await {
            Err(UpstreamError::Http { status: 403, .. }) => {
                debug!("qBittorrent session rejected, logging in again");
                self.login(true).await?;
                self.client.send(request).await
            }
            other => other,
        }
    }

    async fn send_json(&self, request: UpstreamRequest) -> std::result::Result<Value, UpstreamError> {
        Ok(self.send(request).await?.into_value())
    }

    /// POST a hash to `primary`, falling back to `fallback` on 404. qBittorrent 5 renamed
    /// pause/resume to stop/start.
    async fn torrent_action(
        &self,
        primary: &str,
        fallback: &str,
        hash: &str,
    ) -> std::result::Result<(), UpstreamError> {
        let form = || vec![("hashes".to_string(), hash.to_string())];
        match self
            .send(UpstreamRequest::post(format!("torrents/{primary}")).form(form()))
            .await
        {
            Err(UpstreamError::Http { status: 404, .. }) => self
                .send(UpstreamRequest::post(format!("torrents/{fallback}")).form(form()))
                .await
                .map(|_| ()),
            other => other.map(|_| ()),
        }
    }

    async fn add_torrent(&self, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let url = args.str("torrent_url")?;
        let paused = args.flag("is_paused").to_string();
        let mut form = vec![
            ("urls".to_string(), url.to_string()),
            ("paused".to_string(), paused.clone()),
            ("stopped".to_string(), paused),
        ];
        for (key, value) in [
            ("savepath", args.opt_str("save_path")),
            ("category", args.opt_str("category")),
        ] {
            if let Some(v) = value {
                form.push((key.to_string(), v.to_string()));
            }
        }
        let tags = args.str_list("tags");
        if !tags.is_empty() {
            form.push(("tags".to_string(), tags.join(",")));
        }
        for (key, kib) in [
            ("upLimit", args.opt_i64("upload_limit_kib")),
            ("dlLimit", args.opt_i64("download_limit_kib")),
        ] {
            if let Some(kib) = kib {
                form.push((key.to_string(), (kib * 1024).to_string()));
            }
        }

        let reply = text_reply(
            self.send(UpstreamRequest::post("torrents/add").form(form).text())
                .await?,
        );
        if reply.eq_ignore_ascii_case("Fails.") {
            return Err(UpstreamError::application(format!(
                "qBittorrent rejected the torrent: {url}"
            )));
        }
        Ok(json!(format!("Torrent added successfully: {url}")))
    }
}

#[async_trait]
impl ServiceAdapter for Qbittorrent {
    fn service(&self) -> Service {
        Service::Qbittorrent
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "qBittorrent: list, add, pause and resume torrents; read transfer stats and preferences."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        match tool {
            "list_torrents" => {
                let filter = args.opt_str("filter").unwrap_or("all");
                let category = args.opt_str("category");
                let tag = args.opt_str("tag");
                let body = self
                    .send_json(
                        UpstreamRequest::get("torrents/info")
                            .query_opt("filter", (filter != "all").then_some(filter))
                            .query_opt("category", category)
                            .query_opt("tag", tag),
                    )
                    .await?;
                if !body.is_array() {
                    return Err(UpstreamError::decode("expected a list of torrents"));
                }
                let torrents: Vec<Torrent> = serde_json::from_value(body)?;
                if torrents.is_empty() {
                    return Ok(json!(format!(
                        "No torrents found matching criteria (filter: {filter}, category: {}, tag: {}).",
                        category.unwrap_or("None"),
                        tag.unwrap_or("None")
                    )));
                }
                let summaries: Vec<TorrentSummary> =
                    torrents.into_iter().map(TorrentSummary::from).collect();
                Ok(serde_json::to_value(summaries)?)
            }
            "add_torrent_url" => self.add_torrent(args).await,
            "pause_torrent" => {
                let hash = args.str("torrent_hash")?;
                self.torrent_action("pause", "stop", hash).await?;
                Ok(json!(format!("Pause command sent for torrent: {hash}.")))
            }
            "resume_torrent" => {
                let hash = args.str("torrent_hash")?;
                self.torrent_action("resume", "start", hash).await?;
                Ok(json!(format!("Resume command sent for torrent: {hash}.")))
            }
            "get_qb_transfer_info" => self.send_json(UpstreamRequest::get("transfer/info")).await,
            "get_qb_app_preferences" => {
                let prefs = self.send_json(UpstreamRequest::get("app/preferences")).await?;
                Ok(serde_json::to_value(Preferences::deserialize(&prefs)?)?)
            }
            other => Err(unknown_tool(other)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), UpstreamError> {
        self.send(UpstreamRequest::get("app/version").text())
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::dispatch;
    use crate::services::testing::{args, result_body};
    use yarr_http_tools::UpstreamConfig;
    use yarr_test_support::{MockResponse, MockUpstream};

    fn qbittorrent(base_url: &str, password: Option<&str>) -> Qbittorrent {
        let client = UpstreamClient::new(
            UpstreamConfig::new(format!("{base_url}/api/v2"), AuthStyle::Session).cookie_store(true),
        )
        .expect("client");
        Qbittorrent::new(client, Some("admin".to_string()), password.map(str::to_string))
    }

    #[tokio::test]
    async fn logs_in_once_then_reuses_the_session() {
        let upstream = MockUpstream::start(vec![
            MockResponse::text(200, "Ok.").with_header("set-cookie", "SID=abc; HttpOnly; path=/"),
            MockResponse::json(200, &json!({"dl_info_speed": 1024})),
            MockResponse::json(200, &json!({"dl_info_speed": 2048})),
        ])
        .await
        .expect("mock");
        let adapter = qbittorrent(upstream.base_url(), Some("adminadmin"));

        for _ in 0..2 {
            adapter
                .call("get_qb_transfer_info", &ToolArgs::default())
                .await
                .expect("transfer info");
        }
        let reqs = upstream.requests();
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[0].method, "POST");
        assert_eq!(reqs[0].path, "/api/v2/auth/login");
        assert!(reqs[0].body.contains("username=admin"));
        assert!(reqs[0].body.contains("password=adminadmin"));
        assert_eq!(reqs[1].path, "/api/v2/transfer/info");
        assert_eq!(reqs[2].path, "/api/v2/transfer/info");
    }

    #[tokio::test]
    async fn preferences_keep_the_common_subset() {
        let upstream = MockUpstream::start(vec![
            MockResponse::text(200, "Ok."),
            MockResponse::json(
                200,
                &json!({"save_path": "/downloads", "dht": true, "max_ratio": 2.5, "web_ui_password": "x", "rss_refresh_interval": 30}),
            ),
        ])
        .await
        .expect("mock");
        let adapter = qbittorrent(upstream.base_url(), Some("adminadmin"));

        let prefs = adapter
            .call("get_qb_app_preferences", &ToolArgs::default())
            .await
            .expect("preferences");
        assert_eq!(prefs["save_path"], "/downloads");
        assert_eq!(prefs["dht"], true);
        assert_eq!(prefs["max_ratio"], 2.5);
        assert_eq!(prefs["listen_port"], Value::Null);
        assert!(prefs.get("web_ui_password").is_none());
        assert!(prefs.get("rss_refresh_interval").is_none());
    }

    #[tokio::test]
    async fn missing_password_fails_without_io() {
        let upstream = MockUpstream::start(vec![MockResponse::text(200, "Ok.")])
            .await
            .expect("mock");
        let adapter = qbittorrent(upstream.base_url(), None);

        let result = dispatch(&adapter, "list_torrents", None).await.expect("tool");
        assert_eq!(result_body(&result)["error"], "AuthenticationMissing");
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn rejected_login_is_an_auth_error() {
        let upstream = MockUpstream::start(vec![MockResponse::text(200, "Fails.")])
            .await
            .expect("mock");
        let adapter = qbittorrent(upstream.base_url(), Some("wrong"));

        let err = adapter.health_check().await.expect_err("login fails");
        assert!(matches!(err, UpstreamError::Http { status: 401, .. }));
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn expired_session_triggers_one_relogin() {
        let upstream = MockUpstream::start(vec![
            MockResponse::text(200, "Ok."),
            MockResponse::text(403, "Forbidden"),
            MockResponse::text(200, "Ok."),
            MockResponse::text(200, "v4.6.5"),
        ])
        .await
        .expect("mock");
        let adapter = qbittorrent(upstream.base_url(), Some("adminadmin"));

        adapter.health_check().await.expect("healthy");
        let paths: Vec<String> = upstream.requests().into_iter().map(|r| r.path).collect();
        assert_eq!(
            paths,
            [
                "/api/v2/auth/login",
                "/api/v2/app/version",
                "/api/v2/auth/login",
                "/api/v2/app/version"
            ]
        );
    }

    #[tokio::test]
    async fn pause_falls_back_to_stop_on_v5() {
        let upstream = MockUpstream::start(vec![
            MockResponse::text(200, "Ok."),
            MockResponse::empty(404),
            MockResponse::empty(200),
        ])
        .await
        .expect("mock");
        let adapter = qbittorrent(upstream.base_url(), Some("adminadmin"));

        let result = dispatch(&adapter, "pause_torrent", Some(&args(json!({"torrent_hash": "abc123"}))))
            .await
            .expect("tool");
        assert_eq!(result_body(&result), json!("Pause command sent for torrent: abc123."));
        let reqs = upstream.requests();
        assert_eq!(reqs[1].path, "/api/v2/torrents/pause");
        assert_eq!(reqs[2].path, "/api/v2/torrents/stop");
        assert_eq!(reqs[2].body, "hashes=abc123");
    }

    #[tokio::test]
    async fn add_sends_limits_in_bytes() {
        let upstream = MockUpstream::start(vec![
            MockResponse::text(200, "Ok."),
            MockResponse::text(200, "Ok."),
        ])
        .await
        .expect("mock");
        let adapter = qbittorrent(upstream.base_url(), Some("adminadmin"));

        let body = adapter
            .call(
                "add_torrent_url",
                &ToolArgs::from_value(json!({
                    "torrent_url": "magnet:?xt=urn:btih:abc",
                    "tags": ["tv", "hd"],
                    "download_limit_kib": 512
                })),
            )
            .await
            .expect("add");
        assert_eq!(body, json!("Torrent added successfully: magnet:?xt=urn:btih:abc"));
        let sent = &upstream.requests()[1].body;
        assert!(sent.contains("dlLimit=524288"));
        assert!(sent.contains("tags=tv%2Chd"));
        assert!(sent.contains("paused=false"));
    }

    #[test]
    fn torrent_summary_converts_units() {
        let torrent: Torrent = serde_json::from_value(json!({
            "hash": "abc", "name": "Show.S01", "size": 2_147_483_648u64, "progress": 0.5,
            "state": "downloading", "tags": "tv, hd", "ratio": 1.23456, "dlspeed": "2048"
        }))
        .expect("torrent");
        let summary = serde_json::to_value(TorrentSummary::from(torrent)).expect("summary");
        assert_eq!(summary["size_gb"], 2.0);
        assert_eq!(summary["progress_percent"], 50.0);
        assert_eq!(summary["tags"], json!(["tv", "hd"]));
        assert_eq!(summary["ratio"], 1.23);
        assert_eq!(summary["download_speed_kib"], 2.0);
        assert_eq!(summary["upload_speed_kib"], 0.0);
        assert_eq!(summary["status"], "downloading");
        assert_eq!(summary["eta_seconds"], Value::Null);
    }
}
