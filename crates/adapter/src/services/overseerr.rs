//! Overseerr media requests (`/api/v1`, `X-Api-Key`).

use super::{ServiceAdapter, unknown_tool, upstream_config};
use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yarr_http_tools::reshape::year_of;
use yarr_http_tools::{
    AuthStyle, Effect, ParamKind, ParamSpec, ToolArgs, ToolSpec, UpstreamClient, UpstreamError,
    UpstreamRequest,
};

const TIMEOUT: Duration = Duration::from_secs(30);
const TMDB_ID: ParamSpec = ParamSpec::required("tmdb_id", ParamKind::int_min(1), "TMDB id");

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "search_media",
        description: "Search movies and TV shows. Results carry the TMDB id needed for requests.",
        effect: Effect::Read,
        params: &[
            ParamSpec::required("query", ParamKind::String, "Search terms"),
            ParamSpec::optional("media_type", ParamKind::Enum(&["movie", "tv"]), "Limit to one type"),
        ],
    },
    ToolSpec {
        name: "get_movie_details",
        description: "Movie details by TMDB id.",
        effect: Effect::Read,
        params: &[TMDB_ID],
    },
    ToolSpec {
        name: "get_tv_show_details",
        description: "TV show details (with seasons) by TMDB id.",
        effect: Effect::Read,
        params: &[TMDB_ID],
    },
    ToolSpec {
        name: "request_movie",
        description: "Request a movie.",
        effect: Effect::Create,
        params: &[TMDB_ID],
    },
    ToolSpec {
        name: "request_tv_show",
        description: "Request a TV show: a list of season numbers, or \"all\" (the default).",
        effect: Effect::Create,
        params: &[
            TMDB_ID,
            ParamSpec::optional("seasons", ParamKind::Any, "Season numbers or \"all\""),
        ],
    },
    ToolSpec {
        name: "list_failed_requests",
        description: "Failed media requests, most recently modified first.",
        effect: Effect::Read,
        params: &[
            ParamSpec::optional("count", ParamKind::int_range(1, 100), "").default_int(10),
            ParamSpec::optional("skip", ParamKind::int_min(0), "").default_int(0),
        ],
    },
];

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchPage {
    results: Vec<SearchItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SearchItem {
    id: Option<i64>,
    media_type: Option<String>,
    title: Option<String>,
    name: Option<String>,
    original_name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    overview: Option<String>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MediaSummary {
    tmdb_id: Option<i64>,
    media_type: Option<String>,
    title: Option<String>,
    year: Option<String>,
    overview: Option<String>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
}

impl From<SearchItem> for MediaSummary {
    fn from(item: SearchItem) -> Self {
        let year = year_of(item.release_date.as_deref().filter(|d| !d.is_empty()))
            .or_else(|| year_of(item.first_air_date.as_deref()));
        Self {
            tmdb_id: item.id,
            media_type: item.media_type,
            title: item.title.or(item.name).or(item.original_name),
            year,
            overview: item.overview,
            poster_path: item.poster_path,
            backdrop_path: item.backdrop_path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RequestPage {
    results: Vec<MediaRequest>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MediaRequest {
    id: Option<i64>,
    status: Option<i64>,
    media: RequestMedia,
    requested_by: RequestUser,
    created_at: Option<String>,
    modified_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RequestMedia {
    media_type: Option<String>,
    tmdb_id: Option<i64>,
    title: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RequestUser {
    display_name: Option<String>,
}

/// `seasons` argument: a list of season numbers or `"all"`.
fn seasons_payload(value: Option<&Value>) -> std::result::Result<Value, UpstreamError> {
    match value {
        None => Ok(json!("all")),
        Some(Value::String(s)) if s.eq_ignore_ascii_case("all") => Ok(json!("all")),
        Some(Value::Array(items)) if items.is_empty() => Ok(json!("all")),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_i64().filter(|n| *n >= 0))
            .collect::<Option<Vec<_>>>()
            .map(|seasons| json!(seasons))
            .ok_or_else(|| {
                UpstreamError::validation("parameter 'seasons' must list non-negative integers")
            }),
        Some(_) => Err(UpstreamError::validation(
            "parameter 'seasons' must be a list of season numbers or \"all\"",
        )),
    }
}

pub struct Overseerr {
    client: UpstreamClient,
}

impl Overseerr {
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
            "/api/v1",
            AuthStyle::Header("X-Api-Key".to_string()),
            TIMEOUT,
            cancel,
        );
        Ok(Self::new(UpstreamClient::new(upstream)?))
    }

    async fn search_media(&self, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let query = args.str("query")?;
        let media_type = args.opt_str("media_type");
        let body = self
            .client
            .send_json(UpstreamRequest::get("search").query("query", query))
            .await?;
        let page: SearchPage = serde_json::from_value(body)?;

        let results: Vec<MediaSummary> = page
            .results
            .into_iter()
            .filter(|item| media_type.is_none_or(|t| item.media_type.as_deref() == Some(t)))
            .map(MediaSummary::from)
            .collect();
        if results.is_empty() {
            return Ok(Value::String(match media_type {
                Some(t) => format!("No '{t}' results found for query '{query}'."),
                None => format!("No results found for query '{query}'."),
            }));
        }
        Ok(serde_json::to_value(results)?)
    }

    async fn request_media(&self, payload: Value) -> std::result::Result<Value, UpstreamError> {
        self.client
            .send_json(UpstreamRequest::post("request").json(payload))
            .await
    }

    async fn list_failed_requests(
        &self,
        args: &ToolArgs,
    ) -> std::result::Result<Value, UpstreamError> {
        let body = self
            .client
            .send_json(
                UpstreamRequest::get("request")
                    .query_opt("take", args.opt_i64("count"))
                    .query_opt("skip", args.opt_i64("skip"))
                    .query("sort", "modified")
                    .query("filter", "failed"),
            )
            .await?;
        let page: RequestPage = serde_json::from_value(body)?;
        if page.results.is_empty() {
            return Ok(json!("No failed requests found."));
        }
        let rows: Vec<Value> = page
            .results
            .into_iter()
            .map(|r| {
                json!({
                    "requestId": r.id,
                    "status": r.status,
                    "type": r.media.media_type,
                    "tmdbId": r.media.tmdb_id,
                    "title": r.media.title.or(r.media.name),
                    "requested_by": r.requested_by.display_name,
                    "requested_at": r.created_at,
                    "modified_at": r.modified_at,
                })
            })
            .collect();
        Ok(Value::Array(rows))
    }
}

#[async_trait]
impl ServiceAdapter for Overseerr {
    fn service(&self) -> Service {
        Service::Overseerr
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "Overseerr media requests. Find the TMDB id with search_media, then request the movie \
         or show."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        match tool {
            "search_media" => self.search_media(args).await,
            "get_movie_details" => {
                self.client
                    .send_json(UpstreamRequest::get(format!("movie/{}", args.i64("tmdb_id")?)))
                    .await
            }
            "get_tv_show_details" => {
                self.client
                    .send_json(UpstreamRequest::get(format!("tv/{}", args.i64("tmdb_id")?)))
                    .await
            }
            "request_movie" => {
                self.request_media(json!({"mediaType": "movie", "mediaId": args.i64("tmdb_id")?}))
                    .await
            }
            "request_tv_show" => {
                let seasons = seasons_payload(args.value("seasons"))?;
                self.request_media(json!({
                    "mediaType": "tv",
                    "mediaId": args.i64("tmdb_id")?,
                    "seasons": seasons,
                }))
                .await
            }
            "list_failed_requests" => self.list_failed_requests(args).await,
            other => Err(unknown_tool(other)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), UpstreamError> {
        self.client
            .send(UpstreamRequest::get("settings/main"))
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

    fn overseerr(base_url: &str) -> Overseerr {
        let client = UpstreamClient::new(
            UpstreamConfig::new(
                format!("{base_url}/api/v1"),
                AuthStyle::Header("X-Api-Key".to_string()),
            )
            .credential(Some("k".to_string())),
        )
        .expect("client");
        Overseerr::new(client)
    }

    #[tokio::test]
    async fn search_filters_and_reshapes() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!({"page": 1, "results": [
                {"id": 603, "mediaType": "movie", "title": "The Matrix", "releaseDate": "1999-03-30"},
                {"id": 1399, "mediaType": "tv", "name": "Game of Thrones", "firstAirDate": "2011-04-17"},
                {"id": 7, "mediaType": "person", "name": "Someone"}
            ]}),
        )])
        .await
        .expect("mock");
        let adapter = overseerr(upstream.base_url());

        let result = dispatch(
            &adapter,
            "search_media",
            Some(&args(json!({"query": "matrix reloaded", "media_type": "tv"}))),
        )
        .await
        .expect("tool");
        let body = result_body(&result);
        assert_eq!(body[0]["tmdbId"], 1399);
        assert_eq!(body[0]["title"], "Game of Thrones");
        assert_eq!(body[0]["year"], "2011");
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(
            upstream.requests()[0].query_param("query").as_deref(),
            Some("matrix reloaded")
        );
    }

    #[tokio::test]
    async fn empty_search_is_a_message() {
        let upstream = MockUpstream::start(vec![MockResponse::json(200, &json!({"results": []}))])
            .await
            .expect("mock");
        let adapter = overseerr(upstream.base_url());

        let body = adapter
            .call("search_media", &ToolArgs::from_value(json!({"query": "zzz"})))
            .await
            .expect("call");
        assert_eq!(body, json!("No results found for query 'zzz'."));
    }

    #[tokio::test]
    async fn tv_request_defaults_to_all_seasons() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            201,
            &json!({"id": 11, "status": 1, "media": {"tmdbId": 1399}}),
        )])
        .await
        .expect("mock");
        let adapter = overseerr(upstream.base_url());

        adapter
            .call("request_tv_show", &ToolArgs::from_value(json!({"tmdb_id": 1399})))
            .await
            .expect("call");
        let req = &upstream.requests()[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/v1/request");
        assert_eq!(
            req.json_body(),
            Some(json!({"mediaType": "tv", "mediaId": 1399, "seasons": "all"}))
        );
    }

    #[test]
    fn seasons_argument_shapes() {
        assert_eq!(seasons_payload(Some(&json!([1, 2]))).expect("list"), json!([1, 2]));
        assert_eq!(seasons_payload(Some(&json!("ALL"))).expect("all"), json!("all"));
        assert!(seasons_payload(Some(&json!("some"))).is_err());
        assert!(seasons_payload(Some(&json!([-1]))).is_err());
    }

    #[tokio::test]
    async fn failed_requests_are_flattened() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!({"pageInfo": {}, "results": [{
                "id": 5, "status": 3,
                "media": {"mediaType": "movie", "tmdbId": 603},
                "requestedBy": {"displayName": "alex"},
                "createdAt": "2024-01-01", "modifiedAt": "2024-01-02"
            }]}),
        )])
        .await
        .expect("mock");
        let adapter = overseerr(upstream.base_url());

        let body = adapter
            .call("list_failed_requests", &ToolArgs::from_value(json!({"count": 10, "skip": 0})))
            .await
            .expect("call");
        assert_eq!(body[0]["requestId"], 5);
        assert_eq!(body[0]["requested_by"], "alex");
        let req = &upstream.requests()[0];
        assert_eq!(req.query_param("filter").as_deref(), Some("failed"));
        assert_eq!(req.query_param("take").as_deref(), Some("10"));
    }
}
