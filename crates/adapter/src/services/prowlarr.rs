//! Prowlarr indexer manager (`/api/v1`, `X-Api-Key`).

use super::{ServiceAdapter, unknown_tool, upstream_config};
use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yarr_http_tools::reshape::{NOT_AVAILABLE, Records, human_bytes, lenient_f64, or_na};
use yarr_http_tools::{
    AuthStyle, Effect, ParamKind, ParamSpec, ToolArgs, ToolSpec, UpstreamClient, UpstreamError,
    UpstreamRequest,
};

const TIMEOUT: Duration = Duration::from_secs(30);
const INDEXER_ID: ParamSpec =
    ParamSpec::required("indexer_id", ParamKind::int_min(1), "Indexer id");

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_indexers",
        description: "List configured indexers with a short enabled/disabled summary.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_indexer_details",
        description: "Full definition of one indexer.",
        effect: Effect::Read,
        params: &[INDEXER_ID],
    },
    ToolSpec {
        name: "search_releases",
        description: "Search releases across all or selected indexers.",
        effect: Effect::Read,
        params: &[
            ParamSpec::required("query", ParamKind::String, "Search terms"),
            ParamSpec::optional("indexer_ids", ParamKind::IntegerList, "Restrict to these indexers"),
            ParamSpec::optional("categories", ParamKind::IntegerList, "Newznab category ids"),
            ParamSpec::optional(
                "search_type",
                ParamKind::Enum(&["search", "tvsearch", "moviesearch", "musicsearch", "booksearch"]),
                "Search mode",
            )
            .default_str("search"),
            ParamSpec::optional("limit", ParamKind::int_range(1, 1000), "").default_int(50),
            ParamSpec::optional("offset", ParamKind::int_min(0), "").default_int(0),
        ],
    },
    ToolSpec {
        name: "test_indexer",
        description: "Run Prowlarr's connectivity test for one indexer.",
        effect: Effect::Action,
        params: &[INDEXER_ID],
    },
    ToolSpec {
        name: "list_applications",
        description: "List connected *arr applications.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_system_status",
        description: "Prowlarr version, OS and runtime information.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_indexer_categories",
        description: "Indexer category tree.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_history",
        description: "Paged history of grabs and queries.",
        effect: Effect::Read,
        params: &[
            ParamSpec::optional("page", ParamKind::int_min(1), "").default_int(1),
            ParamSpec::optional("page_size", ParamKind::int_range(1, 500), "").default_int(20),
            ParamSpec::optional("sort_key", ParamKind::String, "").default_str("date"),
            ParamSpec::optional(
                "sort_direction",
                ParamKind::Enum(&["ascending", "descending"]),
                "",
            )
            .default_str("descending"),
        ],
    },
    ToolSpec {
        name: "test_all_indexers",
        description: "Test every enabled indexer and summarize failures.",
        effect: Effect::Action,
        params: &[],
    },
    ToolSpec {
        name: "update_indexer",
        description: "Replace an indexer definition (send the full object from get_indexer_details).",
        effect: Effect::Update,
        params: &[
            INDEXER_ID,
            ParamSpec::required("indexer_data", ParamKind::Object, "Complete indexer resource"),
        ],
    },
];

/// The compact indexer view: the full resource carries every field definition.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
struct IndexerRow {
    id: Option<i64>,
    name: Option<String>,
    enable: Option<bool>,
    protocol: Option<String>,
    privacy: Option<String>,
    priority: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Release {
    title: Option<String>,
    indexer: Option<String>,
    indexer_id: Option<i64>,
    #[serde(deserialize_with = "lenient_f64")]
    size: Option<f64>,
    protocol: Option<String>,
    seeders: Option<i64>,
    leechers: Option<i64>,
    publish_date: Option<String>,
    guid: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseSummary {
    title: String,
    indexer: String,
    indexer_id: Option<i64>,
    size: String,
    protocol: String,
    seeders: Option<i64>,
    leechers: Option<i64>,
    publish_date: Option<String>,
    guid: Option<String>,
}

impl From<Release> for ReleaseSummary {
    fn from(r: Release) -> Self {
        Self {
            title: or_na(r.title),
            indexer: or_na(r.indexer),
            indexer_id: r.indexer_id,
            size: r.size.map_or_else(|| NOT_AVAILABLE.to_string(), human_bytes),
            protocol: or_na(r.protocol),
            seeders: r.seeders,
            leechers: r.leechers,
            publish_date: r.publish_date,
            guid: r.guid,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct TestOutcome {
    id: Option<i64>,
    is_valid: Option<bool>,
    message: Option<String>,
    validation_failures: Vec<ValidationFailure>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ValidationFailure {
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HistoryPage {
    records: Vec<IgnoredAny>,
    total_records: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Named {
    name: Option<String>,
}

pub struct Prowlarr {
    client: UpstreamClient,
}

impl Prowlarr {
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

    async fn list_indexers(&self) -> std::result::Result<Value, UpstreamError> {
        let body = self.client.send_json(UpstreamRequest::get("indexer")).await?;
        let indexers = Records::<IndexerRow>::deserialize(&body)?.into_vec();
        let enabled = indexers.iter().filter(|i| i.enable == Some(true)).count();
        Ok(json!({
            "summary": format!("Found {} indexers ({enabled} enabled)", indexers.len()),
            "indexers": indexers,
        }))
    }

    async fn search_releases(&self, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let join = |ids: Vec<i64>| {
            (!ids.is_empty()).then(|| {
                ids.iter()
                    .map(i64::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            })
        };
        let query = args.str("query")?;
        let body = self
            .client
            .send_json(
                UpstreamRequest::get("search")
                    .query("query", query)
                    .query_opt("type", args.opt_str("search_type"))
                    .query_opt("indexerIds", join(args.i64_list("indexer_ids")))
                    .query_opt("categories", join(args.i64_list("categories")))
                    .query_opt("limit", args.opt_i64("limit"))
                    .query_opt("offset", args.opt_i64("offset")),
            )
            .await?;

        let releases: Vec<ReleaseSummary> = Records::<Release>::deserialize(&body)?
            .into_vec()
            .into_iter()
            .map(ReleaseSummary::from)
            .collect();
        Ok(json!({
            "summary": format!("Found {} releases for query '{query}'", releases.len()),
            "releases": releases,
        }))
    }

    async fn test_indexer(&self, id: i64) -> std::result::Result<Value, UpstreamError> {
        let definition = self
            .client
            .send_json(UpstreamRequest::get(format!("indexer/{id}")))
            .await?;
        let name = Named::deserialize(&definition)?
            .name
            .unwrap_or_else(|| id.to_string());

        let outcome = self
            .client
            .send_json(UpstreamRequest::post("indexer/test").json(definition))
            .await?;
        // Success is an empty body; only an object carries a verdict.
        let verdict = Option::<TestOutcome>::deserialize(&outcome)
            .ok()
            .flatten()
            .unwrap_or_default();
        let valid = verdict.is_valid.unwrap_or(true);
        let message = verdict.message.unwrap_or_else(|| {
            let fallback = if valid { "Test completed." } else { "Test reported as not valid." };
            fallback.to_string()
        });
        Ok(json!({
            "summary": format!("Test for indexer '{name}': {message}"),
            "status": if valid { "success" } else { "error" },
            "details": outcome,
        }))
    }

    async fn test_all_indexers(&self) -> std::result::Result<Value, UpstreamError> {
        let body = self
            .client
            .send_json(UpstreamRequest::post("indexer/testall"))
            .await?;
        if !body.is_array() {
            return Ok(json!({"summary": "Test of all indexers sent.", "status": "unknown", "details": body}));
        }
        let results = Vec::<TestOutcome>::deserialize(&body)?;

        let failures: Vec<String> = results
            .iter()
            .filter(|r| r.is_valid != Some(true))
            .map(|r| {
                let id = r.id.map_or_else(|| "unknown".to_string(), |id| id.to_string());
                let message = r
                    .validation_failures
                    .first()
                    .and_then(|f| f.error_message.as_deref())
                    .or(r.message.as_deref())
                    .unwrap_or("Test failed.");
                format!("Indexer ID {id}: {message}")
            })
            .collect();

        let mut summary = format!(
            "Tested {} indexers. Passed: {}, Failed: {}.",
            results.len(),
            results.len() - failures.len(),
            failures.len()
        );
        if !failures.is_empty() {
            summary.push_str(" Failures: ");
            summary.push_str(&failures.join("; "));
        }
        Ok(json!({
            "summary": summary,
            "status": if failures.is_empty() { "success" } else { "partial_success" },
            "details": body,
        }))
    }

    async fn get_history(&self, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let page = self
            .client
            .send_json(
                UpstreamRequest::get("history")
                    .query_opt("page", args.opt_i64("page"))
                    .query_opt("pageSize", args.opt_i64("page_size"))
                    .query_opt("sortKey", args.opt_str("sort_key"))
                    .query_opt("sortDirection", args.opt_str("sort_direction")),
            )
            .await?;
        let counts = HistoryPage::deserialize(&page)?;
        let total = counts.total_records.unwrap_or(0);
        Ok(json!({
            "summary": format!("Retrieved {} history events (total {total})", counts.records.len()),
            "history_page": page,
        }))
    }
}

#[async_trait]
impl ServiceAdapter for Prowlarr {
    fn service(&self) -> Service {
        Service::Prowlarr
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "Prowlarr indexer management: list and test indexers, search releases, read history."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let c = &self.client;
        match tool {
            "list_indexers" => self.list_indexers().await,
            "get_indexer_details" => {
                c.send_json(UpstreamRequest::get(format!("indexer/{}", args.i64("indexer_id")?)))
                    .await
            }
            "search_releases" => self.search_releases(args).await,
            "test_indexer" => self.test_indexer(args.i64("indexer_id")?).await,
            "list_applications" => c.send_json(UpstreamRequest::get("applications")).await,
            "get_system_status" => c.send_json(UpstreamRequest::get("system/status")).await,
            "get_indexer_categories" => {
                c.send_json(UpstreamRequest::get("indexer/categories")).await
            }
            "get_history" => self.get_history(args).await,
            "test_all_indexers" => self.test_all_indexers().await,
            "update_indexer" => {
                let id = args.i64("indexer_id")?;
                let data = args
                    .value("indexer_data")
                    .cloned()
                    .ok_or_else(|| UpstreamError::validation("missing required parameter 'indexer_data'"))?;
                c.send_json(UpstreamRequest::put(format!("indexer/{id}")).json(data))
                    .await
            }
            other => Err(unknown_tool(other)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), UpstreamError> {
        self.client
            .send(UpstreamRequest::get("system/status"))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::dispatch;
    use crate::services::testing::{args, is_error, result_body};
    use yarr_http_tools::UpstreamConfig;
    use yarr_test_support::{MockResponse, MockUpstream};

    fn prowlarr(base_url: &str, key: Option<&str>) -> Prowlarr {
        let client = UpstreamClient::new(
            UpstreamConfig::new(
                format!("{base_url}/api/v1"),
                AuthStyle::Header("X-Api-Key".to_string()),
            )
            .credential(key.map(str::to_string)),
        )
        .expect("client");
        Prowlarr::new(client)
    }

    #[tokio::test]
    async fn list_indexers_without_key_makes_no_http_call() {
        let upstream = MockUpstream::start(vec![MockResponse::json(200, &json!([]))])
            .await
            .expect("mock");
        let adapter = prowlarr(upstream.base_url(), None);

        let result = dispatch(&adapter, "list_indexers", None).await.expect("tool");
        assert!(is_error(&result));
        assert_eq!(result_body(&result)["error"], "AuthenticationMissing");
        assert_eq!(upstream.hits(), 0);

        assert!(matches!(
            adapter.health_check().await,
            Err(UpstreamError::AuthenticationMissing(_))
        ));
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn list_indexers_summarizes() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!([
                {"id": 1, "name": "NZBgeek", "enable": true, "protocol": "usenet", "fields": []},
                {"id": 2, "name": "1337x", "enable": false, "protocol": "torrent"}
            ]),
        )])
        .await
        .expect("mock");
        let adapter = prowlarr(upstream.base_url(), Some("key"));

        let result = dispatch(&adapter, "list_indexers", None).await.expect("tool");
        let body = result_body(&result);
        assert_eq!(body["summary"], "Found 2 indexers (1 enabled)");
        assert_eq!(body["indexers"][0]["name"], "NZBgeek");
        assert!(body["indexers"][0].get("fields").is_none());

        let req = &upstream.requests()[0];
        assert_eq!(req.path, "/api/v1/indexer");
        assert_eq!(req.header("x-api-key"), Some("key"));
    }

    #[tokio::test]
    async fn listing_twice_gives_the_same_answer() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!({"records": [
                {"id": 1, "name": "NZBgeek", "enable": true, "protocol": "usenet", "priority": 25},
                {"id": 2, "name": "1337x", "enable": false, "privacy": "public"}
            ]}),
        )])
        .await
        .expect("mock");
        let adapter = prowlarr(upstream.base_url(), Some("key"));

        let first = dispatch(&adapter, "list_indexers", None).await.expect("tool");
        let second = dispatch(&adapter, "list_indexers", None).await.expect("tool");
        assert_eq!(result_body(&first), result_body(&second));
        assert_eq!(
            result_body(&first)["indexers"][1],
            json!({"id": 2, "name": "1337x", "enable": false, "protocol": null, "privacy": "public", "priority": null})
        );
        assert_eq!(upstream.hits(), 2);
    }

    #[tokio::test]
    async fn search_joins_id_lists() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!([{"title": "Some.Show.S01", "indexer": "NZBgeek", "size": 1_073_741_824u64}]),
        )])
        .await
        .expect("mock");
        let adapter = prowlarr(upstream.base_url(), Some("key"));

        let result = dispatch(
            &adapter,
            "search_releases",
            Some(&args(json!({"query": "some show", "indexer_ids": [1, 4], "categories": 5000}))),
        )
        .await
        .expect("tool");
        let body = result_body(&result);
        assert_eq!(body["releases"][0]["size"], "1.00 GiB");

        let req = &upstream.requests()[0];
        assert_eq!(req.query_param("indexerIds").as_deref(), Some("1,4"));
        assert_eq!(req.query_param("categories").as_deref(), Some("5000"));
        assert_eq!(req.query_param("type").as_deref(), Some("search"));
        assert_eq!(req.query_param("limit").as_deref(), Some("50"));
    }

    #[tokio::test]
    async fn test_all_reports_failures() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!([
                {"id": 1, "isValid": true},
                {"id": 2, "isValid": false, "validationFailures": [{"errorMessage": "timeout"}]}
            ]),
        )])
        .await
        .expect("mock");
        let adapter = prowlarr(upstream.base_url(), Some("key"));

        let body = adapter
            .call("test_all_indexers", &ToolArgs::default())
            .await
            .expect("call");
        assert_eq!(body["status"], "partial_success");
        assert_eq!(
            body["summary"],
            "Tested 2 indexers. Passed: 1, Failed: 1. Failures: Indexer ID 2: timeout"
        );
    }

    #[tokio::test]
    async fn test_indexer_posts_fetched_definition() {
        let definition = json!({"id": 3, "name": "Tracker", "fields": [{"name": "baseUrl"}]});
        let upstream = MockUpstream::start(vec![
            MockResponse::json(200, &definition),
            MockResponse::empty(200),
        ])
        .await
        .expect("mock");
        let adapter = prowlarr(upstream.base_url(), Some("key"));

        let body = adapter
            .call("test_indexer", &ToolArgs::from_value(json!({"indexer_id": 3})))
            .await
            .expect("call");
        assert_eq!(body["status"], "success");
        let reqs = upstream.requests();
        assert_eq!(reqs[1].path, "/api/v1/indexer/test");
        assert_eq!(reqs[1].json_body(), Some(definition));
    }
}
