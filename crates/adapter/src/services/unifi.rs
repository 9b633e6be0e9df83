//! UniFi Site Manager cloud API (`api.ui.com`).
//!
//! Every response is an envelope `{ data, httpStatusCode, nextToken, ... }`. A 2xx envelope can
//! still carry `httpStatusCode >= 400`; that is reported as an application error. List endpoints
//! are followed through `nextToken` until exhausted. Early Access endpoints live under `/ea`.

use super::{ServiceAdapter, unknown_tool, upstream_config};
use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yarr_http_tools::{
    AuthStyle, Effect, Page, ParamKind, ParamSpec, RateLimitPolicy, ToolArgs, ToolSpec,
    UpstreamClient, UpstreamError, UpstreamRequest,
};

const TIMEOUT: Duration = Duration::from_secs(60);
const MAX_PAGES: usize = 100;

const PAGE_SIZE: ParamSpec =
    ParamSpec::optional("page_size", ParamKind::int_range(1, 500), "Items per page").default_int(50);
const METRIC_TYPE: ParamSpec = ParamSpec::required(
    "metric_type",
    ParamKind::Enum(&["5m", "1h"]),
    "Metric granularity",
);
const CONFIG_ID: ParamSpec =
    ParamSpec::required("config_id", ParamKind::String, "SD-WAN configuration id");

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_hosts",
        description: "All hosts (consoles and network servers) on the account. Follows pagination.",
        effect: Effect::Read,
        params: &[PAGE_SIZE],
    },
    ToolSpec {
        name: "get_host_by_id",
        description: "Details of one host.",
        effect: Effect::Read,
        params: &[ParamSpec::required("host_id", ParamKind::String, "Host id")],
    },
    ToolSpec {
        name: "list_sites",
        description: "All sites on the account. Follows pagination.",
        effect: Effect::Read,
        params: &[PAGE_SIZE],
    },
    ToolSpec {
        name: "list_devices",
        description: "All UniFi devices, flattened across hosts (each tagged with hostId and hostName).",
        effect: Effect::Read,
        params: &[
            ParamSpec::optional("host_ids", ParamKind::StringList, "Only these hosts"),
            ParamSpec::optional("time", ParamKind::String, "RFC 3339 point in time"),
            PAGE_SIZE,
        ],
    },
    ToolSpec {
        name: "get_isp_metrics",
        description: "(Early Access) ISP metrics for all sites. Use duration or a timestamp range, not both.",
        effect: Effect::Read,
        params: &[
            METRIC_TYPE,
            ParamSpec::optional("begin_timestamp", ParamKind::String, "RFC 3339"),
            ParamSpec::optional("end_timestamp", ParamKind::String, "RFC 3339"),
            ParamSpec::optional("duration", ParamKind::String, "e.g. 24h, 7d, 30d"),
        ],
    },
    ToolSpec {
        name: "query_isp_metrics",
        description: "(Early Access) ISP metrics for specific sites. Each query names siteId, hostId and optional timestamps.",
        effect: Effect::Read,
        params: &[
            METRIC_TYPE,
            ParamSpec::required("sites_query", ParamKind::ObjectList, "List of site queries"),
        ],
    },
    ToolSpec {
        name: "list_sdwan_configs",
        description: "(Early Access) All SD-WAN configurations.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_sdwan_config_by_id",
        description: "(Early Access) One SD-WAN configuration.",
        effect: Effect::Read,
        params: &[CONFIG_ID],
    },
    ToolSpec {
        name: "get_sdwan_config_status",
        description: "(Early Access) Deployment status of one SD-WAN configuration.",
        effect: Effect::Read,
        params: &[CONFIG_ID],
    },
];

pub struct Unifi {
    client: UpstreamClient,
}

/// Envelope fields around `data`; `data` itself is passed through untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Envelope {
    http_status_code: Option<i64>,
    code: Option<String>,
    message: Option<String>,
    next_token: Option<String>,
}

impl Envelope {
    fn of(body: &Value) -> std::result::Result<Self, UpstreamError> {
        if body.is_object() {
            Ok(Self::deserialize(body)?)
        } else {
            Ok(Self::default())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HostDevices {
    host_id: Option<String>,
    host_name: Option<String>,
    devices: Option<Vec<Value>>,
}

/// Strip the envelope, turning an in-body error status into an error.
fn unwrap_envelope(body: Value) -> std::result::Result<Value, UpstreamError> {
    let envelope = Envelope::of(&body)?;
    if let Some(code) = envelope.http_status_code
        && code >= 400
    {
        return Err(UpstreamError::application(format!(
            "API error ({code}) {}: {}",
            envelope.code.unwrap_or_default(),
            envelope.message.as_deref().unwrap_or("unknown error")
        )));
    }
    match body {
        Value::Object(mut map) if map.contains_key("data") => {
            Ok(map.remove("data").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

fn split_page(body: Value) -> std::result::Result<Page, UpstreamError> {
    let next_token = Envelope::of(&body)?.next_token;
    let items = match unwrap_envelope(body)? {
        Value::Array(items) => items,
        Value::Object(mut data) => match data.remove("metrics") {
            Some(Value::Array(metrics)) => metrics,
            Some(other) => {
                data.insert("metrics".to_string(), other);
                vec![Value::Object(data)]
            }
            None if data.is_empty() => Vec::new(),
            None => vec![Value::Object(data)],
        },
        Value::Null => Vec::new(),
        other => vec![other],
    };
    Ok(Page { items, next_token })
}

fn flatten_devices(host_entries: Vec<Value>) -> std::result::Result<Vec<Value>, UpstreamError> {
    let mut devices = Vec::new();
    for entry in host_entries {
        let host: HostDevices = serde_json::from_value(entry)?;
        for mut device in host.devices.unwrap_or_default() {
            if let Value::Object(map) = &mut device {
                map.insert("hostId".to_string(), json!(host.host_id));
                map.insert("hostName".to_string(), json!(host.host_name));
            }
            devices.push(device);
        }
    }
    Ok(devices)
}

impl Unifi {
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
            "",
            AuthStyle::Header("X-API-Key".to_string()),
            TIMEOUT,
            cancel,
        )
        .rate_limit(RateLimitPolicy::standard())
        .header("Accept", "application/json");
        Ok(Self::new(UpstreamClient::new(upstream)?))
    }

    async fn get(&self, request: UpstreamRequest) -> std::result::Result<Value, UpstreamError> {
        unwrap_envelope(self.client.send_json(request).await?)
    }

    async fn list(&self, request: UpstreamRequest) -> std::result::Result<Vec<Value>, UpstreamError> {
        self.client.paginate(request, MAX_PAGES, split_page).await
    }

    fn isp_metrics_request(args: &ToolArgs) -> std::result::Result<UpstreamRequest, UpstreamError> {
        let metric_type = args.str("metric_type")?;
        let begin = args.opt_str("begin_timestamp");
        let end = args.opt_str("end_timestamp");
        let duration = args.opt_str("duration");
        if duration.is_some() && (begin.is_some() || end.is_some()) {
            return Err(UpstreamError::validation(
                "use either duration or begin_timestamp/end_timestamp, not both",
            ));
        }
        Ok(UpstreamRequest::get("/ea/isp-metrics").segment(metric_type)
            .query_opt("beginTimestamp", begin)
            .query_opt("endTimestamp", end)
            .query_opt("duration", duration))
    }
}

#[async_trait]
impl ServiceAdapter for Unifi {
    fn service(&self) -> Service {
        Service::Unifi
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "UniFi Site Manager (api.ui.com). List tools fetch every page. Early Access endpoints \
         (ISP metrics, SD-WAN) may change without notice."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        match tool {
            "list_hosts" => Ok(Value::Array(
                self.list(UpstreamRequest::get("/v1/hosts").query_opt("pageSize", args.opt_i64("page_size")))
                    .await?,
            )),
            "get_host_by_id" => {
                self.get(UpstreamRequest::get("/v1/hosts").segment(args.str("host_id")?))
                    .await
            }
            "list_sites" => Ok(Value::Array(
                self.list(UpstreamRequest::get("/v1/sites").query_opt("pageSize", args.opt_i64("page_size")))
                    .await?,
            )),
            "list_devices" => {
                let mut request = UpstreamRequest::get("/v1/devices");
                for id in args.str_list("host_ids") {
                    request = request.query("hostIds[]", id);
                }
                request = request
                    .query_opt("time", args.opt_str("time"))
                    .query_opt("pageSize", args.opt_i64("page_size"));
                Ok(Value::Array(flatten_devices(self.list(request).await?)?))
            }
            "get_isp_metrics" => self.get(Self::isp_metrics_request(args)?).await,
            "query_isp_metrics" => {
                let metric_type = args.str("metric_type")?;
                let sites = args.value("sites_query").cloned().unwrap_or(json!([]));
                if sites.as_array().is_none_or(Vec::is_empty) {
                    return Err(UpstreamError::validation("sites_query must not be empty"));
                }
                self.get(
                    UpstreamRequest::post("/ea/isp-metrics")
                        .segment(metric_type)
                        .segment("query")
                        .json(json!({ "sites": sites })),
                )
                .await
            }
            "list_sdwan_configs" => self.get(UpstreamRequest::get("/ea/sd-wan-configs")).await,
            "get_sdwan_config_by_id" => {
                self.get(UpstreamRequest::get("/ea/sd-wan-configs").segment(args.str("config_id")?))
                    .await
            }
            "get_sdwan_config_status" => {
                self.get(
                    UpstreamRequest::get("/ea/sdwan/configurations")
                        .segment(args.str("config_id")?)
                        .segment("status"),
                )
                .await
            }
            other => Err(unknown_tool(other)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), UpstreamError> {
        self.get(UpstreamRequest::get("/v1/hosts").query("pageSize", 1))
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

    fn unifi(base_url: &str) -> Unifi {
        let client = UpstreamClient::new(
            UpstreamConfig::new(base_url, AuthStyle::Header("X-API-Key".to_string()))
                .credential(Some("key".to_string()))
                .rate_limit(RateLimitPolicy {
                    max_retries: 3,
                    default_wait: Duration::from_millis(20),
                    max_wait: Duration::from_millis(100),
                }),
        )
        .expect("client");
        Unifi::new(client)
    }

    #[tokio::test]
    async fn hosts_follow_next_token_through_rate_limits() {
        let upstream = MockUpstream::start(vec![
            MockResponse::json(
                200,
                &json!({"data": [{"id": "h1"}], "httpStatusCode": 200, "nextToken": "abc"}),
            ),
            MockResponse::empty(429).with_header("Retry-After", "0"),
            MockResponse::json(200, &json!({"data": [{"id": "h2"}], "httpStatusCode": 200})),
        ])
        .await
        .expect("mock");
        let adapter = unifi(upstream.base_url());

        let result = dispatch(&adapter, "list_hosts", Some(&args(json!({"page_size": 1}))))
            .await
            .expect("tool");
        assert_eq!(result_body(&result), json!([{"id": "h1"}, {"id": "h2"}]));

        let reqs = upstream.requests();
        assert_eq!(reqs.len(), 3);
        assert_eq!(reqs[0].header("x-api-key"), Some("key"));
        assert_eq!(reqs[2].query_param("nextToken").as_deref(), Some("abc"));
        assert_eq!(reqs[2].query_param("pageSize"), None);
    }

    #[tokio::test]
    async fn devices_are_flattened_with_host_context() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!({"data": [
                {"hostId": "h1", "hostName": "UDM", "devices": [{"mac": "aa"}, {"mac": "bb"}]},
                {"hostId": "h2", "hostName": "CK", "devices": []},
                {"hostId": "h3"}
            ]}),
        )])
        .await
        .expect("mock");
        let adapter = unifi(upstream.base_url());

        let body = adapter
            .call("list_devices", &ToolArgs::from_value(json!({"host_ids": ["h1", "h2"]})))
            .await
            .expect("call");
        assert_eq!(
            body,
            json!([
                {"mac": "aa", "hostId": "h1", "hostName": "UDM"},
                {"mac": "bb", "hostId": "h1", "hostName": "UDM"}
            ])
        );
        let req = &upstream.requests()[0];
        assert_eq!(req.query_param("hostIds[]").as_deref(), Some("h1"));
        assert!(req.query.contains("h2"));
    }

    #[tokio::test]
    async fn in_body_error_status_is_an_error() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!({"httpStatusCode": 404, "code": "NOT_FOUND", "message": "host not found"}),
        )])
        .await
        .expect("mock");
        let adapter = unifi(upstream.base_url());

        let result = dispatch(&adapter, "get_host_by_id", Some(&args(json!({"host_id": "nope"}))))
            .await
            .expect("tool");
        assert!(is_error(&result));
        let body = result_body(&result);
        assert_eq!(body["error"], "UpstreamApplicationError");
        assert!(body["errorDescription"].as_str().expect("text").contains("host not found"));
    }

    #[tokio::test]
    async fn isp_metrics_rejects_duration_with_timestamps() {
        let upstream = MockUpstream::start(vec![MockResponse::json(200, &json!({"data": []}))])
            .await
            .expect("mock");
        let adapter = unifi(upstream.base_url());

        let result = dispatch(
            &adapter,
            "get_isp_metrics",
            Some(&args(json!({"metric_type": "1h", "duration": "24h", "begin_timestamp": "2024-01-01T00:00:00Z"}))),
        )
        .await
        .expect("tool");
        assert_eq!(result_body(&result)["error"], "LocalValidationError");

        let result = dispatch(
            &adapter,
            "get_isp_metrics",
            Some(&args(json!({"metric_type": "15m"}))),
        )
        .await
        .expect("tool");
        assert_eq!(result_body(&result)["errorCode"], 400);
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn query_isp_metrics_wraps_sites() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!({"data": {"metrics": [], "status": "partialSuccess"}}),
        )])
        .await
        .expect("mock");
        let adapter = unifi(upstream.base_url());

        let sites = json!([{"siteId": "s1", "hostId": "h1"}]);
        let body = adapter
            .call(
                "query_isp_metrics",
                &ToolArgs::from_value(json!({"metric_type": "5m", "sites_query": sites})),
            )
            .await
            .expect("call");
        assert_eq!(body["status"], "partialSuccess");
        let req = &upstream.requests()[0];
        assert_eq!(req.path, "/ea/isp-metrics/5m/query");
        assert_eq!(req.json_body(), Some(json!({"sites": sites})));
    }

    #[tokio::test]
    async fn config_ids_are_encoded_as_one_segment() {
        let upstream = MockUpstream::start(vec![MockResponse::json(200, &json!({"data": {}}))])
            .await
            .expect("mock");
        let adapter = unifi(upstream.base_url());

        adapter
            .call(
                "get_sdwan_config_status",
                &ToolArgs::from_value(json!({"config_id": "../../v1/hosts?x=1"})),
            )
            .await
            .expect("call");
        assert_eq!(
            upstream.requests()[0].path,
            "/ea/sdwan/configurations/..%2F..%2Fv1%2Fhosts%3Fx=1/status"
        );
    }

    #[test]
    fn split_page_handles_metric_objects() {
        let page = split_page(json!({"data": {"metrics": [{"a": 1}]}, "nextToken": "n"}))
            .expect("page");
        assert_eq!(page.items, vec![json!({"a": 1})]);
        assert_eq!(page.next_token.as_deref(), Some("n"));

        let page = split_page(json!({"data": null})).expect("page");
        assert!(page.items.is_empty());
    }
}
