//! Portainer (`/api`, `X-API-Key`). Container operations go through Portainer's Docker proxy at
//! `/endpoints/{id}/docker/...`.

use super::{ServiceAdapter, unknown_tool, upstream_config};
use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yarr_http_tools::docker_stream::demux;
use yarr_http_tools::reshape::{NOT_AVAILABLE, lenient_f64, or_na, round2};
use yarr_http_tools::{
    AuthStyle, Effect, ParamKind, ParamSpec, ToolArgs, ToolSpec, UpstreamClient, UpstreamError,
    UpstreamRequest, UpstreamResponse,
};

const TIMEOUT: Duration = Duration::from_secs(30);

const ENDPOINT_ID: ParamSpec =
    ParamSpec::required("endpoint_id", ParamKind::int_min(1), "Environment (endpoint) id");
const CONTAINER_ID: ParamSpec =
    ParamSpec::required("container_id", ParamKind::String, "Container id or name");
const STACK_ID: ParamSpec = ParamSpec::required("stack_id", ParamKind::int_min(1), "Stack id");

const CONTAINER_ACTIONS: &[&str] = &["start", "stop", "restart", "pause", "unpause", "kill", "remove"];

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_endpoints",
        description: "Environments (endpoints) visible to the API key.",
        effect: Effect::Read,
        params: &[
            ParamSpec::optional("search", ParamKind::String, "Name filter"),
            ParamSpec::optional("group_ids", ParamKind::IntegerList, ""),
            ParamSpec::optional("tag_ids", ParamKind::IntegerList, ""),
            ParamSpec::optional(
                "types",
                ParamKind::IntegerList,
                "1 Docker, 2 Agent, 3 Azure ACI, 4 Edge Agent, 5 Kubernetes",
            ),
        ],
    },
    ToolSpec {
        name: "get_endpoint_details",
        description: "One environment with its latest snapshot figures.",
        effect: Effect::Read,
        params: &[ENDPOINT_ID],
    },
    ToolSpec {
        name: "list_docker_containers",
        description: "Containers in a Docker environment.",
        effect: Effect::Read,
        params: &[
            ENDPOINT_ID,
            ParamSpec::optional("all_containers", ParamKind::Boolean, "Include stopped containers")
                .default_bool(false),
            ParamSpec::optional(
                "filters",
                ParamKind::String,
                "Docker filters as a JSON string, e.g. {\"name\": [\"web\"]}",
            ),
        ],
    },
    ToolSpec {
        name: "inspect_docker_container",
        description: "Readable summary of one container (state, image, ports, mounts, env).",
        effect: Effect::Read,
        params: &[ENDPOINT_ID, CONTAINER_ID],
    },
    ToolSpec {
        name: "manage_docker_container",
        description: "Start, stop, restart, pause, unpause, kill or remove a container.",
        effect: Effect::Action,
        params: &[
            ENDPOINT_ID,
            CONTAINER_ID,
            ParamSpec::required("action", ParamKind::Enum(CONTAINER_ACTIONS), ""),
        ],
    },
    ToolSpec {
        name: "get_docker_container_logs",
        description: "Container logs as plain text.",
        effect: Effect::Read,
        params: &[
            ENDPOINT_ID,
            CONTAINER_ID,
            ParamSpec::optional("tail", ParamKind::String, "Line count or \"all\"").default_str("100"),
            ParamSpec::optional("since", ParamKind::String, "Unix timestamp or relative duration"),
            ParamSpec::optional("timestamps", ParamKind::Boolean, "").default_bool(false),
        ],
    },
    ToolSpec {
        name: "list_stacks",
        description: "Compose, Swarm and Kubernetes stacks.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "inspect_stack",
        description: "Details of one stack.",
        effect: Effect::Read,
        params: &[STACK_ID],
    },
    ToolSpec {
        name: "get_stack_file",
        description: "Compose file content of one stack.",
        effect: Effect::Read,
        params: &[STACK_ID],
    },
];

fn endpoint_type(code: Option<i64>) -> &'static str {
    match code {
        Some(1) => "Docker",
        Some(2) => "Agent on Docker",
        Some(3) => "Azure ACI",
        Some(4) => "Edge Agent",
        Some(5) => "Kubernetes Local",
        Some(6) => "Edge Kubernetes",
        Some(7) => "KaaS",
        _ => "Unknown",
    }
}

fn endpoint_status(code: Option<i64>) -> &'static str {
    match code {
        Some(1) => "Up",
        Some(2) => "Down",
        Some(3) => "Troubled",
        _ => "Unknown",
    }
}

fn stack_type(code: Option<i64>) -> &'static str {
    match code {
        Some(1) => "Swarm",
        Some(2) => "Compose",
        Some(3) => "Kubernetes",
        _ => "Unknown",
    }
}

fn stack_status(code: Option<i64>) -> &'static str {
    match code {
        Some(1) => "Active",
        Some(2) => "Inactive",
        _ => "Unknown",
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Endpoint {
    id: Option<i64>,
    name: Option<String>,
    #[serde(rename = "Type")]
    kind: Option<i64>,
    status: Option<i64>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(rename = "PublicURL")]
    public_url: Option<String>,
    group_id: Option<i64>,
    tag_ids: Option<Vec<i64>>,
    snapshots: Option<Vec<Snapshot>>,
    /// Opaque; passed through as reported.
    platform: Option<Value>,
    kubernetes: Option<Kubernetes>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Snapshot {
    docker_version: Option<String>,
    #[serde(rename = "TotalCPU")]
    total_cpu: Option<i64>,
    #[serde(deserialize_with = "lenient_f64")]
    total_memory: Option<f64>,
    container_count: Option<i64>,
    image_count: Option<i64>,
    volume_count: Option<i64>,
    stack_count: Option<i64>,
    platform: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Kubernetes {
    snapshots: Option<Vec<KubernetesSnapshot>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct KubernetesSnapshot {
    kubernetes_version: Option<String>,
    node_count: Option<i64>,
}

#[derive(Debug, Serialize)]
struct EndpointSummary {
    id: Option<i64>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: &'static str,
    status: &'static str,
    url: String,
}

impl From<Endpoint> for EndpointSummary {
    fn from(ep: Endpoint) -> Self {
        Self {
            id: ep.id,
            name: ep.name,
            kind: endpoint_type(ep.kind),
            status: endpoint_status(ep.status),
            url: or_na(ep.url),
        }
    }
}

#[derive(Debug, Serialize)]
struct SnapshotDetails {
    docker_version: Option<String>,
    total_cpu: Option<i64>,
    total_memory_gb: f64,
    container_count: Option<i64>,
    image_count: Option<i64>,
    volume_count: Option<i64>,
    stack_count: Option<i64>,
}

#[derive(Debug, Serialize)]
struct KubernetesDetails {
    kubernetes_version: Option<String>,
    node_count: Option<i64>,
}

#[derive(Debug, Serialize)]
struct EndpointDetails {
    id: Option<i64>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: &'static str,
    status: &'static str,
    url: Option<String>,
    public_url: Option<String>,
    group_id: Option<i64>,
    tags: Vec<i64>,
    #[serde(flatten)]
    snapshot: Option<SnapshotDetails>,
    platform: Value,
    #[serde(flatten)]
    kubernetes: Option<KubernetesDetails>,
}

fn endpoint_details(ep: Endpoint) -> EndpointDetails {
    let snapshot = ep.snapshots.and_then(|list| list.into_iter().next());
    // Platform is only meaningful for plain Docker environments.
    let platform = ep
        .platform
        .or_else(|| snapshot.as_ref().and_then(|s| s.platform.clone()))
        .filter(|_| ep.kind == Some(1))
        .unwrap_or_else(|| json!(NOT_AVAILABLE));
    let kubernetes = ep
        .kubernetes
        .filter(|_| matches!(ep.kind, Some(5..=7)))
        .and_then(|k| k.snapshots)
        .and_then(|list| list.into_iter().next())
        .map(|k| KubernetesDetails {
            kubernetes_version: k.kubernetes_version,
            node_count: k.node_count,
        });
    EndpointDetails {
        id: ep.id,
        name: ep.name,
        kind: endpoint_type(ep.kind),
        status: endpoint_status(ep.status),
        url: ep.url,
        public_url: ep.public_url,
        group_id: ep.group_id,
        tags: ep.tag_ids.unwrap_or_default(),
        snapshot: snapshot.map(|s| SnapshotDetails {
            docker_version: s.docker_version,
            total_cpu: s.total_cpu,
            total_memory_gb: s.total_memory.map_or(0.0, |b| round2(b / 1024f64.powi(3))),
            container_count: s.container_count,
            image_count: s.image_count,
            volume_count: s.volume_count,
            stack_count: s.stack_count,
        }),
        platform,
        kubernetes,
    }
}

/// `docker inspect` output, reduced to what the summary reads.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ContainerInspect {
    id: Option<String>,
    name: Option<String>,
    created: Option<String>,
    config: Option<ContainerConfig>,
    state: Option<ContainerState>,
    network_settings: Option<NetworkSettings>,
    mounts: Option<Vec<Mount>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ContainerConfig {
    image: Option<String>,
    cmd: Option<Vec<String>>,
    entrypoint: Option<Vec<String>>,
    env: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct ContainerState {
    status: Option<String>,
    running: Option<bool>,
    started_at: Option<String>,
    finished_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(rename = "IPAddress")]
    ip_address: Option<String>,
    networks: Option<BTreeMap<String, Network>>,
    ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Network {
    #[serde(rename = "IPAddress")]
    ip_address: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct PortBinding {
    host_ip: Option<String>,
    host_port: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Mount {
    source: Option<String>,
    destination: Option<String>,
    #[serde(rename = "RW")]
    rw: Option<bool>,
}

/// A collection, or `"N/A"` in its place when empty.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OrNa<T> {
    Items(T),
    Empty(&'static str),
}

impl<T> OrNa<T> {
    fn new(items: T, empty: bool) -> Self {
        if empty {
            Self::Empty(NOT_AVAILABLE)
        } else {
            Self::Items(items)
        }
    }
}

#[derive(Debug, Serialize)]
struct StateSummary {
    status: String,
    running: bool,
    started_at: String,
    finished_at: String,
}

#[derive(Debug, Serialize)]
struct ContainerSummary {
    id: String,
    name: String,
    image: String,
    created: String,
    state: StateSummary,
    command: String,
    entrypoint: String,
    ip_address: String,
    ports: OrNa<BTreeMap<String, String>>,
    mounts: OrNa<Vec<String>>,
    env_vars: OrNa<Vec<String>>,
}

fn joined(parts: Option<Vec<String>>) -> String {
    or_na(parts.map(|p| p.join(" ")))
}

fn container_summary(c: ContainerInspect) -> ContainerSummary {
    let config = c.config.unwrap_or_default();
    let state = c.state.unwrap_or_default();
    let network = c.network_settings.unwrap_or_default();
    let running = state.running.unwrap_or(false);

    let ip = network
        .ip_address
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            network
                .networks
                .as_ref()
                .and_then(|nets| nets.values().next())
                .and_then(|n| n.ip_address.clone())
        });

    let ports: BTreeMap<String, String> = network
        .ports
        .unwrap_or_default()
        .into_iter()
        .map(|(port, hosts)| {
            let rendered = match hosts {
                Some(list) if !list.is_empty() => list
                    .iter()
                    .map(|b| {
                        format!(
                            "{}:{}",
                            b.host_ip.as_deref().unwrap_or("0.0.0.0"),
                            b.host_port.as_deref().unwrap_or("")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                _ => "Not published".to_string(),
            };
            (port, rendered)
        })
        .collect();

    let mounts: Vec<String> = c
        .mounts
        .unwrap_or_default()
        .into_iter()
        .map(|m| {
            format!(
                "{} -> {} ({})",
                m.source.as_deref().unwrap_or(NOT_AVAILABLE),
                m.destination.as_deref().unwrap_or(NOT_AVAILABLE),
                if m.rw == Some(false) { "ro" } else { "rw" }
            )
        })
        .collect();
    let env = config.env.unwrap_or_default();
    let (no_ports, no_mounts, no_env) = (ports.is_empty(), mounts.is_empty(), env.is_empty());

    ContainerSummary {
        id: or_na(c.id.map(|id| id.chars().take(12).collect())),
        name: or_na(c.name.map(|n| n.trim_start_matches('/').to_string())),
        image: or_na(config.image),
        created: or_na(c.created),
        state: StateSummary {
            status: or_na(state.status),
            running,
            started_at: or_na(state.started_at),
            finished_at: if running { NOT_AVAILABLE.to_string() } else { or_na(state.finished_at) },
        },
        command: joined(config.cmd),
        entrypoint: joined(config.entrypoint),
        ip_address: or_na(ip),
        ports: OrNa::new(ports, no_ports),
        mounts: OrNa::new(mounts, no_mounts),
        env_vars: OrNa::new(env, no_env),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct Stack {
    id: Option<i64>,
    name: Option<String>,
    #[serde(rename = "Type")]
    kind: Option<i64>,
    endpoint_id: Option<i64>,
    status: Option<i64>,
    creation_date: Option<i64>,
    created_by: Option<String>,
    update_date: Option<i64>,
    updated_by: Option<String>,
    entry_point: Option<String>,
    project_path: Option<String>,
    env: Option<Vec<IgnoredAny>>,
    git_config: Option<GitConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GitConfig {
    #[serde(rename = "URL")]
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct StackSummary {
    id: Option<i64>,
    name: Option<String>,
    #[serde(rename = "type")]
    kind: &'static str,
    endpoint_id: Option<i64>,
    status: &'static str,
}

impl From<&Stack> for StackSummary {
    fn from(s: &Stack) -> Self {
        Self {
            id: s.id,
            name: s.name.clone(),
            kind: stack_type(s.kind),
            endpoint_id: s.endpoint_id,
            status: stack_status(s.status),
        }
    }
}

#[derive(Debug, Serialize)]
struct StackDetails {
    #[serde(flatten)]
    summary: StackSummary,
    creation_date: Option<i64>,
    created_by: String,
    updated_date: Option<i64>,
    updated_by: String,
    entry_point: String,
    project_path: String,
    env_vars_count: usize,
    is_git_stack: bool,
    git_url: Option<String>,
}

fn stack_details(s: Stack) -> StackDetails {
    let summary = StackSummary::from(&s);
    StackDetails {
        summary,
        creation_date: s.creation_date,
        created_by: or_na(s.created_by),
        updated_date: s.update_date,
        updated_by: or_na(s.updated_by),
        entry_point: or_na(s.entry_point),
        project_path: or_na(s.project_path),
        env_vars_count: s.env.map_or(0, |e| e.len()),
        is_git_stack: s.git_config.is_some(),
        git_url: match s.git_config {
            Some(git) => git.url,
            None => Some(NOT_AVAILABLE.to_string()),
        },
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct StackFile {
    stack_file_content: Option<String>,
}

/// JSON-array query value (`[1,2]`) used by Portainer list filters.
fn id_array(ids: Vec<i64>) -> Option<String> {
    (!ids.is_empty()).then(|| json!(ids).to_string())
}

pub struct Portainer {
    client: UpstreamClient,
}

impl Portainer {
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
            "/api",
            AuthStyle::Header("X-API-Key".to_string()),
            TIMEOUT,
            cancel,
        );
        Ok(Self::new(UpstreamClient::new(upstream)?))
    }

    /// Extends `base` (method plus the `endpoints` path) to `endpoints/{id}/docker/<parts>`, one
    /// encoded segment per part.
    fn docker(base: UpstreamRequest, endpoint_id: i64, parts: &[&str]) -> UpstreamRequest {
        parts
            .iter()
            .fold(base.segment(endpoint_id).segment("docker"), |request, part| request.segment(part))
    }

    async fn manage_container(&self, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let endpoint_id = args.i64("endpoint_id")?;
        let container_id = args.str("container_id")?;
        let action = args.str("action")?;

        let request = if action == "remove" {
            Self::docker(
                UpstreamRequest::delete("endpoints"),
                endpoint_id,
                &["containers", container_id],
            )
            .query("force", "true")
        } else {
            Self::docker(
                UpstreamRequest::post("endpoints"),
                endpoint_id,
                &["containers", container_id, action],
            )
        };
        let details = self.client.send_json(request).await?;
        Ok(json!({
            "status": "success",
            "message": format!("Container '{container_id}' action '{action}' executed successfully."),
            "details": details,
        }))
    }

    async fn container_logs(&self, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let endpoint_id = args.i64("endpoint_id")?;
        let container_id = args.str("container_id")?;
        let request = Self::docker(
            UpstreamRequest::get("endpoints"),
            endpoint_id,
            &["containers", container_id, "logs"],
        )
        .query("stdout", "true")
        .query("stderr", "true")
        .query("timestamps", args.flag("timestamps"))
        .query("tail", args.opt_str("tail").unwrap_or("100"))
        .query_opt("since", args.opt_str("since"))
        .header("Accept", "text/plain")
        .raw();

        let logs = match self.client.send(request).await? {
            UpstreamResponse::Bytes(raw) => demux(&raw),
            other => match other.into_value() {
                Value::String(s) => s,
                _ => String::new(),
            },
        };
        let logs: String = logs
            .chars()
            .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
            .collect();
        Ok(json!({
            "status": "success",
            "logs": if logs.trim().is_empty() { "No logs returned or logs are empty.".to_string() } else { logs },
        }))
    }
}

#[async_trait]
impl ServiceAdapter for Portainer {
    fn service(&self) -> Service {
        Service::Portainer
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "Portainer: environments, Docker containers (inspect, logs, lifecycle) and stacks. \
         Find endpoint ids with list_endpoints first."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let c = &self.client;
        match tool {
            "list_endpoints" => {
                let body = c
                    .send_json(
                        UpstreamRequest::get("endpoints")
                            .query_opt("search", args.opt_str("search"))
                            .query_opt("groupIds", id_array(args.i64_list("group_ids")))
                            .query_opt("tagIds", id_array(args.i64_list("tag_ids")))
                            .query_opt("types", id_array(args.i64_list("types"))),
                    )
                    .await?;
                let list: Vec<Endpoint> = serde_json::from_value(body)?;
                let summaries: Vec<EndpointSummary> =
                    list.into_iter().map(EndpointSummary::from).collect();
                Ok(serde_json::to_value(summaries)?)
            }
            "get_endpoint_details" => {
                let ep = c
                    .send_json(UpstreamRequest::get("endpoints").segment(args.i64("endpoint_id")?))
                    .await?;
                Ok(serde_json::to_value(endpoint_details(serde_json::from_value(ep)?))?)
            }
            "list_docker_containers" => {
                let filters = args.opt_str("filters");
                if let Some(f) = filters {
                    serde_json::from_str::<Value>(f).map_err(|e| {
                        UpstreamError::validation(format!("parameter 'filters' is not valid JSON: {e}"))
                    })?;
                }
                c.send_json(
                    Self::docker(
                        UpstreamRequest::get("endpoints"),
                        args.i64("endpoint_id")?,
                        &["containers", "json"],
                    )
                    .query("all", if args.flag("all_containers") { "1" } else { "0" })
                    .query_opt("filters", filters),
                )
                .await
            }
            "inspect_docker_container" => {
                let container = c
                    .send_json(Self::docker(
                        UpstreamRequest::get("endpoints"),
                        args.i64("endpoint_id")?,
                        &["containers", args.str("container_id")?, "json"],
                    ))
                    .await?;
                Ok(serde_json::to_value(container_summary(serde_json::from_value(container)?))?)
            }
            "manage_docker_container" => self.manage_container(args).await,
            "get_docker_container_logs" => self.container_logs(args).await,
            "list_stacks" => {
                let body = c.send_json(UpstreamRequest::get("stacks")).await?;
                let list: Vec<Stack> = serde_json::from_value(body)?;
                let summaries: Vec<StackSummary> = list.iter().map(StackSummary::from).collect();
                Ok(serde_json::to_value(summaries)?)
            }
            "inspect_stack" => {
                let stack = c
                    .send_json(UpstreamRequest::get(format!("stacks/{}", args.i64("stack_id")?)))
                    .await?;
                Ok(serde_json::to_value(stack_details(serde_json::from_value(stack)?))?)
            }
            "get_stack_file" => {
                let body = c
                    .send_json(UpstreamRequest::get(format!("stacks/{}/file", args.i64("stack_id")?)))
                    .await?;
                let content = match body {
                    Value::String(content) => Some(content),
                    other => StackFile::deserialize(&other)?.stack_file_content,
                };
                content
                    .map(|content| json!({ "stack_file_content": content }))
                    .ok_or_else(|| UpstreamError::decode("stack file response has no StackFileContent"))
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
