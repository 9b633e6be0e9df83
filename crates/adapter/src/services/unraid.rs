//! Unraid GraphQL API. `UNRAID_API_URL` is the GraphQL endpoint itself; every tool is one
//! query or mutation POSTed there with `X-API-Key`.
//!
//! Several `Int` fields in the Unraid schema overflow or come back as NaN, so the queries below
//! select a curated field set rather than everything the schema offers.

use super::{ServiceAdapter, unknown_tool, upstream_config};
use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yarr_http_tools::reshape::{format_kb, lenient_f64};
use yarr_http_tools::{
    AuthStyle, Effect, ParamKind, ParamSpec, ToolArgs, ToolSpec, UpstreamClient, UpstreamError,
};

const TIMEOUT: Duration = Duration::from_secs(30);
const DISK_LIST_TIMEOUT: Duration = Duration::from_secs(90);

const DISK_FIELDS: &str = "id idx name device size status rotational temp numReads numWrites \
    numErrors fsSize fsFree fsUsed exportable type warning critical fsType comment format \
    transport color";

const CONTAINER_FIELDS: &str = "id names image imageId command created \
    ports { ip privatePort publicPort type } sizeRootFs labels state status \
    hostConfig { networkMode } autoStart";

const SYSTEM_INFO: &str = "query GetSystemInfo { info { \
    os { platform distro release codename kernel arch hostname codepage logofile serial build uptime } \
    cpu { manufacturer brand vendor family model stepping revision voltage speed speedmin speedmax threads cores processors socket cache flags } \
    memory { layout { bank type clockSpeed formFactor manufacturer partNum serialNum } } \
    baseboard { manufacturer model version serial assetTag } \
    system { manufacturer model version serial uuid sku } \
    versions { kernel openssl systemOpenssl systemOpensslLib node v8 npm yarn pm2 gulp grunt git tsc mysql redis mongodb apache nginx php docker postfix postgresql perl python gcc unraid } \
    apps { installed started } \
    machineId time } }";

const NETWORK: &str = "query GetNetworkConfig { network { id accessUrls { type name ipv4 ipv6 } } }";

const REGISTRATION: &str = "query GetRegistrationInfo { registration { \
    id type keyFile { location contents } state expiration updateExpiration } }";

const CONNECT_SETTINGS: &str = "query GetConnectSettings { connect { settings { values { \
    sandbox extraOrigins accessType forwardType port ssoUserIds } } } }";

const VARIABLES: &str = "query GetSelectiveUnraidVariables { vars { \
    id version name timeZone comment security workgroup domain domainShort hideDotFiles \
    localMaster enableFruit useNtp domainLogin sysModel sysFlashSlots useSsl port portssl \
    localTld bindMgt useTelnet porttelnet useSsh portssh startPage startArray shutdownTimeout \
    shareSmbEnabled shareNfsEnabled shareAfpEnabled shareCacheEnabled shareAvahiEnabled \
    safeMode startMode configValid configError joinStatus deviceCount flashGuid flashProduct \
    flashVendor mdState mdVersion shareCount shareSmbCount shareNfsCount shareAfpCount \
    shareMoverActive csrfToken } }";

const VMS: &str = "query ListVMs { vms { domains { id name state } } }";

const SHARES: &str = "query GetSharesInfo { shares { \
    id name free used size include exclude cache nameOrig comment allocator splitLevel floor \
    cow color luksStatus } }";

const NOTIFICATIONS_OVERVIEW: &str = "query GetNotificationsOverview { notifications { overview { \
    unread { info warning alert total } archive { info warning alert total } } } }";

const NOTIFICATIONS_LIST: &str = "query ListNotifications($filter: NotificationFilter!) { \
    notifications { list(filter: $filter) { \
    id title subject description importance link type timestamp formattedTimestamp } } }";

const LOG_FILES: &str = "query ListLogFiles { logFiles { name path size modifiedAt } }";

const LOG_CONTENT: &str = "query GetLogContent($path: String!, $lines: Int) { \
    logFile(path: $path, lines: $lines) { path content totalLines startLine } }";

const PHYSICAL_DISKS: &str = "query ListPhysicalDisksMinimal { disks { id device name } }";

const DISK_DETAILS: &str = "query GetDiskDetails($id: PrefixedID!) { disk(id: $id) { \
    id device type name vendor size firmwareRevision serialNum interfaceType smartStatus \
    partitions { name fsType size } } }";

const HEALTH_QUERY: &str = "query Health { info { os { hostname } } }";

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_system_info",
        description: "OS, CPU, memory layout, baseboard and software versions, with a short summary.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_array_status",
        description: "Array state, capacity and all parity, data and cache disks.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_network_config",
        description: "Network access URLs.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_registration_info",
        description: "License registration details.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_connect_settings",
        description: "Unraid Connect settings.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_unraid_variables",
        description: "Selected system variables and settings.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "list_docker_containers",
        description: "Docker containers on the server.",
        effect: Effect::Read,
        params: &[
            ParamSpec::optional("skip_cache", ParamKind::Boolean, "Bypass the API's container cache")
                .default_bool(false),
        ],
    },
    ToolSpec {
        name: "manage_docker_container",
        description: "Start or stop a Docker container.",
        effect: Effect::Action,
        params: &[
            ParamSpec::required("container_id", ParamKind::String, "Container id"),
            ParamSpec::required("action", ParamKind::Enum(&["start", "stop"]), ""),
        ],
    },
    ToolSpec {
        name: "get_docker_container_details",
        description: "One container by id or name, including network settings and mounts.",
        effect: Effect::Read,
        params: &[ParamSpec::required(
            "container_identifier",
            ParamKind::String,
            "Container id or one of its names",
        )],
    },
    ToolSpec {
        name: "list_vms",
        description: "Virtual machines and their state.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "manage_vm",
        description: "Start, stop, pause, resume, force-stop or reboot a VM.",
        effect: Effect::Action,
        params: &[
            ParamSpec::required("vm_id", ParamKind::String, "VM id"),
            ParamSpec::required(
                "action",
                ParamKind::Enum(&["start", "stop", "pause", "resume", "forceStop", "reboot"]),
                "",
            ),
        ],
    },
    ToolSpec {
        name: "get_vm_details",
        description: "One VM by id or name.",
        effect: Effect::Read,
        params: &[ParamSpec::required("vm_identifier", ParamKind::String, "VM id or name")],
    },
    ToolSpec {
        name: "get_shares_info",
        description: "User shares with usage and allocation settings.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_notifications_overview",
        description: "Unread and archived notification counts by importance.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "list_notifications",
        description: "Notifications filtered by type and importance.",
        effect: Effect::Read,
        params: &[
            ParamSpec::required("type", ParamKind::Enum(&["UNREAD", "ARCHIVE"]), ""),
            ParamSpec::required("offset", ParamKind::int_min(0), ""),
            ParamSpec::required("limit", ParamKind::int_min(1), ""),
            ParamSpec::optional("importance", ParamKind::Enum(&["INFO", "WARNING", "ALERT"]), ""),
        ],
    },
    ToolSpec {
        name: "list_available_log_files",
        description: "Log files that get_logs can read.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_logs",
        description: "Last lines of a log file.",
        effect: Effect::Read,
        params: &[
            ParamSpec::required("log_file_path", ParamKind::String, "Path from list_available_log_files"),
            ParamSpec::optional("tail_lines", ParamKind::int_min(1), "").default_int(100),
        ],
    },
    ToolSpec {
        name: "list_physical_disks",
        description: "Physical disks known to the server (slow on large arrays).",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_disk_details",
        description: "SMART status, identity and partitions of one disk.",
        effect: Effect::Read,
        params: &[ParamSpec::required("disk_id", ParamKind::String, "Disk id")],
    },
];

fn array_status_query() -> String {
    format!(
        "query GetArrayStatus {{ array {{ id state \
         capacity {{ kilobytes {{ free used total }} disks {{ free used total }} }} \
         boot {{ {DISK_FIELDS} }} parities {{ {DISK_FIELDS} }} disks {{ {DISK_FIELDS} }} \
         caches {{ {DISK_FIELDS} }} }} }}"
    )
}

fn containers_query(with_details: bool) -> String {
    if with_details {
        format!(
            "query GetAllContainerDetailsForFiltering {{ docker {{ containers(skipCache: false) {{ \
             {CONTAINER_FIELDS} networkSettings mounts }} }} }}"
        )
    } else {
        format!(
            "query ListDockerContainers($skipCache: Boolean!) {{ docker {{ \
             containers(skipCache: $skipCache) {{ {CONTAINER_FIELDS} }} }} }}"
        )
    }
}

fn container_mutation(action: &str) -> String {
    format!(
        "mutation ManageDockerContainer($id: PrefixedID!) {{ docker {{ \
         {action}(id: $id) {{ id names image state status autoStart }} }} }}"
    )
}

fn vm_mutation(action: &str) -> String {
    format!("mutation ManageVM($id: PrefixedID!) {{ vm {{ {action}(id: $id) }} }}")
}

/// Missing GraphQL scalars render as `?` inside the summary sentences.
fn or_unknown<T: fmt::Display>(value: Option<&T>) -> String {
    value.map_or_else(|| "?".to_string(), ToString::to_string)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SystemInfo {
    os: Option<OsInfo>,
    cpu: Option<CpuInfo>,
    memory: Option<MemoryInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OsInfo {
    distro: Option<String>,
    release: Option<String>,
    platform: Option<String>,
    arch: Option<String>,
    hostname: Option<String>,
    uptime: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CpuInfo {
    manufacturer: Option<String>,
    brand: Option<String>,
    cores: Option<i64>,
    threads: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MemoryInfo {
    layout: Option<Vec<MemoryStick>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MemoryStick {
    bank: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    clock_speed: Option<i64>,
    manufacturer: Option<String>,
    part_num: Option<String>,
}

#[derive(Debug, Serialize)]
struct HostSummary {
    os: String,
    hostname: Option<String>,
    uptime: Option<String>,
}

#[derive(Debug, Serialize)]
struct SystemSummary {
    #[serde(flatten)]
    host: Option<HostSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpu: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory_layout_details: Option<Vec<String>>,
    memory_summary: &'static str,
}

fn system_summary(info: SystemInfo) -> SystemSummary {
    let host = info.os.map(|os| HostSummary {
        os: format!(
            "{} {} ({}, {})",
            or_unknown(os.distro.as_ref()),
            or_unknown(os.release.as_ref()),
            or_unknown(os.platform.as_ref()),
            or_unknown(os.arch.as_ref())
        ),
        hostname: os.hostname,
        uptime: os.uptime,
    });
    let cpu = info.cpu.map(|cpu| {
        format!(
            "{} {} ({} cores, {} threads)",
            or_unknown(cpu.manufacturer.as_ref()),
            or_unknown(cpu.brand.as_ref()),
            or_unknown(cpu.cores.as_ref()),
            or_unknown(cpu.threads.as_ref())
        )
    });
    let layout = info.memory.and_then(|m| m.layout).unwrap_or_default();
    if layout.is_empty() {
        return SystemSummary {
            host,
            cpu,
            memory_layout_details: None,
            memory_summary: "Memory layout is not available.",
        };
    }
    let sticks = layout
        .iter()
        .map(|s| {
            format!(
                "Bank {}: Type {}, Speed {}MHz, Manufacturer: {}, Part: {}",
                or_unknown(s.bank.as_ref()),
                or_unknown(s.kind.as_ref()),
                or_unknown(s.clock_speed.as_ref()),
                or_unknown(s.manufacturer.as_ref()),
                or_unknown(s.part_num.as_ref())
            )
        })
        .collect();
    SystemSummary {
        host,
        cpu,
        memory_layout_details: Some(sticks),
        memory_summary: "Per-stick layout only; the API does not report total or used memory.",
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ArrayStatus {
    state: Option<String>,
    parities: Option<Vec<IgnoredAny>>,
    disks: Option<Vec<IgnoredAny>>,
    caches: Option<Vec<IgnoredAny>>,
    capacity: Option<Capacity>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Capacity {
    kilobytes: Option<Kilobytes>,
}

/// Kilobyte counts arrive as strings: they overflow GraphQL `Int`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Kilobytes {
    #[serde(deserialize_with = "lenient_f64")]
    total: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    used: Option<f64>,
    #[serde(deserialize_with = "lenient_f64")]
    free: Option<f64>,
}

#[derive(Debug, Serialize)]
struct CapacitySummary {
    capacity_total: String,
    capacity_used: String,
    capacity_free: String,
}

#[derive(Debug, Serialize)]
struct ArraySummary {
    state: Option<String>,
    num_parity_disks: usize,
    num_data_disks: usize,
    num_cache_pools: usize,
    #[serde(flatten)]
    capacity: Option<CapacitySummary>,
}

fn array_summary(array: ArrayStatus) -> ArraySummary {
    let count = |list: Option<Vec<IgnoredAny>>| list.map_or(0, |l| l.len());
    ArraySummary {
        state: array.state,
        num_parity_disks: count(array.parities),
        num_data_disks: count(array.disks),
        num_cache_pools: count(array.caches),
        capacity: array.capacity.and_then(|c| c.kilobytes).map(|kb| CapacitySummary {
            capacity_total: format_kb(kb.total),
            capacity_used: format_kb(kb.used),
            capacity_free: format_kb(kb.free),
        }),
    }
}

/// Just enough of a container or VM to match it by id or name.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Identity {
    id: Option<String>,
    name: Option<String>,
    names: Option<Vec<String>>,
}

impl Identity {
    fn matches(&self, ident: &str) -> bool {
        self.id.as_deref() == Some(ident)
            || self.name.as_deref() == Some(ident)
            || self.names.iter().flatten().any(|n| n == ident)
    }
}

/// First element of the list under `pointer` whose id or name is `ident`.
fn find_by_identity(
    data: &Value,
    pointer: &str,
    ident: &str,
) -> std::result::Result<Option<Value>, UpstreamError> {
    let Some(list) = data.pointer(pointer).and_then(Value::as_array) else {
        return Ok(None);
    };
    for item in list {
        if Identity::deserialize(item)?.matches(ident) {
            return Ok(Some(item.clone()));
        }
    }
    Ok(None)
}

/// Object under `pointer`, erroring if the API answered without it.
fn require(data: &Value, pointer: &str, what: &str) -> std::result::Result<Value, UpstreamError> {
    match data.pointer(pointer) {
        Some(v) if !v.is_null() => Ok(v.clone()),
        _ => Err(UpstreamError::decode(format!("No {what} returned from API"))),
    }
}

/// Object or list under `pointer`, defaulting to `empty` when absent.
fn or_empty(data: &Value, pointer: &str, empty: Value) -> Value {
    data.pointer(pointer)
        .filter(|v| !v.is_null())
        .cloned()
        .unwrap_or(empty)
}

pub struct Unraid {
    client: UpstreamClient,
}

impl Unraid {
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
        );
        Ok(Self::new(UpstreamClient::new(upstream)?))
    }

    async fn query(&self, query: &str, variables: Value) -> std::result::Result<Value, UpstreamError> {
        self.client.graphql(query, variables, None).await
    }

    async fn container_details(&self, ident: &str) -> std::result::Result<Value, UpstreamError> {
        let data = self.query(&containers_query(true), json!({})).await?;
        find_by_identity(&data, "/docker/containers", ident)?
            .ok_or_else(|| UpstreamError::validation(format!("Container '{ident}' not found.")))
    }

    async fn vm_details(&self, ident: &str) -> std::result::Result<Value, UpstreamError> {
        let data = self.query(VMS, json!({})).await?;
        find_by_identity(&data, "/vms/domains", ident)?
            .ok_or_else(|| UpstreamError::validation(format!("VM '{ident}' not found.")))
    }
}

#[async_trait]
impl ServiceAdapter for Unraid {
    fn service(&self) -> Service {
        Service::Unraid
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "Unraid server via its GraphQL API: system and array status, Docker containers, VMs, \
         shares, notifications, logs and disks."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        let none = json!({});
        match tool {
            "get_system_info" => {
                let data = self.query(SYSTEM_INFO, none).await?;
                let info = require(&data, "/info", "system info")?;
                let summary = system_summary(SystemInfo::deserialize(&info)?);
                Ok(json!({ "summary": summary, "details": info }))
            }
            "get_array_status" => {
                let data = self.query(&array_status_query(), none).await?;
                let array = require(&data, "/array", "array info")?;
                let summary = array_summary(ArrayStatus::deserialize(&array)?);
                Ok(json!({ "summary": summary, "details": array }))
            }
            "get_network_config" => Ok(or_empty(&self.query(NETWORK, none).await?, "/network", json!({}))),
            "get_registration_info" => Ok(or_empty(
                &self.query(REGISTRATION, none).await?,
                "/registration",
                json!({}),
            )),
            "get_connect_settings" => Ok(or_empty(
                &self.query(CONNECT_SETTINGS, none).await?,
                "/connect/settings/values",
                json!({}),
            )),
            "get_unraid_variables" => Ok(or_empty(&self.query(VARIABLES, none).await?, "/vars", json!({}))),
            "list_docker_containers" => {
                let data = self
                    .query(
                        &containers_query(false),
                        json!({ "skipCache": args.flag("skip_cache") }),
                    )
                    .await?;
                Ok(or_empty(&data, "/docker/containers", json!([])))
            }
            "manage_docker_container" => {
                let action = args.str("action")?;
                let data = self
                    .query(
                        &container_mutation(action),
                        json!({ "id": args.str("container_id")? }),
                    )
                    .await?;
                require(&data, &format!("/docker/{action}"), "container state")
                    .map_err(|_| UpstreamError::decode(format!("Failed to {action} container: unexpected response")))
            }
            "get_docker_container_details" => {
                self.container_details(args.str("container_identifier")?).await
            }
            "list_vms" => Ok(or_empty(&self.query(VMS, none).await?, "/vms/domains", json!([]))),
            "manage_vm" => {
                let action = args.str("action")?;
                let vm_id = args.str("vm_id")?;
                let data = self.query(&vm_mutation(action), json!({ "id": vm_id })).await?;
                let Some(success) = data.pointer(&format!("/vm/{action}")) else {
                    return Err(UpstreamError::decode(format!(
                        "Failed to {action} VM: unexpected response"
                    )));
                };
                Ok(json!({ "success": success, "action": action, "vm_id": vm_id }))
            }
            "get_vm_details" => self.vm_details(args.str("vm_identifier")?).await,
            "get_shares_info" => Ok(or_empty(&self.query(SHARES, none).await?, "/shares", json!([]))),
            "get_notifications_overview" => Ok(or_empty(
                &self.query(NOTIFICATIONS_OVERVIEW, none).await?,
                "/notifications/overview",
                json!({}),
            )),
            "list_notifications" => {
                let mut filter = json!({
                    "type": args.str("type")?,
                    "offset": args.i64("offset")?,
                    "limit": args.i64("limit")?,
                });
                if let Some(importance) = args.opt_str("importance") {
                    filter["importance"] = json!(importance);
                }
                let data = self
                    .query(NOTIFICATIONS_LIST, json!({ "filter": filter }))
                    .await?;
                Ok(or_empty(&data, "/notifications/list", json!([])))
            }
            "list_available_log_files" => {
                Ok(or_empty(&self.query(LOG_FILES, none).await?, "/logFiles", json!([])))
            }
            "get_logs" => {
                let data = self
                    .query(
                        LOG_CONTENT,
                        json!({
                            "path": args.str("log_file_path")?,
                            "lines": args.opt_i64("tail_lines").unwrap_or(100),
                        }),
                    )
                    .await?;
                Ok(or_empty(&data, "/logFile", json!({})))
            }
            "list_physical_disks" => {
                let data = self
                    .client
                    .graphql(PHYSICAL_DISKS, none, Some(DISK_LIST_TIMEOUT))
                    .await?;
                Ok(or_empty(&data, "/disks", json!([])))
            }
            "get_disk_details" => {
                let data = self
                    .query(DISK_DETAILS, json!({ "id": args.str("disk_id")? }))
                    .await?;
                Ok(or_empty(&data, "/disk", json!({})))
            }
            other => Err(unknown_tool(other)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), UpstreamError> {
        self.query(HEALTH_QUERY, json!({})).await.map(|_| ())
    }
}
