//! Plex Media Server REST API. Requests carry `X-Plex-Token` and ask for JSON; every reply is
//! wrapped in a `MediaContainer` object.

use super::{ServiceAdapter, unknown_tool, upstream_config};
use crate::config::{Service, ServiceConfig};
use crate::error::Result;
use async_trait::async_trait;
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yarr_http_tools::reshape::{NOT_AVAILABLE, or_na};
use yarr_http_tools::{
    AuthStyle, Effect, ParamKind, ParamSpec, ToolArgs, ToolSpec, UpstreamClient, UpstreamError,
    UpstreamRequest,
};

const TIMEOUT: Duration = Duration::from_secs(30);

const LIBRARY_NAME: ParamSpec =
    ParamSpec::required("library_name", ParamKind::String, "Library section title");

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "get_libraries",
        description: "Names of all library sections.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "search_library",
        description: "Search media by title, across all libraries or within one.",
        effect: Effect::Read,
        params: &[
            ParamSpec::required("query", ParamKind::String, "Search term"),
            ParamSpec::optional("library_name", ParamKind::String, "Limit to this library"),
        ],
    },
    ToolSpec {
        name: "get_server_info",
        description: "Server name, version, platform and transcoder load.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "list_clients",
        description: "Players currently advertised to the server.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_active_sessions",
        description: "Current playback sessions.",
        effect: Effect::Read,
        params: &[],
    },
    ToolSpec {
        name: "get_recently_added",
        description: "Recently added items, server-wide or for one library.",
        effect: Effect::Read,
        params: &[
            ParamSpec::optional("library_name", ParamKind::String, "Limit to this library"),
            ParamSpec::optional("limit", ParamKind::int_range(1, 500), "").default_int(10),
        ],
    },
    ToolSpec {
        name: "get_library_size",
        description: "Number of top-level items in a library.",
        effect: Effect::Read,
        params: &[LIBRARY_NAME],
    },
    ToolSpec {
        name: "list_all_library_titles",
        description: "Titles of every item in a library.",
        effect: Effect::Read,
        params: &[LIBRARY_NAME],
    },
    ToolSpec {
        name: "get_library_episodes_count",
        description: "Total number of episodes in a TV library.",
        effect: Effect::Read,
        params: &[LIBRARY_NAME],
    },
    ToolSpec {
        name: "get_music_library_stats",
        description: "Artist, album and track counts for a music library.",
        effect: Effect::Read,
        params: &[LIBRARY_NAME],
    },
    ToolSpec {
        name: "media_stats",
        description: "Readable report of every library: item counts, duration and storage.",
        effect: Effect::Read,
        params: &[],
    },
];

/// Plex `type` filter values for `/library/sections/{key}/all`.
const SEASON: i64 = 3;
const EPISODE: i64 = 4;
const ALBUM: i64 = 9;
const TRACK: i64 = 10;

const LIBRARY_PROVIDER: &str = "com.plexapp.plugins.library";

/// The `MediaContainer` envelope. Each endpoint fills a different subset of it.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct MediaContainer {
    #[serde(rename = "Directory")]
    directory: Vec<Section>,
    #[serde(rename = "Metadata")]
    metadata: Vec<Metadata>,
    #[serde(rename = "Hub")]
    hub: Vec<Hub>,
    #[serde(rename = "Server")]
    server: Vec<Client>,
    #[serde(rename = "MediaProvider")]
    media_provider: Vec<MediaProvider>,
    size: Option<i64>,
    total_size: Option<i64>,
    friendly_name: Option<String>,
    version: Option<String>,
    platform: Option<String>,
    platform_version: Option<String>,
    transcoder_active_video_sessions: Option<i64>,
    my_plex_username: Option<String>,
}

/// Section keys and provider directory ids arrive as strings, occasionally as numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
enum SectionKey {
    Text(String),
    Number(i64),
}

impl fmt::Display for SectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Section {
    key: Option<SectionKey>,
    title: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Metadata {
    title: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    year: Option<i64>,
    summary: Option<String>,
    library_section_title: Option<String>,
    added_at: Option<i64>,
    view_offset: Option<i64>,
    #[serde(rename = "User")]
    user: Option<Titled>,
    #[serde(rename = "Player")]
    player: Option<Player>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Titled {
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Player {
    title: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Hub {
    #[serde(rename = "Metadata")]
    metadata: Vec<Metadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Client {
    name: Option<String>,
    product: Option<String>,
    platform: Option<String>,
    device_class: Option<String>,
    address: Option<String>,
    port: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MediaProvider {
    identifier: Option<String>,
    #[serde(rename = "Feature")]
    feature: Vec<Feature>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Feature {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "Directory")]
    directory: Vec<ProviderDirectory>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ProviderDirectory {
    id: Option<SectionKey>,
    duration_total: Option<i64>,
    storage_total: Option<i64>,
}

#[derive(Debug, Serialize)]
struct MediaItem {
    title: String,
    #[serde(rename = "type")]
    kind: String,
    year: Option<i64>,
    summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    library: Option<String>,
}

#[derive(Debug, Serialize)]
struct RecentItem {
    #[serde(flatten)]
    item: MediaItem,
    added_at: Option<String>,
}

impl From<Metadata> for MediaItem {
    fn from(m: Metadata) -> Self {
        Self {
            title: or_na(m.title),
            kind: or_na(m.kind),
            year: m.year,
            summary: m.summary,
            library: m.library_section_title,
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    user: String,
    client: String,
    media_title: String,
    state: String,
    progress_ms: i64,
    media_type: String,
}

impl From<Metadata> for SessionSummary {
    fn from(m: Metadata) -> Self {
        let player = m.player.unwrap_or_default();
        Self {
            user: m
                .user
                .and_then(|u| u.title)
                .unwrap_or_else(|| "Unknown User".to_string()),
            client: player.title.unwrap_or_else(|| "Unknown Player".to_string()),
            media_title: or_na(m.title),
            state: or_na(player.state),
            progress_ms: m.view_offset.unwrap_or(0),
            media_type: or_na(m.kind),
        }
    }
}

#[derive(Debug, Serialize)]
struct ClientSummary {
    name: String,
    product: String,
    platform: String,
    device: Option<String>,
    address: Option<String>,
    port: Option<i64>,
}

impl From<Client> for ClientSummary {
    fn from(c: Client) -> Self {
        Self {
            name: or_na(c.name),
            product: or_na(c.product),
            platform: or_na(c.platform),
            device: c.device_class,
            address: c.address,
            port: c.port,
        }
    }
}

fn added_at(secs: Option<i64>) -> Option<String> {
    secs.and_then(|s| DateTime::from_timestamp(s, 0))
        .map(|t| t.to_rfc3339())
}

/// Decode `MediaContainer`, or the whole body when the upstream did not wrap it.
fn container<T: DeserializeOwned>(body: Value) -> std::result::Result<T, UpstreamError> {
    let inner = match body {
        Value::Object(mut map) => map.remove("MediaContainer").unwrap_or(Value::Object(map)),
        other => other,
    };
    Ok(serde_json::from_value(inner)?)
}

/// `[]` becomes a readable sentence; anything else passes through.
fn or_message<T: Serialize>(
    list: Vec<T>,
    message: impl FnOnce() -> String,
) -> std::result::Result<Value, UpstreamError> {
    if list.is_empty() {
        Ok(json!(message()))
    } else {
        Ok(serde_json::to_value(list)?)
    }
}

/// `1234567` → `"1,234,567"`.
fn grouped(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[allow(clippy::cast_precision_loss)]
fn storage(bytes: i64) -> String {
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    const TB: f64 = GB * 1024.0;
    let bytes = bytes as f64;
    if bytes >= TB {
        format!("{:.2} TB", bytes / TB)
    } else {
        format!("{:.2} GB", bytes / GB)
    }
}

#[allow(clippy::cast_precision_loss)]
fn days(duration_ms: i64) -> f64 {
    duration_ms as f64 / 1000.0 / 86_400.0
}

/// Per-section `durationTotal`/`storageTotal` from the library media provider.
fn section_totals(providers: MediaContainer) -> HashMap<String, (i64, i64)> {
    providers
        .media_provider
        .into_iter()
        .filter(|p| p.identifier.as_deref() == Some(LIBRARY_PROVIDER))
        .flat_map(|p| p.feature)
        .filter(|f| f.kind.as_deref() == Some("content"))
        .flat_map(|f| f.directory)
        .filter_map(|d| {
            let id = d.id?.to_string();
            Some((id, (d.duration_total.unwrap_or(0), d.storage_total.unwrap_or(0))))
        })
        .collect()
}

#[derive(Debug, Default)]
struct Totals {
    movies: i64,
    shows: i64,
    seasons: i64,
    episodes: i64,
    artists: i64,
    albums: i64,
    tracks: i64,
    photos: i64,
    other_items: i64,
    duration_ms: i64,
    storage_bytes: i64,
}

/// Library report grouped by kind. Sections keep their server order within a group.
#[derive(Debug, Default)]
struct StatsReport {
    movies: Vec<String>,
    shows: Vec<String>,
    music: Vec<String>,
    photos: Vec<String>,
    other: Vec<String>,
    totals: Totals,
}

impl StatsReport {
    fn render(&self, server: &MediaContainer, libraries: usize) -> String {
        let t = &self.totals;
        let mut out = String::new();
        let _ = writeln!(out, "PLEX MEDIA SERVER STATISTICS");
        let _ = writeln!(out, "===========================");
        let _ = writeln!(out, "Server: {}", server.friendly_name.as_deref().unwrap_or(NOT_AVAILABLE));
        let _ = writeln!(out, "Version: {}", server.version.as_deref().unwrap_or(NOT_AVAILABLE));
        let _ = writeln!(out, "Platform: {}", server.platform.as_deref().unwrap_or(NOT_AVAILABLE));
        out.push('\n');

        let groups: [(&str, &[String], Vec<(&str, i64)>); 5] = [
            ("MOVIES", self.movies.as_slice(), vec![("Total Movies", t.movies)]),
            (
                "TV SHOWS",
                self.shows.as_slice(),
                vec![
                    ("Total TV Shows", t.shows),
                    ("Total Seasons", t.seasons),
                    ("Total Episodes", t.episodes),
                ],
            ),
            (
                "MUSIC",
                self.music.as_slice(),
                vec![
                    ("Total Artists", t.artists),
                    ("Total Albums", t.albums),
                    ("Total Tracks", t.tracks),
                ],
            ),
            ("PHOTOS", self.photos.as_slice(), vec![("Total Photos", t.photos)]),
            ("OTHER LIBRARIES", self.other.as_slice(), vec![("Total Other Items", t.other_items)]),
        ];
        for (heading, blocks, sums) in &groups {
            if blocks.is_empty() {
                continue;
            }
            let _ = writeln!(out, "{heading}\n{}", "-".repeat(heading.len()));
            for block in *blocks {
                out.push_str(block);
                out.push('\n');
            }
            for (label, n) in sums {
                let _ = writeln!(out, "{label}: {}", grouped(*n));
            }
            out.push('\n');
        }

        let _ = writeln!(out, "OVERALL TOTALS\n--------------");
        let _ = writeln!(out, "Total Libraries: {libraries}");
        for (label, n, shown) in [
            ("Total Movies", t.movies, t.movies > 0),
            ("Total TV Shows", t.shows, t.shows > 0),
            ("Total Seasons", t.seasons, t.shows > 0),
            ("Total Episodes", t.episodes, t.shows > 0),
            ("Total Artists", t.artists, t.artists > 0),
            ("Total Albums", t.albums, t.artists > 0),
            ("Total Tracks", t.tracks, t.artists > 0),
            ("Total Photos", t.photos, t.photos > 0),
            ("Total Other Items", t.other_items, t.other_items > 0),
        ] {
            if shown {
                let _ = writeln!(out, "{label}: {}", grouped(n));
            }
        }
        let minutes_total = t.duration_ms / 60_000;
        let _ = writeln!(
            out,
            "Total Duration: {} days, {} hours, {} minutes",
            grouped(minutes_total / 1440),
            minutes_total % 1440 / 60,
            minutes_total % 60
        );
        let _ = write!(out, "Total Storage: {}", storage(t.storage_bytes));
        out
    }
}

pub struct Plex {
    client: UpstreamClient,
}

impl Plex {
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
            AuthStyle::Header("X-Plex-Token".to_string()),
            TIMEOUT,
            cancel,
        )
        .header("Accept", "application/json");
        Ok(Self::new(UpstreamClient::new(upstream)?))
    }

    async fn get(&self, request: UpstreamRequest) -> std::result::Result<MediaContainer, UpstreamError> {
        container(self.client.send_json(request).await?)
    }

    async fn sections(&self) -> std::result::Result<Vec<Section>, UpstreamError> {
        Ok(self.get(UpstreamRequest::get("/library/sections")).await?.directory)
    }

    /// Section for a library title (case-insensitive), with its key.
    async fn section(&self, name: &str) -> std::result::Result<(SectionKey, Section), UpstreamError> {
        self.sections()
            .await?
            .into_iter()
            .filter(|s| s.title.as_deref().is_some_and(|t| t.eq_ignore_ascii_case(name)))
            .find_map(|mut s| Some((s.key.take()?, s)))
            .ok_or_else(|| UpstreamError::application(format!("Library '{name}' not found.")))
    }

    fn section_request(key: &SectionKey, action: &str) -> UpstreamRequest {
        UpstreamRequest::get("/library/sections")
            .segment(key)
            .segment(action)
    }

    /// Item count without fetching items; `kind` narrows to a Plex `type` such as episodes.
    async fn count(
        &self,
        key: &SectionKey,
        kind: Option<i64>,
    ) -> std::result::Result<Option<i64>, UpstreamError> {
        let c = self
            .get(
                Self::section_request(key, "all")
                    .query_opt("type", kind)
                    .query("X-Plex-Container-Start", 0)
                    .query("X-Plex-Container-Size", 0),
            )
            .await?;
        Ok(c.total_size.or(c.size))
    }

    async fn totals(&self) -> std::result::Result<HashMap<String, (i64, i64)>, UpstreamError> {
        let providers = self
            .get(UpstreamRequest::get("/media/providers").query("includeStorage", 1))
            .await?;
        Ok(section_totals(providers))
    }

    async fn search(&self, query: &str, library: Option<&str>) -> std::result::Result<Value, UpstreamError> {
        let found: Vec<MediaItem> = match library {
            Some(name) => {
                let (key, _) = self.section(name).await?;
                self.get(Self::section_request(&key, "search").query("query", query))
                    .await?
                    .metadata
                    .into_iter()
                    .map(MediaItem::from)
                    .collect()
            }
            None => self
                .get(UpstreamRequest::get("/hubs/search").query("query", query))
                .await?
                .hub
                .into_iter()
                .flat_map(|hub| hub.metadata)
                .map(MediaItem::from)
                .collect(),
        };
        or_message(found, || match library {
            Some(name) => format!("No results found for '{query}' in library '{name}'."),
            None => format!("No results found for '{query}'."),
        })
    }

    async fn recently_added(
        &self,
        library: Option<&str>,
        limit: i64,
    ) -> std::result::Result<Value, UpstreamError> {
        let request = match library {
            Some(name) => Self::section_request(&self.section(name).await?.0, "recentlyAdded"),
            None => UpstreamRequest::get("/library/recentlyAdded"),
        };
        let found: Vec<RecentItem> = self
            .get(
                request
                    .query("X-Plex-Container-Start", 0)
                    .query("X-Plex-Container-Size", limit),
            )
            .await?
            .metadata
            .into_iter()
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(|m| RecentItem {
                added_at: added_at(m.added_at),
                item: MediaItem::from(m),
            })
            .collect();
        or_message(found, || match library {
            Some(name) => format!("No recently added items found in library '{name}'."),
            None => "No recently added items found.".to_string(),
        })
    }

    async fn all_titles(&self, name: &str) -> std::result::Result<Value, UpstreamError> {
        let (key, _) = self.section(name).await?;
        let titles: Vec<String> = self
            .get(Self::section_request(&key, "all"))
            .await?
            .metadata
            .into_iter()
            .map(|m| or_na(m.title))
            .collect();
        or_message(titles, || format!("No items found in library '{name}'."))
    }

    async fn episodes_count(&self, name: &str) -> std::result::Result<Value, UpstreamError> {
        let (key, section) = self.section(name).await?;
        if section.kind.as_deref() != Some("show") {
            return Err(UpstreamError::application(format!(
                "Library '{name}' is not a TV show library."
            )));
        }
        let episodes = self.count(&key, Some(EPISODE)).await?.unwrap_or(0);
        Ok(json!({ "library_name": name, "episode_count": episodes }))
    }

    async fn music_stats(&self, name: &str) -> std::result::Result<Value, UpstreamError> {
        let (key, section) = self.section(name).await?;
        if section.kind.as_deref() != Some("artist") {
            return Err(UpstreamError::application(format!(
                "Library '{name}' is not a music library."
            )));
        }
        let artists = self.count(&key, None).await?.unwrap_or(0);
        let albums = self.count(&key, Some(ALBUM)).await?.unwrap_or(0);
        let tracks = self.count(&key, Some(TRACK)).await?.unwrap_or(0);
        let duration = self.totals().await?.get(&key.to_string()).map(|(d, _)| *d);
        Ok(json!({
            "library_name": name,
            "artist_count": artists,
            "album_count": albums,
            "track_count": tracks,
            "total_duration_ms": duration,
        }))
    }

    async fn media_stats(&self) -> std::result::Result<Value, UpstreamError> {
        let server = self.get(UpstreamRequest::get("/")).await?;
        let sections = self.sections().await?;
        let totals = self.totals().await?;
        let mut report = StatsReport::default();

        for section in &sections {
            let Some(key) = &section.key else { continue };
            let title = section.title.as_deref().unwrap_or(NOT_AVAILABLE);
            let (duration_ms, storage_bytes) =
                totals.get(&key.to_string()).copied().unwrap_or((0, 0));
            let size = self.count(key, None).await?.unwrap_or(0);
            let t = &mut report.totals;
            t.storage_bytes += storage_bytes;
            match section.kind.as_deref() {
                Some("movie") => {
                    t.movies += size;
                    t.duration_ms += duration_ms;
                    report.movies.push(format!(
                        "Library: {title}\n  Movies: {}\n  Duration: {:.1} days\n  Storage: {}\n",
                        grouped(size),
                        days(duration_ms),
                        storage(storage_bytes)
                    ));
                }
                Some("show") => {
                    let seasons = self.count(key, Some(SEASON)).await?.unwrap_or(0);
                    let episodes = self.count(key, Some(EPISODE)).await?.unwrap_or(0);
                    let t = &mut report.totals;
                    t.shows += size;
                    t.seasons += seasons;
                    t.episodes += episodes;
                    t.duration_ms += duration_ms;
                    report.shows.push(format!(
                        "Library: {title}\n  Shows: {}\n  Seasons: {}\n  Episodes: {}\n  \
                         Duration: {:.1} days\n  Storage: {}\n",
                        grouped(size),
                        grouped(seasons),
                        grouped(episodes),
                        days(duration_ms),
                        storage(storage_bytes)
                    ));
                }
                Some("artist") => {
                    let albums = self.count(key, Some(ALBUM)).await?.unwrap_or(0);
                    let tracks = self.count(key, Some(TRACK)).await?.unwrap_or(0);
                    let t = &mut report.totals;
                    t.artists += size;
                    t.albums += albums;
                    t.tracks += tracks;
                    t.duration_ms += duration_ms;
                    report.music.push(format!(
                        "Library: {title}\n  Artists: {}\n  Albums: {}\n  Tracks: {}\n  \
                         Duration: {:.1} days\n  Storage: {}\n",
                        grouped(size),
                        grouped(albums),
                        grouped(tracks),
                        days(duration_ms),
                        storage(storage_bytes)
                    ));
                }
                Some("photo") => {
                    t.photos += size;
                    report.photos.push(format!(
                        "Library: {title}\n  Photos: {}\n  Storage: {}\n",
                        grouped(size),
                        storage(storage_bytes)
                    ));
                }
                _ => {
                    t.other_items += size;
                    report.other.push(format!(
                        "Library: {title}\n  Items: {}\n  Storage: {}\n",
                        grouped(size),
                        storage(storage_bytes)
                    ));
                }
            }
        }
        Ok(json!(report.render(&server, sections.len())))
    }
}

#[async_trait]
impl ServiceAdapter for Plex {
    fn service(&self) -> Service {
        Service::Plex
    }

    fn tools(&self) -> &'static [ToolSpec] {
        TOOLS
    }

    fn instructions(&self) -> &'static str {
        "Plex Media Server: libraries, search, recently added items, clients, active sessions \
         and library statistics. Library names come from get_libraries."
    }

    async fn call(&self, tool: &str, args: &ToolArgs) -> std::result::Result<Value, UpstreamError> {
        match tool {
            "get_libraries" => {
                let names: Vec<String> = self
                    .sections()
                    .await?
                    .into_iter()
                    .filter_map(|s| s.title)
                    .collect();
                or_message(names, || "No libraries found on the Plex server.".to_string())
            }
            "search_library" => {
                self.search(args.str("query")?, args.opt_str("library_name"))
                    .await
            }
            "get_server_info" => {
                let c = self.get(UpstreamRequest::get("/")).await?;
                Ok(json!({
                    "friendlyName": or_na(c.friendly_name),
                    "version": or_na(c.version),
                    "platform": or_na(c.platform),
                    "platformVersion": or_na(c.platform_version),
                    "activeSessions": c.transcoder_active_video_sessions.unwrap_or(0),
                    "myPlexUsername": c.my_plex_username,
                }))
            }
            "list_clients" => {
                let clients: Vec<ClientSummary> = self
                    .get(UpstreamRequest::get("/clients"))
                    .await?
                    .server
                    .into_iter()
                    .map(ClientSummary::from)
                    .collect();
                or_message(clients, || "No clients found connected to the server.".to_string())
            }
            "get_active_sessions" => {
                let sessions: Vec<SessionSummary> = self
                    .get(UpstreamRequest::get("/status/sessions"))
                    .await?
                    .metadata
                    .into_iter()
                    .map(SessionSummary::from)
                    .collect();
                or_message(sessions, || "No active playback sessions found.".to_string())
            }
            "get_recently_added" => {
                self.recently_added(
                    args.opt_str("library_name"),
                    args.opt_i64("limit").unwrap_or(10),
                )
                .await
            }
            "get_library_size" => {
                let name = args.str("library_name")?;
                let (key, _) = self.section(name).await?;
                let count = self
                    .count(&key, None)
                    .await?
                    .map_or_else(|| json!(NOT_AVAILABLE), |n| json!(n));
                Ok(json!({ "library_name": name, "item_count": count }))
            }
            "list_all_library_titles" => self.all_titles(args.str("library_name")?).await,
            "get_library_episodes_count" => {
                self.episodes_count(args.str("library_name")?).await
            }
            "get_music_library_stats" => self.music_stats(args.str("library_name")?).await,
            "media_stats" => self.media_stats().await,
            other => Err(unknown_tool(other)),
        }
    }

    async fn health_check(&self) -> std::result::Result<(), UpstreamError> {
        self.client
            .send(UpstreamRequest::get("/identity"))
            .await
            .map(|_| ())
    }
}
