//! Request gateway: the single choke point every tool call goes through.
//!
//! One call in, one classified outcome out. The outcome is evaluated in a fixed order:
//! missing credential (nothing sent), HTTP 4xx/5xx, transport failure, undecodable body,
//! and finally success (with or without a body).

use crate::error::{Result, UpstreamError};
use crate::redact::{redact_url, sanitize_reqwest_error};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Method, StatusCode};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERROR_TEXT_CHARS: usize = 512;
const NO_CONTENT_MESSAGE: &str = "Operation successful, no content returned.";

/// How the upstream expects the credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStyle {
    /// Static header, e.g. `X-Api-Key`.
    Header(String),
    /// `Authorization: Bearer <credential>`.
    Bearer,
    /// Query parameter, e.g. `apikey`.
    Query(String),
    /// Cookie session managed by the caller; requests carry no credential of their own.
    Session,
}

/// TLS verification mode for the upstream connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TlsMode {
    #[default]
    Verify,
    /// Accept any certificate (self-signed appliances).
    Insecure,
    /// Trust an extra PEM bundle in addition to the built-in roots.
    CustomCa(PathBuf),
}

/// Bounded back-off for HTTP 429 responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Number of resends after a 429. Zero disables retrying.
    pub max_retries: u32,
    /// Wait used when the upstream sends no usable `Retry-After`.
    pub default_wait: Duration,
    /// Upper bound for any single wait.
    pub max_wait: Duration,
}

impl RateLimitPolicy {
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            default_wait: Duration::ZERO,
            max_wait: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn standard() -> Self {
        Self {
            max_retries: 5,
            default_wait: Duration::from_secs(5),
            max_wait: Duration::from_secs(60),
        }
    }

    fn wait_for(&self, headers: &HeaderMap) -> Duration {
        let requested = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(self.default_wait, Duration::from_secs);
        requested.min(self.max_wait)
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::disabled()
    }
}

/// Immutable connection settings for one upstream.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub credential: Option<String>,
    pub auth: AuthStyle,
    pub timeout: Duration,
    pub rate_limit: RateLimitPolicy,
    pub tls: TlsMode,
    /// Sent on every request (e.g. `Accept: application/json`).
    pub default_headers: Vec<(String, String)>,
    /// Keep cookies between requests (session-authenticated upstreams).
    pub cookie_store: bool,
    /// Cancels in-flight requests and rate-limit waits.
    pub cancel: CancellationToken,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>, auth: AuthStyle) -> Self {
        Self {
            base_url: base_url.into(),
            credential: None,
            auth,
            timeout: DEFAULT_TIMEOUT,
            rate_limit: RateLimitPolicy::disabled(),
            tls: TlsMode::Verify,
            default_headers: Vec::new(),
            cookie_store: false,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.trim().is_empty());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = policy;
        self
    }

    #[must_use]
    pub fn tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.default_headers
            .push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn cookie_store(mut self, enabled: bool) -> Self {
        self.cookie_store = enabled;
        self
    }

    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }
}

#[derive(Debug, Error)]
pub enum ClientBuildError {
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
    #[error("failed to read CA bundle '{path}': {source}")]
    CaBundle {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
enum RequestAuth {
    Default,
    Override(String),
    Anonymous,
}

#[derive(Debug, Clone)]
enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseMode {
    Json,
    Text,
    Raw,
}

/// One outbound call, relative to the client's base URL.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    method: Method,
    path: String,
    segments: Vec<String>,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
    auth: RequestAuth,
    mode: ResponseMode,
    timeout: Option<Duration>,
}

impl UpstreamRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            segments: Vec::new(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            auth: RequestAuth::Default,
            mode: ResponseMode::Json,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append one path segment after `path`. The value is percent-encoded as a whole, so `/`,
    /// `?` and `#` cannot leave the segment; `.` and `..` are rejected when the URL is built.
    #[must_use]
    pub fn segment(mut self, value: impl ToString) -> Self {
        self.segments.push(value.to_string());
        self
    }

    #[must_use]
    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Add a query parameter only when a value is present.
    #[must_use]
    pub fn query_opt<T: ToString>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    /// Replace every occurrence of `key` with a single value.
    #[must_use]
    pub fn set_query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.retain(|(k, _)| k != key);
        self.query(key, value)
    }

    #[must_use]
    pub fn remove_query(mut self, key: &str) -> Self {
        self.query.retain(|(k, _)| k != key);
        self
    }

    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    #[must_use]
    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.body = Some(RequestBody::Form(fields));
        self
    }

    /// Use this credential instead of the client default. Blank values are ignored.
    #[must_use]
    pub fn credential(mut self, credential: Option<String>) -> Self {
        if let Some(c) = credential.filter(|c| !c.trim().is_empty()) {
            self.auth = RequestAuth::Override(c);
        }
        self
    }

    /// Send without any credential (public endpoints).
    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.auth = RequestAuth::Anonymous;
        self
    }

    /// Return the body as text instead of decoding JSON.
    #[must_use]
    pub fn text(mut self) -> Self {
        self.mode = ResponseMode::Text;
        self
    }

    /// Return the body bytes untouched (multiplexed container log streams).
    #[must_use]
    pub fn raw(mut self) -> Self {
        self.mode = ResponseMode::Raw;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }
}

/// Successful outcome of an upstream call.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamResponse {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
    /// 204 or a 2xx with an empty body.
    Empty,
}

impl UpstreamResponse {
    /// Collapse into a JSON value; empty bodies become the no-content marker.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Json(v) => v,
            Self::Text(s) => Value::String(s),
            Self::Bytes(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
            Self::Empty => no_content_marker(),
        }
    }
}

/// Payload returned for 204/empty-body successes.
#[must_use]
pub fn no_content_marker() -> Value {
    json!({ "status": "success", "message": NO_CONTENT_MESSAGE })
}

/// One page of a token-paginated listing.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

#[derive(Clone)]
pub struct UpstreamClient {
    inner: Arc<UpstreamClientInner>,
}

struct UpstreamClientInner {
    client: Client,
    base_url: String,
    credential: Option<String>,
    auth: AuthStyle,
    timeout: Duration,
    rate_limit: RateLimitPolicy,
    default_headers: Vec<(String, String)>,
    cancel: CancellationToken,
}

impl UpstreamClient {
    /// Build a client for one upstream.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL does not parse, the CA bundle cannot be read, or the
    /// underlying HTTP client cannot be constructed.
    pub fn new(config: UpstreamConfig) -> std::result::Result<Self, ClientBuildError> {
        let parsed = Url::parse(&config.base_url).map_err(|e| ClientBuildError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(ClientBuildError::InvalidBaseUrl {
                url: config.base_url.clone(),
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
            });
        }

        let mut builder = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .cookie_store(config.cookie_store);
        match &config.tls {
            TlsMode::Verify => {}
            TlsMode::Insecure => builder = builder.danger_accept_invalid_certs(true),
            TlsMode::CustomCa(path) => {
                let pem = std::fs::read(path).map_err(|source| ClientBuildError::CaBundle {
                    path: path.display().to_string(),
                    source,
                })?;
                builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
            }
        }

        Ok(Self {
            inner: Arc::new(UpstreamClientInner {
                client: builder.build()?,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                credential: config.credential,
                auth: config.auth,
                timeout: config.timeout,
                rate_limit: config.rate_limit,
                default_headers: config.default_headers,
                cancel: config.cancel,
            }),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.inner.credential.is_some()
    }

    /// Perform one call and classify the outcome.
    ///
    /// # Errors
    ///
    /// See [`UpstreamError`]; the variant reflects the first failing stage.
    pub async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse> {
        let credential = self.resolve_credential(&request)?;
        let url = self.build_url(&request, credential.as_deref())?;
        let redacted = redact_url(&url);
        info!(method = %request.method, url = %redacted, "upstream request");

        let outcome = self.send_with_backoff(&request, url, credential.as_deref()).await;
        if let Err(err) = &outcome {
            warn!(
                method = %request.method,
                url = %redacted,
                kind = err.kind(),
                error = %err,
                "upstream request failed"
            );
        }
        outcome
    }

    /// [`send`](Self::send), collapsed to a JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub async fn send_json(&self, request: UpstreamRequest) -> Result<Value> {
        Ok(self.send(request).await?.into_value())
    }

    /// Run a GraphQL operation against the base URL and return its `data`.
    ///
    /// # Errors
    ///
    /// Any gateway error, or [`UpstreamError::Application`] if the response carries `errors`.
    pub async fn graphql(
        &self,
        query: &str,
        variables: Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let mut request =
            UpstreamRequest::post("").json(json!({ "query": query, "variables": variables }));
        if let Some(t) = timeout {
            request = request.timeout(t);
        }

        let body = match self.send(request).await? {
            UpstreamResponse::Json(v) => v,
            UpstreamResponse::Text(_) | UpstreamResponse::Bytes(_) | UpstreamResponse::Empty => {
                return Err(UpstreamError::decode("GraphQL endpoint returned no JSON body"));
            }
        };

        if let Some(errors) = body.get("errors").and_then(Value::as_array)
            && !errors.is_empty()
        {
            let messages: Vec<&str> = errors
                .iter()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown GraphQL error")
                })
                .collect();
            return Err(UpstreamError::application(messages.join("; ")));
        }

        Ok(body.get("data").cloned().unwrap_or(Value::Null))
    }

    /// Follow `nextToken` pagination, collecting items from every page.
    ///
    /// `split_page` turns one decoded body into its items plus the continuation token. After the
    /// first page `pageSize` is dropped and `nextToken` is set. At most `max_pages` are fetched.
    ///
    /// # Errors
    ///
    /// The first gateway or `split_page` error aborts the listing.
    pub async fn paginate<F>(
        &self,
        request: UpstreamRequest,
        max_pages: usize,
        mut split_page: F,
    ) -> Result<Vec<Value>>
    where
        F: FnMut(Value) -> Result<Page>,
    {
        let mut all = Vec::new();
        let mut request = request;
        for _ in 0..max_pages {
            let page = split_page(self.send_json(request.clone()).await?)?;
            all.extend(page.items);
            match page.next_token.filter(|t| !t.is_empty()) {
                Some(token) => {
                    request = request.remove_query("pageSize").set_query("nextToken", token);
                }
                None => return Ok(all),
            }
        }

        warn!(
            max_pages,
            items = all.len(),
            "pagination stopped at page limit"
        );
        Ok(all)
    }

    fn resolve_credential(&self, request: &UpstreamRequest) -> Result<Option<String>> {
        match (&request.auth, &self.inner.auth) {
            (RequestAuth::Anonymous, _) | (_, AuthStyle::Session) => Ok(None),
            (RequestAuth::Override(c), _) => Ok(Some(c.clone())),
            (RequestAuth::Default, _) => match &self.inner.credential {
                Some(c) => Ok(Some(c.clone())),
                None => Err(UpstreamError::AuthenticationMissing(format!(
                    "no credential configured for {}",
                    self.inner.base_url
                ))),
            },
        }
    }

    fn build_url(&self, request: &UpstreamRequest, credential: Option<&str>) -> Result<Url> {
        let path = if request.path.is_empty() || request.path.starts_with('/') {
            request.path.clone()
        } else {
            format!("/{}", request.path)
        };
        let mut url = Url::parse(&format!("{}{path}", self.inner.base_url))
            .map_err(|e| UpstreamError::validation(format!("invalid request URL: {e}")))?;
        if !request.segments.is_empty() {
            if let Some(bad) = request
                .segments
                .iter()
                .find(|s| matches!(s.as_str(), "" | "." | ".."))
            {
                return Err(UpstreamError::validation(format!(
                    "invalid path segment '{bad}'"
                )));
            }
            url.path_segments_mut()
                .map_err(|()| UpstreamError::validation("base URL cannot take a path"))?
                .pop_if_empty()
                .extend(&request.segments);
        }

        let query_auth = match (&self.inner.auth, credential) {
            (AuthStyle::Query(name), Some(c)) => Some((name.as_str(), c)),
            _ => None,
        };
        if !request.query.is_empty() || query_auth.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &request.query {
                pairs.append_pair(k, v);
            }
            if let Some((name, value)) = query_auth {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    fn build_request(
        &self,
        request: &UpstreamRequest,
        url: Url,
        credential: Option<&str>,
    ) -> reqwest::RequestBuilder {
        let inner = &self.inner;
        let mut builder = inner
            .client
            .request(request.method.clone(), url)
            .timeout(request.timeout.unwrap_or(inner.timeout));

        for (k, v) in inner.default_headers.iter().chain(&request.headers) {
            builder = builder.header(k, v);
        }

        if let Some(c) = credential {
            builder = match &inner.auth {
                AuthStyle::Header(name) => builder.header(name, c),
                AuthStyle::Bearer => builder.bearer_auth(c),
                AuthStyle::Query(_) | AuthStyle::Session => builder,
            };
        }

        match &request.body {
            Some(RequestBody::Json(v)) => builder.json(v),
            Some(RequestBody::Form(fields)) => builder.form(fields),
            None => builder,
        }
    }

    async fn send_with_backoff(
        &self,
        request: &UpstreamRequest,
        url: Url,
        credential: Option<&str>,
    ) -> Result<UpstreamResponse> {
        let policy = self.inner.rate_limit;
        let cancel = &self.inner.cancel;
        let mut retries = 0u32;

        loop {
            let pending = self.build_request(request, url.clone(), credential).send();
            let response = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(UpstreamError::Transport("request cancelled".to_string()));
                }
                r = pending => r?,
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS && policy.max_retries > 0 {
                if retries >= policy.max_retries {
                    return Err(UpstreamError::Http {
                        status: status.as_u16(),
                        message: format!("rate limited; gave up after {retries} retries"),
                    });
                }
                let wait = policy.wait_for(response.headers());
                retries += 1;
                warn!(
                    retry = retries,
                    wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "rate limited by upstream; backing off"
                );
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => {
                        return Err(UpstreamError::Transport(
                            "request cancelled while waiting out a rate limit".to_string(),
                        ));
                    }
                    () = tokio::time::sleep(wait) => {}
                }
                continue;
            }

            return classify(status, response, request.mode).await;
        }
    }
}

async fn classify(
    status: StatusCode,
    response: reqwest::Response,
    mode: ResponseMode,
) -> Result<UpstreamResponse> {
    if !status.is_success() {
        let body = response.bytes().await.unwrap_or_default();
        let message = extract_error_message(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown status")
                .to_string()
        });
        return Err(UpstreamError::Http {
            status: status.as_u16(),
            message,
        });
    }

    let body = response
        .bytes()
        .await
        .map_err(|e| UpstreamError::Transport(sanitize_reqwest_error(&e)))?;

    if status == StatusCode::NO_CONTENT || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(UpstreamResponse::Empty);
    }

    match mode {
        ResponseMode::Text => Ok(UpstreamResponse::Text(
            String::from_utf8_lossy(&body).into_owned(),
        )),
        ResponseMode::Raw => Ok(UpstreamResponse::Bytes(body.to_vec())),
        ResponseMode::Json => serde_json::from_slice(&body)
            .map(UpstreamResponse::Json)
            .map_err(|e| UpstreamError::decode(format!("upstream returned invalid JSON: {e}"))),
    }
}

/// Pull a human-readable message out of an error body.
///
/// JSON bodies are searched for the usual message fields; anything else is returned as
/// (truncated) text. `None` for empty bodies.
#[must_use]
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(v) = serde_json::from_str::<Value>(text)
        && let Some(message) = message_from_json(&v)
    {
        return Some(message);
    }

    Some(text.chars().take(MAX_ERROR_TEXT_CHARS).collect())
}

fn message_from_json(v: &Value) -> Option<String> {
    const KEYS: &[&str] = &["errorDescription", "message", "error", "detail"];
    KEYS.iter()
        .filter_map(|k| v.get(*k).and_then(Value::as_str))
        .chain(v.pointer("/error/message").and_then(Value::as_str))
        .chain(v.pointer("/errors/0/message").and_then(Value::as_str))
        .find(|s| !s.trim().is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use yarr_test_support::{MockResponse, MockUpstream, pick_unused_port};

    fn client_for(base_url: &str, credential: Option<&str>) -> UpstreamClient {
        UpstreamClient::new(
            UpstreamConfig::new(base_url, AuthStyle::Header("X-Api-Key".to_string()))
                .credential(credential.map(str::to_string))
                .timeout(Duration::from_secs(5)),
        )
        .expect("client")
    }

    #[tokio::test]
    async fn missing_credential_sends_nothing() {
        let upstream = MockUpstream::start(vec![MockResponse::json(200, &json!([]))])
            .await
            .expect("mock");
        let client = client_for(upstream.base_url(), None);

        let err = client
            .send(UpstreamRequest::get("/api/v1/indexer"))
            .await
            .expect_err("must fail");
        assert!(matches!(err, UpstreamError::AuthenticationMissing(_)));
        assert_eq!(upstream.hits(), 0);
    }

    #[tokio::test]
    async fn per_call_credential_overrides_missing_default() {
        let upstream = MockUpstream::start(vec![MockResponse::json(200, &json!({"id": 1}))])
            .await
            .expect("mock");
        let client = client_for(upstream.base_url(), None);

        let body = client
            .send_json(UpstreamRequest::post("message").credential(Some("app-token".into())))
            .await
            .expect("send");
        assert_eq!(body, json!({"id": 1}));
        let req = &upstream.requests()[0];
        assert_eq!(req.path, "/message");
        assert_eq!(req.header("x-api-key"), Some("app-token"));
    }

    #[tokio::test]
    async fn segments_cannot_escape_their_position() {
        let upstream = MockUpstream::start(vec![MockResponse::json(200, &json!({}))])
            .await
            .expect("mock");
        let client = client_for(&format!("{}/api", upstream.base_url()), Some("k"));

        client
            .send_json(
                UpstreamRequest::delete("endpoints")
                    .segment(2)
                    .segment("containers")
                    .segment("../../../users/1?x=1#frag"),
            )
            .await
            .expect("send");
        assert_eq!(
            upstream.requests()[0].path,
            "/api/endpoints/2/containers/..%2F..%2F..%2Fusers%2F1%3Fx=1%23frag"
        );

        for bad in ["..", ".", ""] {
            let err = client
                .send(UpstreamRequest::delete("endpoints").segment(bad))
                .await
                .expect_err("dot segment");
            assert_eq!(err.kind(), "LocalValidationError", "{bad:?}");
        }
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn no_content_and_empty_body_are_success() {
        let upstream = MockUpstream::start(vec![
            MockResponse::empty(204),
            MockResponse::text(200, "  "),
        ])
        .await
        .expect("mock");
        let client = client_for(upstream.base_url(), Some("k"));

        for _ in 0..2 {
            let out = client
                .send(UpstreamRequest::delete("/message/1"))
                .await
                .expect("success");
            assert_eq!(out, UpstreamResponse::Empty);
            assert_eq!(out.into_value(), no_content_marker());
        }
    }

    #[tokio::test]
    async fn http_errors_keep_status_and_nested_message() {
        let upstream = MockUpstream::start(vec![
            MockResponse::json(
                404,
                &json!({"error": "Not Found", "errorCode": 404, "errorDescription": "app does not exist"}),
            ),
            MockResponse::text(503, "maintenance"),
            MockResponse::empty(500),
        ])
        .await
        .expect("mock");
        let client = client_for(upstream.base_url(), Some("k"));

        let err = client
            .send(UpstreamRequest::get("/application/9"))
            .await
            .expect_err("404");
        assert_eq!(
            err,
            UpstreamError::Http {
                status: 404,
                message: "app does not exist".to_string()
            }
        );

        let err = client
            .send(UpstreamRequest::get("/x"))
            .await
            .expect_err("503");
        assert_eq!(err.status_code(), 503);
        assert_eq!(err.description(), "maintenance");

        let err = client
            .send(UpstreamRequest::get("/x"))
            .await
            .expect_err("500");
        assert_eq!(err.description(), "Internal Server Error");
    }

    #[tokio::test]
    async fn malformed_json_is_a_decode_error() {
        let upstream = MockUpstream::start(vec![MockResponse::text(200, "{\"truncated\": ")])
            .await
            .expect("mock");
        let client = client_for(upstream.base_url(), Some("k"));

        let err = client
            .send(UpstreamRequest::get("/status"))
            .await
            .expect_err("decode");
        assert_eq!(err.kind(), "ResponseDecodeError");
    }

    #[tokio::test]
    async fn text_mode_skips_json_decoding() {
        let upstream = MockUpstream::start(vec![MockResponse::text(200, "line one\nline two")])
            .await
            .expect("mock");
        let client = client_for(upstream.base_url(), Some("k"));

        let out = client
            .send(UpstreamRequest::get("/logs").text())
            .await
            .expect("text");
        assert_eq!(out, UpstreamResponse::Text("line one\nline two".to_string()));
    }

    #[tokio::test]
    async fn closed_port_is_a_transport_error() {
        let port = pick_unused_port().expect("port");
        let client = client_for(&format!("http://127.0.0.1:{port}"), Some("k"));

        let err = client
            .send(UpstreamRequest::get("/"))
            .await
            .expect_err("refused");
        assert!(matches!(err, UpstreamError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn query_auth_is_appended_after_params() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            200,
            &json!({"response": {"result": "success"}}),
        )])
        .await
        .expect("mock");
        let client = UpstreamClient::new(
            UpstreamConfig::new(
                format!("{}/", upstream.base_url()),
                AuthStyle::Query("apikey".to_string()),
            )
            .credential(Some("secret".to_string())),
        )
        .expect("client");

        client
            .send(
                UpstreamRequest::get("/api/v2")
                    .query("cmd", "get_activity")
                    .query_opt("length", None::<u32>),
            )
            .await
            .expect("send");

        let req = &upstream.requests()[0];
        assert_eq!(req.path, "/api/v2");
        assert_eq!(req.query_param("cmd").as_deref(), Some("get_activity"));
        assert_eq!(req.query_param("apikey").as_deref(), Some("secret"));
        assert_eq!(req.query_param("length"), None);
        assert_eq!(req.header("x-api-key"), None);
    }

    #[tokio::test]
    async fn rate_limit_waits_twice_then_returns_success() {
        let upstream = MockUpstream::start(vec![
            MockResponse::empty(429),
            MockResponse::empty(429),
            MockResponse::json(200, &json!({"data": [1, 2]})),
        ])
        .await
        .expect("mock");
        let wait = Duration::from_millis(50);
        let client = UpstreamClient::new(
            UpstreamConfig::new(upstream.base_url(), AuthStyle::Header("X-API-Key".into()))
                .credential(Some("k".into()))
                .rate_limit(RateLimitPolicy {
                    max_retries: 5,
                    default_wait: wait,
                    max_wait: Duration::from_secs(1),
                }),
        )
        .expect("client");

        let started = Instant::now();
        let body = client
            .send_json(UpstreamRequest::get("/v1/hosts"))
            .await
            .expect("eventually 200");
        assert_eq!(body, json!({"data": [1, 2]}));
        assert_eq!(upstream.hits(), 3);
        assert!(started.elapsed() >= wait * 2);
    }

    #[tokio::test]
    async fn rate_limit_retries_are_bounded() {
        let upstream = MockUpstream::start(vec![MockResponse::empty(429)])
            .await
            .expect("mock");
        let client = UpstreamClient::new(
            UpstreamConfig::new(upstream.base_url(), AuthStyle::Bearer)
                .credential(Some("k".into()))
                .rate_limit(RateLimitPolicy {
                    max_retries: 2,
                    default_wait: Duration::from_millis(10),
                    max_wait: Duration::from_millis(10),
                }),
        )
        .expect("client");

        let err = client
            .send(UpstreamRequest::get("/v1/sites"))
            .await
            .expect_err("exhausted");
        assert_eq!(err.status_code(), 429);
        assert_eq!(upstream.hits(), 3);
    }

    #[tokio::test]
    async fn cancellation_interrupts_rate_limit_wait() {
        let upstream = MockUpstream::start(vec![
            MockResponse::empty(429).with_header("Retry-After", "30"),
        ])
        .await
        .expect("mock");
        let cancel = CancellationToken::new();
        let client = UpstreamClient::new(
            UpstreamConfig::new(upstream.base_url(), AuthStyle::Header("X-API-Key".into()))
                .credential(Some("k".into()))
                .rate_limit(RateLimitPolicy::standard())
                .cancel_on(cancel.clone()),
        )
        .expect("client");

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let err = client
            .send(UpstreamRequest::get("/v1/hosts"))
            .await
            .expect_err("cancelled");
        canceller.await.expect("join");
        assert!(matches!(err, UpstreamError::Transport(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn disabled_policy_reports_429_directly() {
        let upstream = MockUpstream::start(vec![MockResponse::json(
            429,
            &json!({"message": "slow down"}),
        )])
        .await
        .expect("mock");
        let client = client_for(upstream.base_url(), Some("k"));

        let err = client
            .send(UpstreamRequest::get("/x"))
            .await
            .expect_err("429");
        assert_eq!(
            err,
            UpstreamError::Http {
                status: 429,
                message: "slow down".to_string()
            }
        );
        assert_eq!(upstream.hits(), 1);
    }

    #[tokio::test]
    async fn graphql_errors_are_application_errors() {
        let upstream = MockUpstream::start(vec![
            MockResponse::json(200, &json!({"errors": [{"message": "forbidden"}, {"message": "bad field"}]})),
            MockResponse::json(200, &json!({"data": {"info": {"os": {"hostname": "tower"}}}})),
        ])
        .await
        .expect("mock");
        let client = UpstreamClient::new(
            UpstreamConfig::new(
                format!("{}/graphql", upstream.base_url()),
                AuthStyle::Header("X-API-Key".into()),
            )
            .credential(Some("k".into())),
        )
        .expect("client");

        let err = client
            .graphql("{ info { os { hostname } } }", json!({}), None)
            .await
            .expect_err("errors");
        assert_eq!(err, UpstreamError::application("forbidden; bad field"));

        let data = client
            .graphql("{ info { os { hostname } } }", json!({}), None)
            .await
            .expect("data");
        assert_eq!(data["info"]["os"]["hostname"], "tower");

        let req = &upstream.requests()[0];
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/graphql");
        assert!(req.json_body().expect("json")["query"].is_string());
    }

    #[tokio::test]
    async fn paginate_follows_next_token_and_drops_page_size() {
        let upstream = MockUpstream::start(vec![
            MockResponse::json(200, &json!({"data": [{"id": 1}], "nextToken": "t2"})),
            MockResponse::json(200, &json!({"data": [{"id": 2}], "nextToken": ""})),
        ])
        .await
        .expect("mock");
        let client = client_for(upstream.base_url(), Some("k"));

        let items = client
            .paginate(
                UpstreamRequest::get("/v1/hosts").query("pageSize", 1),
                10,
                |body| {
                    Ok(Page {
                        items: body["data"].as_array().cloned().unwrap_or_default(),
                        next_token: body["nextToken"].as_str().map(str::to_string),
                    })
                },
            )
            .await
            .expect("pages");

        assert_eq!(items, vec![json!({"id": 1}), json!({"id": 2})]);
        let reqs = upstream.requests();
        assert_eq!(reqs[0].query_param("pageSize").as_deref(), Some("1"));
        assert_eq!(reqs[1].query_param("pageSize"), None);
        assert_eq!(reqs[1].query_param("nextToken").as_deref(), Some("t2"));
    }

    #[test]
    fn error_message_extraction_prefers_known_fields() {
        assert_eq!(
            extract_error_message(br#"{"errors":[{"message":"bad query"}]}"#).as_deref(),
            Some("bad query")
        );
        assert_eq!(
            extract_error_message(br#"{"error":{"message":"nested"}}"#).as_deref(),
            Some("nested")
        );
        assert_eq!(extract_error_message(b"   "), None);
        assert_eq!(
            extract_error_message(b"plain failure").as_deref(),
            Some("plain failure")
        );
    }
}
