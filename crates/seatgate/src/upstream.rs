//! Upstream (ChatGPT backend) HTTP client.
//!
//! Requests are described by [`UpstreamRequest`] and answered with an
//! [`UpstreamResponse`], which never fails: transport errors and timeouts are
//! folded into a status-0 response so callers only deal with one shape.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
pub const BROWSER_ORIGIN: &str = "https://chatgpt.com";
pub const SESSION_COOKIE: &str = "__Secure-next-auth.session-token";

/// Maximum number of characters of an upstream error body kept in a response.
pub const ERROR_BODY_LIMIT: usize = 500;

/// Header set attached to an upstream request.
pub type Headers = Vec<(&'static str, String)>;

/// Headers for every authenticated backend call.
pub fn build_headers(access_token: &str, account_id: &str) -> Headers {
    vec![
        ("Accept", "*/*".to_string()),
        ("Authorization", format!("Bearer {}", access_token)),
        ("Chatgpt-Account-Id", account_id.to_string()),
        ("Content-Type", "application/json".to_string()),
        ("Origin", BROWSER_ORIGIN.to_string()),
        ("Referer", format!("{}/", BROWSER_ORIGIN)),
        ("User-Agent", BROWSER_USER_AGENT.to_string()),
    ]
}

/// Headers for the session endpoint, which authenticates by cookie.
pub fn session_headers(session_token: &str) -> Headers {
    vec![
        ("Accept", "*/*".to_string()),
        ("User-Agent", BROWSER_USER_AGENT.to_string()),
        ("Cookie", format!("{}={}", SESSION_COOKIE, session_token)),
    ]
}

/// A single outbound call, relative to the upstream base URL.
#[derive(Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Unencoded path segments; encoding happens when the URL is built.
    pub segments: Vec<String>,
    pub query: Vec<(&'static str, String)>,
    pub headers: Headers,
    pub body: Option<Value>,
}

impl UpstreamRequest {
    pub fn new<I, S>(method: Method, segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            segments: segments.into_iter().map(Into::into).collect(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, segments)
    }

    pub fn query(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.query.push((name, value.into()));
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// `/a/b/c` form of the path, used for logging and test routing.
    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl std::fmt::Debug for UpstreamRequest {
    // Header values carry bearer tokens and cookies, so only names are shown.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header_names: Vec<&str> = self.headers.iter().map(|(name, _)| *name).collect();
        f.debug_struct("UpstreamRequest")
            .field("method", &self.method)
            .field("path", &self.path())
            .field("query", &self.query)
            .field("headers", &header_names)
            .field("body", &self.body)
            .finish()
    }
}

/// Normalized upstream answer.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    /// HTTP status, or 0 when no response was received.
    pub status: u16,
    pub body: UpstreamBody,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamBody {
    /// Parsed JSON from a successful response.
    Data(Value),
    /// Raw error text, truncated to [`ERROR_BODY_LIMIT`] characters.
    Error(String),
}

impl UpstreamResponse {
    pub fn data(status: u16, data: Value) -> Self {
        Self {
            status,
            body: UpstreamBody::Data(data),
        }
    }

    pub fn error(status: u16, text: &str) -> Self {
        Self {
            status,
            body: UpstreamBody::Error(truncate_chars(text, ERROR_BODY_LIMIT)),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: 0,
            body: UpstreamBody::Error(message.into()),
        }
    }

    /// Normalize a raw HTTP answer: 2xx with a JSON body becomes `Data`,
    /// everything else keeps the (truncated) text.
    pub fn from_text(status: u16, text: &str) -> Self {
        if (200..300).contains(&status) {
            if let Ok(value) = serde_json::from_str::<Value>(text) {
                return Self::data(status, value);
            }
        }
        Self::error(status, text)
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_transport_failure(&self) -> bool {
        self.status == 0
    }

    /// JSON payload, only when the status is exactly 200.
    pub fn ok_data(&self) -> Option<&Value> {
        match &self.body {
            UpstreamBody::Data(value) if self.is_ok() => Some(value),
            _ => None,
        }
    }

    pub fn error_text(&self) -> Option<&str> {
        match &self.body {
            UpstreamBody::Error(text) => Some(text),
            UpstreamBody::Data(_) => None,
        }
    }
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Anything that can carry an [`UpstreamRequest`] to the backend.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> UpstreamResponse;
}

/// Production client backed by `reqwest`.
pub struct ReqwestUpstream {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestUpstream {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        use anyhow::Context;

        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid upstream base URL {:?}", base_url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("upstream base URL {:?} cannot carry a path", base_url.as_str());
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self { client, base_url })
    }

    pub fn url_for(&self, request: &UpstreamRequest) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(&request.segments);
        }
        if !request.query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in &request.query {
                pairs.append_pair(name, value);
            }
        }
        url
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    async fn send(&self, request: UpstreamRequest) -> UpstreamResponse {
        let url = self.url_for(&request);
        debug!(method = %request.method, path = %request.path(), "upstream request");

        let mut builder = self.client.request(request.method.clone(), url);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, path = %request.path(), "upstream request failed");
                return UpstreamResponse::transport(e.to_string());
            }
        };

        let status = response.status().as_u16();
        let text = match response.text().await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, %status, path = %request.path(), "failed to read upstream body");
                return UpstreamResponse::transport(e.to_string());
            }
        };

        if status != 200 {
            warn!(%status, path = %request.path(), "upstream returned non-200");
        }
        UpstreamResponse::from_text(status, &text)
    }
}
