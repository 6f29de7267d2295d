//! Configuration from environment variables and an optional YAML file.
//!
//! ```yaml
//! port: 8787
//! upstream_base_url: "https://chatgpt.com"
//! request_timeout_secs: 30
//! retry:
//!   max_attempts: 3
//!   delay_ms: 500
//! ```
//!
//! **Environment variables** (override the file):
//! - `API_KEY`: inbound bearer secret (required, env only)
//! - `SEATGATE_CONFIG`: path of the YAML file above
//! - `PORT`: server port (default: 8787)
//! - `UPSTREAM_BASE_URL`: ChatGPT base URL (default: https://chatgpt.com)
//! - `REQUEST_TIMEOUT_SECS`: upstream request timeout (default: 30)

use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://chatgpt.com";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug)]
pub struct ProxyConfig {
    pub port: u16,
    /// Secret every inbound request must present as `Authorization: Bearer <secret>`.
    pub api_key: SecretString,
    pub upstream_base_url: String,
    pub request_timeout_secs: u64,
    pub retry: RetryPolicy,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SeatgateYamlConfig {
    port: Option<u16>,
    upstream_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
    retry: Option<RetryPolicy>,
}

impl ProxyConfig {
    /// Defaults for everything except the secret.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            port: DEFAULT_PORT,
            api_key: SecretString::from(api_key.into()),
            upstream_base_url: DEFAULT_UPSTREAM_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }

    /// Load from the process environment (and `SEATGATE_CONFIG`, if set).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using `lookup` in place of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_key = lookup("API_KEY").unwrap_or_default();
        if api_key.trim().is_empty() {
            bail!("API_KEY must be set to a non-empty secret");
        }

        let mut config = Self::new(api_key);

        if let Some(path) = lookup("SEATGATE_CONFIG").filter(|p| !p.is_empty()) {
            config.apply_yaml_file(&path)?;
        }

        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.port = port;
        }
        if let Some(url) = lookup("UPSTREAM_BASE_URL").filter(|u| !u.is_empty()) {
            config.upstream_base_url = url;
        }
        if let Some(secs) = parse_var(&lookup, "REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = secs;
        }

        Ok(config)
    }

    /// Overlay settings from a YAML file. The secret is never read from disk.
    pub fn apply_yaml_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read seatgate config from {:?}", path))?;

        let yaml: SeatgateYamlConfig = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse seatgate config {:?}", path))?;

        if let Some(port) = yaml.port {
            self.port = port;
        }
        if let Some(url) = yaml.upstream_base_url {
            self.upstream_base_url = url;
        }
        if let Some(secs) = yaml.request_timeout_secs {
            self.request_timeout_secs = secs;
        }
        if let Some(retry) = yaml.retry {
            self.retry = retry;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The exact `Authorization` header value inbound calls must present.
    pub fn expected_authorization(&self) -> String {
        format!("Bearer {}", self.api_key.expose_secret())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("invalid {} value {:?}", key, raw)),
        None => Ok(None),
    }
}
