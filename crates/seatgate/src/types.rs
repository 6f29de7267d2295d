//! Wire types for the inbound JSON contract.
//!
//! Every operation answers with an [`Outcome`]: either
//! `{"success": true, ...payload}` or
//! `{"success": false, "error": ..., "error_type": ...}`. A result is never
//! half-populated; the payload and failure fields are mutually exclusive.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::upstream::UpstreamResponse;

/// Tagged result of a logical operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Success(T),
    Failure(Failure),
}

#[derive(Serialize)]
struct Tagged<'a, B> {
    success: bool,
    #[serde(flatten)]
    body: &'a B,
}

impl<T: Serialize> Serialize for Outcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Outcome::Success(payload) => Tagged {
                success: true,
                body: payload,
            }
            .serialize(serializer),
            Outcome::Failure(failure) => Tagged {
                success: false,
                body: failure,
            }
            .serialize(serializer),
        }
    }
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            Outcome::Success(payload) => Some(payload),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }
}

impl<T> From<Failure> for Outcome<T> {
    fn from(failure: Failure) -> Self {
        Outcome::Failure(failure)
    }
}

impl<T> From<Result<T, Failure>> for Outcome<T> {
    fn from(result: Result<T, Failure>) -> Self {
        match result {
            Ok(payload) => Outcome::Success(payload),
            Err(failure) => Outcome::Failure(failure),
        }
    }
}

/// User-facing failure category, serialized as `error_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A required request field was empty; no upstream call was made.
    MissingParams,
    /// Upstream answered with a non-200 status.
    UpstreamFailure,
    /// The upstream call never produced a status (network error, timeout).
    TransportError,
    TokenExpired,
    Banned,
    Expired,
    RateLimit,
    ServerError,
    /// Unclassified upstream error.
    Error,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::MissingParams => "missing_params",
            FailureKind::UpstreamFailure => "upstream_failure",
            FailureKind::TransportError => "transport_error",
            FailureKind::TokenExpired => "token_expired",
            FailureKind::Banned => "banned",
            FailureKind::Expired => "expired",
            FailureKind::RateLimit => "rate_limit",
            FailureKind::ServerError => "server_error",
            FailureKind::Error => "error",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure half of an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub error: String,
    pub error_type: FailureKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub banned: bool,
}

impl Failure {
    pub fn new(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_type: kind,
            status: None,
            banned: false,
        }
    }

    pub fn missing_params() -> Self {
        Self::new(FailureKind::MissingParams, "Missing params")
    }

    /// Failure carrying the raw upstream error text and status.
    pub fn from_upstream(response: &UpstreamResponse) -> Self {
        let kind = if response.is_transport_failure() {
            FailureKind::TransportError
        } else {
            FailureKind::UpstreamFailure
        };
        let error = response
            .error_text()
            .unwrap_or("unexpected upstream response")
            .to_string();
        Self::new(kind, error).with_status(response.status)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_banned(mut self, banned: bool) -> Self {
        self.banned = banned;
        self
    }
}

/// Inbound request body shared by every operation.
///
/// Fields that are absent or `null` read as empty strings.
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct OperationRequest {
    pub session_token: Option<String>,
    pub access_token: Option<String>,
    pub account_id: Option<String>,
    pub email: Option<String>,
    pub user_id: Option<String>,
}

impl OperationRequest {
    pub fn session_token(&self) -> &str {
        self.session_token.as_deref().unwrap_or_default()
    }

    pub fn access_token(&self) -> &str {
        self.access_token.as_deref().unwrap_or_default()
    }

    pub fn account_id(&self) -> &str {
        self.account_id.as_deref().unwrap_or_default()
    }

    pub fn email(&self) -> &str {
        self.email.as_deref().unwrap_or_default()
    }

    pub fn user_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or_default()
    }
}

impl std::fmt::Debug for OperationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRequest")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("account_id", &self.account_id)
            .field("email", &self.email)
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Access token obtained from a session token exchange.
#[derive(Clone, PartialEq, Serialize)]
pub struct AccessGrant {
    #[serde(rename = "accessToken")]
    pub access_token: String,
}

impl std::fmt::Debug for AccessGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGrant")
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

/// The four subscription fields the proxy exposes; everything else upstream
/// sends is dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSummary {
    pub seats_in_use: Value,
    pub seats_entitled: Value,
    pub plan_type: Value,
    pub active_until: Value,
}

/// One page of members or invites, passed through as upstream sent it.
///
/// `items` is kept as raw JSON: whatever upstream put there (even `null`)
/// is relayed. A missing key reads as `[]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage {
    #[serde(default = "no_items")]
    pub items: Value,
    #[serde(default = "zero_total")]
    pub total: Value,
}

impl ListPage {
    /// The items as a list; anything other than an array counts as empty.
    pub fn into_items(self) -> Vec<Value> {
        match self.items {
            Value::Array(items) => items,
            _ => Vec::new(),
        }
    }
}

fn no_items() -> Value {
    Value::Array(Vec::new())
}

fn zero_total() -> Value {
    Value::from(0)
}

/// Acknowledgement for write operations (invite, kick, cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Acknowledged {
    pub status: u16,
}

/// Combined dashboard view returned by the sync operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub subscription: SubscriptionSummary,
    pub members: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members_error: Option<String>,
    pub invites: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invites_error: Option<String>,
}
