//! Account operations relayed to the ChatGPT backend.
//!
//! Each operation validates its inputs before touching the network, issues
//! one upstream call (or the fixed sequence for [`AccountProxy::sync`]), and
//! folds the answer into an [`Outcome`].

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::classify::classify_upstream_error;
use crate::retry::{with_retry, RetryPolicy};
use crate::types::{
    AccessGrant, Acknowledged, Failure, FailureKind, ListPage, Outcome, SubscriptionSummary,
    SyncReport,
};
use crate::upstream::{
    build_headers, session_headers, Headers, UpstreamClient, UpstreamRequest, UpstreamResponse,
};

/// Page size for member and invite listings.
const PAGE_LIMIT: &str = "100";
const INVITE_ROLE: &str = "standard-user";

pub struct AccountProxy {
    upstream: Arc<dyn UpstreamClient>,
    retry: RetryPolicy,
}

impl AccountProxy {
    pub fn new(upstream: Arc<dyn UpstreamClient>, retry: RetryPolicy) -> Self {
        Self { upstream, retry }
    }

    /// Exchange a browser session token for an API access token.
    ///
    /// Retries on any failure, including a 200 without `accessToken`.
    pub async fn exchange_token(&self, session_token: &str) -> Outcome<AccessGrant> {
        if session_token.is_empty() {
            return Failure::new(FailureKind::MissingParams, "Missing session_token").into();
        }

        let request = session_request(session_token);
        let result = with_retry(&self.retry, |attempt| {
            let request = request.clone();
            async move {
                debug!(attempt, "exchanging session token");
                let response = self.upstream.send(request).await;
                match access_token_from(&response) {
                    Some(access_token) => Ok(AccessGrant { access_token }),
                    None => Err(exchange_failure(&response)),
                }
            }
        })
        .await;

        match result {
            Ok(grant) => Outcome::Success(grant),
            Err(failure) => {
                warn!(status = ?failure.status, "session token exchange failed");
                Outcome::Failure(failure)
            }
        }
    }

    pub async fn subscription(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Outcome<SubscriptionSummary> {
        if access_token.is_empty() || account_id.is_empty() {
            return Failure::missing_params().into();
        }

        let headers = build_headers(access_token, account_id);
        let response = self
            .upstream
            .send(subscription_request(account_id, headers))
            .await;

        if let Some(data) = response.ok_data() {
            return decode::<SubscriptionSummary>(data, response.status).into();
        }
        let failure = Failure::from_upstream(&response);
        if matches!(response.status, 401 | 403) {
            return Failure {
                error_type: FailureKind::Banned,
                ..failure
            }
            .with_banned(true)
            .into();
        }
        failure.into()
    }

    pub async fn members(&self, access_token: &str, account_id: &str) -> Outcome<ListPage> {
        if access_token.is_empty() || account_id.is_empty() {
            return Failure::missing_params().into();
        }

        let headers = build_headers(access_token, account_id);
        let response = self.upstream.send(members_request(account_id, headers)).await;
        page_from(&response).into()
    }

    pub async fn invites(&self, access_token: &str, account_id: &str) -> Outcome<ListPage> {
        if access_token.is_empty() || account_id.is_empty() {
            return Failure::missing_params().into();
        }

        let headers = build_headers(access_token, account_id);
        let response = self.upstream.send(invites_request(account_id, headers)).await;
        page_from(&response).into()
    }

    pub async fn send_invite(
        &self,
        access_token: &str,
        account_id: &str,
        email: &str,
    ) -> Outcome<Acknowledged> {
        if access_token.is_empty() || account_id.is_empty() || email.is_empty() {
            return Failure::missing_params().into();
        }

        let request = UpstreamRequest::new(Method::POST, invites_path(account_id))
            .headers(build_headers(access_token, account_id))
            .json(json!({
                "email_addresses": [email],
                "role": INVITE_ROLE,
                "resend_emails": true,
            }));
        acknowledge(&self.upstream.send(request).await)
    }

    pub async fn kick_member(
        &self,
        access_token: &str,
        account_id: &str,
        user_id: &str,
    ) -> Outcome<Acknowledged> {
        if access_token.is_empty() || account_id.is_empty() || user_id.is_empty() {
            return Failure::missing_params().into();
        }

        let request = UpstreamRequest::new(
            Method::DELETE,
            ["backend-api", "accounts", account_id, "users", user_id],
        )
        .headers(build_headers(access_token, account_id));
        acknowledge(&self.upstream.send(request).await)
    }

    pub async fn cancel_invite(
        &self,
        access_token: &str,
        account_id: &str,
        email: &str,
    ) -> Outcome<Acknowledged> {
        if access_token.is_empty() || account_id.is_empty() || email.is_empty() {
            return Failure::missing_params().into();
        }

        let request = UpstreamRequest::new(Method::DELETE, invites_path(account_id))
            .headers(build_headers(access_token, account_id))
            .json(json!({ "email_address": email }));
        acknowledge(&self.upstream.send(request).await)
    }

    /// Token exchange followed by a concurrent subscription/members/invites
    /// fetch.
    ///
    /// A subscription failure fails the whole sync, even when the member and
    /// invite listings succeeded. `banned` is set for a 401/403, and also for
    /// any other status whose error body classifies as `banned` (a
    /// deactivated account can come back as 402). Member or invite failures
    /// only blank their own list and set the matching `*_error` field. A 200
    /// listing whose `items` is not an array yields an empty list.
    pub async fn sync(&self, session_token: &str, account_id: &str) -> Outcome<SyncReport> {
        if session_token.is_empty() || account_id.is_empty() {
            return Failure::missing_params().into();
        }

        let grant = match self.exchange_token(session_token).await {
            Outcome::Success(grant) => grant,
            Outcome::Failure(failure) => return failure.with_banned(true).into(),
        };

        let access_token = grant.access_token.as_str();
        let (subscription, members, invites) = tokio::join!(
            self.upstream.send(subscription_request(
                account_id,
                build_headers(access_token, account_id)
            )),
            self.upstream.send(members_request(
                account_id,
                build_headers(access_token, account_id)
            )),
            self.upstream.send(invites_request(
                account_id,
                build_headers(access_token, account_id)
            )),
        );

        let subscription = match subscription.ok_data() {
            Some(data) => match decode::<SubscriptionSummary>(data, subscription.status) {
                Ok(summary) => summary,
                Err(failure) => return failure.into(),
            },
            None => return sync_subscription_failure(&subscription).into(),
        };

        let (members, members_error) = split_page(page_from(&members));
        let (invites, invites_error) = split_page(page_from(&invites));

        info!(
            members = members.len(),
            invites = invites.len(),
            members_failed = members_error.is_some(),
            invites_failed = invites_error.is_some(),
            "account synced"
        );

        Outcome::Success(SyncReport {
            subscription,
            members,
            members_error,
            invites,
            invites_error,
        })
    }
}

fn session_request(session_token: &str) -> UpstreamRequest {
    UpstreamRequest::get(["api", "auth", "session"]).headers(session_headers(session_token))
}

fn subscription_request(account_id: &str, headers: Headers) -> UpstreamRequest {
    UpstreamRequest::get(["backend-api", "subscriptions"])
        .query("account_id", account_id)
        .headers(headers)
}

fn members_request(account_id: &str, headers: Headers) -> UpstreamRequest {
    UpstreamRequest::get(["backend-api", "accounts", account_id, "users"])
        .query("offset", "0")
        .query("limit", PAGE_LIMIT)
        .query("query", "")
        .headers(headers)
}

fn invites_path(account_id: &str) -> [&str; 4] {
    ["backend-api", "accounts", account_id, "invites"]
}

fn invites_request(account_id: &str, headers: Headers) -> UpstreamRequest {
    UpstreamRequest::get(invites_path(account_id))
        .query("offset", "0")
        .query("limit", PAGE_LIMIT)
        .headers(headers)
}

fn access_token_from(response: &UpstreamResponse) -> Option<String> {
    response
        .ok_data()
        .and_then(|data| data.get("accessToken"))
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn exchange_failure(response: &UpstreamResponse) -> Failure {
    if response.ok_data().is_some() {
        return Failure::new(
            FailureKind::UpstreamFailure,
            "session response missing accessToken",
        )
        .with_status(response.status);
    }
    Failure::from_upstream(response)
}

fn decode<T: DeserializeOwned>(data: &Value, status: u16) -> Result<T, Failure> {
    serde_json::from_value(data.clone()).map_err(|e| {
        warn!(error = %e, "unexpected upstream payload shape");
        Failure::new(
            FailureKind::UpstreamFailure,
            format!("unexpected upstream response: {}", e),
        )
        .with_status(status)
    })
}

fn page_from(response: &UpstreamResponse) -> Result<ListPage, Failure> {
    match response.ok_data() {
        Some(data) => decode(data, response.status),
        None => Err(Failure::from_upstream(response)),
    }
}

fn split_page(page: Result<ListPage, Failure>) -> (Vec<Value>, Option<String>) {
    match page {
        Ok(page) => (page.into_items(), None),
        Err(failure) => (Vec::new(), Some(failure.error)),
    }
}

fn acknowledge(response: &UpstreamResponse) -> Outcome<Acknowledged> {
    if response.is_ok() {
        return Outcome::Success(Acknowledged {
            status: response.status,
        });
    }
    Failure::from_upstream(response).into()
}

fn sync_subscription_failure(response: &UpstreamResponse) -> Failure {
    let (kind, message) = classify_upstream_error(response.error_text().unwrap_or_default());
    let banned = matches!(response.status, 401 | 403) || kind == FailureKind::Banned;
    Failure::new(kind, message)
        .with_status(response.status)
        .with_banned(banned)
}
