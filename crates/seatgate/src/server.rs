//! Actix Web HTTP server.
//!
//! Exposes the account operations as `POST /api/chatgpt/<operation>`:
//! - `token`, `subscription`, `members`, `invites`
//! - `invite`, `kick`, `cancel-invite`
//! - `sync`
//!
//! plus `GET /health`. Every response carries `Access-Control-Allow-Origin: *`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    http::{header, Method},
    middleware::DefaultHeaders,
    web, App, HttpRequest, HttpResponse, HttpServer,
};
use anyhow::{Context, Result};
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::{
    config::ProxyConfig,
    error::ProxyError,
    service::AccountProxy,
    types::{OperationRequest, Outcome},
    upstream::{ReqwestUpstream, UpstreamClient},
};

const OPERATION_PREFIX: &str = "/api/chatgpt/";

pub struct AppState {
    pub config: ProxyConfig,
    pub proxy: AccountProxy,
}

impl AppState {
    pub fn new(config: ProxyConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        let proxy = AccountProxy::new(upstream, config.retry);
        Self { config, proxy }
    }
}

/// Logical operations reachable under [`OPERATION_PREFIX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Token,
    Subscription,
    Members,
    Invites,
    Invite,
    Kick,
    CancelInvite,
    Sync,
}

impl Operation {
    pub fn from_path(path: &str) -> Option<Self> {
        let name = path.strip_prefix(OPERATION_PREFIX)?;
        let operation = match name {
            "token" => Operation::Token,
            "subscription" => Operation::Subscription,
            "members" => Operation::Members,
            "invites" => Operation::Invites,
            "invite" => Operation::Invite,
            "kick" => Operation::Kick,
            "cancel-invite" => Operation::CancelInvite,
            "sync" => Operation::Sync,
            _ => return None,
        };
        Some(operation)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Token => "token",
            Operation::Subscription => "subscription",
            Operation::Members => "members",
            Operation::Invites => "invites",
            Operation::Invite => "invite",
            Operation::Kick => "kick",
            Operation::CancelInvite => "cancel-invite",
            Operation::Sync => "sync",
        }
    }
}

pub async fn serve(config: ProxyConfig) -> Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);

    let upstream = ReqwestUpstream::new(&config.upstream_base_url, config.request_timeout())?;
    info!(
        addr = %addr,
        upstream = %config.upstream_base_url,
        timeout_secs = config.request_timeout_secs,
        "seatgate listening"
    );

    let state = web::Data::new(AppState::new(config, Arc::new(upstream)));

    HttpServer::new(move || app(state.clone()))
        .bind(&addr)
        .with_context(|| format!("failed to bind {}", addr))?
        .run()
        .await
        .context("server error")?;

    Ok(())
}

/// Build the application with all routes and middleware.
pub fn app(
    state: web::Data<AppState>,
) -> App<
    impl ServiceFactory<
        ServiceRequest,
        Config = (),
        Response = ServiceResponse<impl MessageBody>,
        Error = actix_web::Error,
        InitError = (),
    >,
> {
    App::new()
        .app_data(state)
        .wrap(cors())
        .wrap(DefaultHeaders::new().add((header::ACCESS_CONTROL_ALLOW_ORIGIN, "*")))
        .route("/health", web::get().to(health_check))
        .default_service(web::to(dispatch))
}

/// Origin handling for browser callers. Preflights fall through to
/// [`preflight`] so every OPTIONS gets the same fixed answer.
fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .send_wildcard()
        .disable_preflight()
}

async fn health_check() -> &'static str {
    "OK"
}

fn preflight() -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"))
        .insert_header((
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Content-Type, Authorization",
        ))
        .finish()
}

fn authorize(req: &HttpRequest, config: &ProxyConfig) -> Result<(), ProxyError> {
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if presented == Some(config.expected_authorization().as_str()) {
        return Ok(());
    }
    warn!(path = %req.path(), has_header = presented.is_some(), "rejected unauthorized request");
    Err(ProxyError::Unauthorized)
}

fn parse_body(body: &[u8]) -> Result<OperationRequest, ProxyError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(OperationRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ProxyError::Internal(format!("invalid request body: {}", e)))
}

async fn dispatch(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, ProxyError> {
    if req.method() == Method::OPTIONS {
        return Ok(preflight());
    }

    authorize(&req, &state.config)?;
    let operation = Operation::from_path(req.path()).ok_or(ProxyError::NotFound)?;
    if req.method() != Method::POST {
        return Err(ProxyError::MethodNotAllowed);
    }
    let request = parse_body(&body)?;

    info!(operation = operation.name(), "dispatching operation");

    let outcome = AssertUnwindSafe(run(&state.proxy, operation, &request))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(value)) => {
            if value.get("success") == Some(&Value::Bool(false)) {
                info!(
                    operation = operation.name(),
                    error_type = ?value.get("error_type"),
                    "operation failed"
                );
            }
            Ok(HttpResponse::Ok().json(value))
        }
        Ok(Err(e)) => {
            error!(operation = operation.name(), error = %e, "operation error");
            Err(e)
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(operation = operation.name(), error = %message, "operation panicked");
            Err(ProxyError::Internal(message))
        }
    }
}

async fn run(
    proxy: &AccountProxy,
    operation: Operation,
    req: &OperationRequest,
) -> Result<Value, ProxyError> {
    match operation {
        Operation::Token => to_json(proxy.exchange_token(req.session_token()).await),
        Operation::Subscription => {
            to_json(proxy.subscription(req.access_token(), req.account_id()).await)
        }
        Operation::Members => to_json(proxy.members(req.access_token(), req.account_id()).await),
        Operation::Invites => to_json(proxy.invites(req.access_token(), req.account_id()).await),
        Operation::Invite => to_json(
            proxy
                .send_invite(req.access_token(), req.account_id(), req.email())
                .await,
        ),
        Operation::Kick => to_json(
            proxy
                .kick_member(req.access_token(), req.account_id(), req.user_id())
                .await,
        ),
        Operation::CancelInvite => to_json(
            proxy
                .cancel_invite(req.access_token(), req.account_id(), req.email())
                .await,
        ),
        Operation::Sync => to_json(proxy.sync(req.session_token(), req.account_id()).await),
    }
}

fn to_json<T: Serialize>(outcome: Outcome<T>) -> Result<Value, ProxyError> {
    serde_json::to_value(outcome).map_err(|e| ProxyError::Internal(e.to_string()))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "internal error".to_string()
    }
}
