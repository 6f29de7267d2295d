//! Seatgate - authenticated proxy for ChatGPT team account management.
//!
//! Callers hold a long-lived ChatGPT browser session token. This crate keeps
//! that token away from the upstream API surface: every inbound call is gated
//! by a static bearer secret, dispatched to a small set of account operations
//! (subscription, members, invites), and answered with a stable JSON contract.
//!
//! Design goals:
//! - Exchange session tokens for access tokens with a bounded retry.
//! - Relay member/invite management calls with browser-like headers.
//! - Fan out the dashboard sync (subscription + members + invites) concurrently.
//! - Classify upstream error envelopes into a small, user-facing taxonomy.

pub mod classify;
pub mod config;
pub mod error;
pub mod retry;
pub mod server;
pub mod service;
pub mod testing;
pub mod types;
pub mod upstream;

pub use config::ProxyConfig;
pub use server::serve;
pub use service::AccountProxy;
pub use upstream::{ReqwestUpstream, UpstreamClient};
