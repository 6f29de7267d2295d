//! Scripted upstream for tests.
//!
//! [`MockUpstream`] answers requests from per-route queues and records every
//! call so tests can assert on call counts, headers, and bodies.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;

use crate::upstream::{UpstreamClient, UpstreamRequest, UpstreamResponse};

type RouteKey = (Method, String);

#[derive(Default)]
pub struct MockUpstream {
    routes: Mutex<HashMap<RouteKey, VecDeque<UpstreamResponse>>>,
    calls: Mutex<Vec<UpstreamRequest>>,
    delay: Option<Duration>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every answer, to observe concurrency.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue a response for `method path`.
    ///
    /// Responses are served in order; the last one keeps answering once the
    /// queue is down to a single entry.
    pub fn respond(self, method: Method, path: &str, response: UpstreamResponse) -> Self {
        lock(&self.routes)
            .entry((method, path.to_string()))
            .or_default()
            .push_back(response);
        self
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|r| r.method == method && r.path() == path)
            .count()
    }

    pub fn calls(&self) -> Vec<UpstreamRequest> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn send(&self, request: UpstreamRequest) -> UpstreamResponse {
        let key = (request.method.clone(), request.path());
        lock(&self.calls).push(request);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let mut routes = lock(&self.routes);
        match routes.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(unscripted),
            Some(queue) => queue.front().cloned().unwrap_or_else(unscripted),
            None => unscripted(),
        }
    }
}

/// Recovers the guard from a lock poisoned by a panicking caller.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn unscripted() -> UpstreamResponse {
    UpstreamResponse::transport("no mock response scripted")
}
