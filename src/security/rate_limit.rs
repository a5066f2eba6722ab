//! Fixed-window rate limiting keyed by client identifier.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::net::SocketAddr;

use crate::clock::SharedClock;
use crate::config::RateLimitConfig;
use crate::http::response::json_error_with;
use crate::lifecycle::maintenance::Sweep;
use crate::observability::metrics;
use crate::security::headers::resolve_client_key;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// End of the current window, in epoch milliseconds.
    pub reset: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    reset_time: u64,
}

/// Per-identifier request counters.
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    clock: SharedClock,
    sweep_interval: Duration,
}

impl RateLimiter {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
    pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

    pub fn new(clock: SharedClock, sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            sweep_interval,
        }
    }

    /// Count a request from `identifier` against `limit` requests per `window`.
    ///
    /// Rejected requests are not counted. Zero `limit` or `window` are raised
    /// to 1.
    pub fn check(&self, identifier: &str, limit: u32, window: Duration) -> RateLimitResult {
        let limit = limit.max(1);
        let window_ms = (window.as_millis() as u64).max(1);
        let now = self.clock.now_millis();
        let fresh = RateLimitEntry {
            count: 1,
            reset_time: now.saturating_add(window_ms),
        };

        match self.entries.entry(identifier.to_owned()) {
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                accepted(limit, fresh)
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if now >= entry.reset_time {
                    *entry = fresh;
                    accepted(limit, fresh)
                } else if entry.count >= limit {
                    RateLimitResult {
                        success: false,
                        limit,
                        remaining: 0,
                        reset: entry.reset_time,
                    }
                } else {
                    entry.count += 1;
                    accepted(limit, *entry)
                }
            }
        }
    }

    /// [`check`](Self::check) with the default limit of 100 requests per minute.
    pub fn check_default(&self, identifier: &str) -> RateLimitResult {
        self.check(identifier, Self::DEFAULT_LIMIT, Self::DEFAULT_WINDOW)
    }

    /// Whole seconds until `result.reset`, rounded up, at least 1.
    pub fn retry_after_secs(&self, result: &RateLimitResult) -> u64 {
        let wait_ms = result.reset.saturating_sub(self.clock.now_millis());
        wait_ms.div_ceil(1000).max(1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn accepted(limit: u32, entry: RateLimitEntry) -> RateLimitResult {
    RateLimitResult {
        success: true,
        limit,
        remaining: limit.saturating_sub(entry.count),
        reset: entry.reset_time,
    }
}

impl Sweep for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Drop entries whose window has ended.
    fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_time > now);
        let remaining = self.entries.len();
        metrics::record_rate_limit_entries(remaining);
        before.saturating_sub(remaining)
    }
}

/// State for [`rate_limit_middleware`].
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitState {
    pub fn new(limiter: Arc<RateLimiter>, config: &RateLimitConfig) -> Self {
        Self {
            limiter,
            limit: config.limit,
            window: Duration::from_millis(config.window_ms),
        }
    }
}

/// Middleware enforcing the per-client limit and reporting it in headers.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip());
    let client = resolve_client_key(request.headers(), peer);

    let result = state.limiter.check(&client, state.limit, state.window);

    if !result.success {
        let retry_after = state.limiter.retry_after_secs(&result);
        tracing::warn!(client = %client, limit = result.limit, retry_after, "Rate limit exceeded");
        metrics::record_rate_limited();

        let mut response = json_error_with(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests",
            serde_json::json!({ "retry_after": retry_after }),
        );
        let headers = response.headers_mut();
        apply_rate_limit_headers(headers, &result);
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(retry_after));
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &result);
    response
}

/// Write the `X-RateLimit-*` headers for `result`.
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(result.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(result.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(result.reset));
}
