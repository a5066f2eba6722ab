//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_requests_total` (counter): requests by route, status
//! - `guard_request_duration_seconds` (histogram): end-to-end latency by route
//! - `guard_upstream_duration_seconds` (histogram): per-call upstream latency by route
//! - `guard_rate_limited_total` (counter): requests rejected with 429
//! - `guard_rate_limit_entries` (gauge): tracked client windows
//! - `guard_dedup_total` (counter): dedup lookups by outcome (hit, miss)
//! - `guard_dedup_entries` (gauge): cached results
//! - `guard_retries_total` (counter): retry attempts
//! - `guard_breaker_rejections_total` (counter): calls refused by an open breaker
//! - `guard_breaker_transitions_total` (counter): state changes by breaker, target state
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder (tests, embedding) every call is a no-op

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, start: Instant) {
    let route = route.to_string();
    counter!("guard_requests_total", "route" => route.clone(), "status" => status.to_string()).increment(1);
    histogram!("guard_request_duration_seconds", "route" => route).record(start.elapsed().as_secs_f64());
}

pub fn record_upstream_duration(route: &str, start: Instant) {
    histogram!("guard_upstream_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("guard_rate_limited_total").increment(1);
}

pub fn record_rate_limit_entries(count: usize) {
    gauge!("guard_rate_limit_entries").set(count as f64);
}

pub fn record_dedup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("guard_dedup_total", "outcome" => outcome).increment(1);
}

pub fn record_dedup_entries(count: usize) {
    gauge!("guard_dedup_entries").set(count as f64);
}

pub fn record_retry() {
    counter!("guard_retries_total").increment(1);
}

pub fn record_breaker_rejection(breaker: &str) {
    counter!("guard_breaker_rejections_total", "breaker" => breaker.to_string()).increment(1);
}

pub fn record_breaker_transition(breaker: &str, to: CircuitState) {
    counter!(
        "guard_breaker_transitions_total",
        "breaker" => breaker.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
}
