//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::resilience::BreakerKind;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream routes, matched by path prefix.
    pub routes: Vec<RouteConfig>,

    /// Outbound HTTP client settings.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Request deduplication configuration.
    pub dedup: DedupConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breakers, one per resource class.
    pub breakers: BreakersConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Route configuration mapping a path prefix to an upstream.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics and the dedup key.
    pub name: String,

    /// Host header to match (exact match).
    #[serde(default)]
    pub host: Option<String>,

    /// Path prefix to match. Stripped before forwarding.
    pub path_prefix: String,

    /// Base URL the remaining path is appended to.
    pub upstream_url: String,

    /// Breaker guarding this upstream.
    #[serde(default = "default_breaker")]
    pub breaker: BreakerKind,

    /// Collapse identical GET requests within the dedup TTL.
    #[serde(default)]
    pub dedup: bool,

    /// Route priority (higher = checked first).
    #[serde(default)]
    pub priority: u32,

    /// Extra headers added to every forwarded request (e.g. an upstream API key).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_breaker() -> BreakerKind {
    BreakerKind::Api
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Per-attempt timeout for upstream calls.
    pub timeout_secs: u64,

    /// Maximum request body forwarded upstream.
    pub max_body_bytes: usize,

    /// Honor `HTTP_PROXY` / `HTTPS_PROXY` for upstream calls.
    pub system_proxy: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            system_proxy: true,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Total request timeout, including retries. Must be at least the
    /// worst-case retry budget, or a hung upstream ends in 408 instead of 502.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable per-client rate limiting.
    pub enabled: bool,

    /// Requests allowed per window.
    pub limit: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// How often expired windows are purged.
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 100,
            window_ms: 60_000,
            sweep_interval_secs: 300,
        }
    }
}

/// Request deduplication configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Enable dedup for routes that opt in.
    pub enabled: bool,

    /// How long a successful result is reused.
    pub ttl_ms: u64,

    /// How often stale entries are purged.
    pub sweep_interval_secs: u64,

    /// Request headers that select a different upstream answer. Requests
    /// that differ in any of them never share a cached result.
    pub vary_headers: Vec<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 5_000,
            sweep_interval_secs: 60,
            vary_headers: [
                "authorization",
                "apikey",
                "accept",
                "accept-encoding",
                "accept-language",
                "prefer",
                "range",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay_ms: u64,

    /// Upper bound for any single delay.
    pub max_delay_ms: u64,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Settings for a single circuit breaker.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub threshold: u32,

    /// How long the breaker stays open before probing.
    pub timeout_ms: u64,
}

/// The named breakers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakersConfig {
    pub database: BreakerConfig,
    pub api: BreakerConfig,
}

impl Default for BreakersConfig {
    fn default() -> Self {
        Self {
            database: BreakerConfig {
                threshold: 5,
                timeout_ms: 60_000,
            },
            api: BreakerConfig {
                threshold: 10,
                timeout_ms: 30_000,
            },
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level when `RUST_LOG` is unset (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines.
    pub json_logs: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Prometheus exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,

    /// Bearer token required by every admin endpoint.
    pub api_key: String,
}
