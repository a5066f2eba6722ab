//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits, windows, thresholds > 0)
//! - Check that addresses and upstream URLs parse
//! - Detect duplicate route names
//! - Require the request timeout to cover the whole retry budget
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GuardConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use std::time::Duration;

use axum::http::HeaderName;

use crate::config::schema::{BreakerConfig, GuardConfig};
use crate::resilience::backoff::calculate_backoff;

/// A single rejected setting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "must be a socket address"));
    }

    if config.rate_limit.limit == 0 {
        errors.push(ValidationError::new("rate_limit.limit", "must be greater than 0"));
    }
    if config.rate_limit.window_ms == 0 {
        errors.push(ValidationError::new("rate_limit.window_ms", "must be greater than 0"));
    }
    if config.rate_limit.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("rate_limit.sweep_interval_secs", "must be greater than 0"));
    }

    if config.dedup.ttl_ms == 0 {
        errors.push(ValidationError::new("dedup.ttl_ms", "must be greater than 0"));
    }
    if config.dedup.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("dedup.sweep_interval_secs", "must be greater than 0"));
    }
    for name in &config.dedup.vary_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new(
                "dedup.vary_headers",
                format!("'{}' is not a valid header name", name),
            ));
        }
    }

    let retries = &config.retries;
    if !retries.backoff_multiplier.is_finite() || retries.backoff_multiplier < 1.0 {
        errors.push(ValidationError::new("retries.backoff_multiplier", "must be at least 1.0"));
    }
    if retries.max_delay_ms < retries.initial_delay_ms {
        errors.push(ValidationError::new(
            "retries.max_delay_ms",
            "must not be smaller than retries.initial_delay_ms",
        ));
    }

    check_breaker("breakers.database", &config.breakers.database, &mut errors);
    check_breaker("breakers.api", &config.breakers.api, &mut errors);

    if config.upstream.timeout_secs == 0 {
        errors.push(ValidationError::new("upstream.timeout_secs", "must be greater than 0"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    } else {
        let budget = retry_budget(config);
        if budget > Duration::from_secs(config.timeouts.request_secs) {
            errors.push(ValidationError::new(
                "timeouts.request_secs",
                format!(
                    "must cover the worst-case retry budget of {} ms (every attempt timing out plus backoff)",
                    budget.as_millis()
                ),
            ));
        }
    }

    let mut names = HashSet::new();
    for (i, route) in config.routes.iter().enumerate() {
        let field = |name: &str| format!("routes[{}].{}", i, name);

        if route.name.is_empty() {
            errors.push(ValidationError::new(field("name"), "must not be empty"));
        } else if !names.insert(route.name.as_str()) {
            errors.push(ValidationError::new(field("name"), format!("duplicate route '{}'", route.name)));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(field("path_prefix"), "must start with '/'"));
        }
        match url::Url::parse(&route.upstream_url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(_) => errors.push(ValidationError::new(field("upstream_url"), "must use http or https")),
            Err(e) => errors.push(ValidationError::new(field("upstream_url"), e.to_string())),
        }
    }

    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "required when the admin API is enabled"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "must be a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Longest a retried GET can spend upstream: every attempt hits the upstream
/// timeout and every retry waits its full backoff.
pub fn retry_budget(config: &GuardConfig) -> Duration {
    let retries = &config.retries;
    let attempts = retries.max_retries.saturating_add(1);
    let attempt_time = Duration::from_secs(config.upstream.timeout_secs.max(1)).saturating_mul(attempts);
    let backoff: Duration = (0..retries.max_retries)
        .map(|retry| {
            calculate_backoff(
                retry,
                Duration::from_millis(retries.initial_delay_ms),
                retries.backoff_multiplier,
                Duration::from_millis(retries.max_delay_ms),
            )
        })
        .fold(Duration::ZERO, Duration::saturating_add);
    attempt_time.saturating_add(backoff)
}

fn check_breaker(prefix: &str, breaker: &BreakerConfig, errors: &mut Vec<ValidationError>) {
    if breaker.threshold == 0 {
        errors.push(ValidationError::new(format!("{}.threshold", prefix), "must be greater than 0"));
    }
    if breaker.timeout_ms == 0 {
        errors.push(ValidationError::new(format!("{}.timeout_ms", prefix), "must be greater than 0"));
    }
}
