//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to an upstream:
//!     → retries.rs (re-run retryable failures with backoff)
//!         → circuit_breaker.rs (fail fast while the upstream class is down)
//!             → upstream call
//! ```
//!
//! Each attempt made by the retry loop passes through the breaker, so every
//! failed attempt counts toward opening it. A breaker rejection is never
//! retried.

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;

pub use circuit_breaker::{BreakerError, BreakerKind, BreakerSnapshot, Breakers, CircuitBreaker, CircuitState};
pub use retries::RetryPolicy;
