//! Request guard: rate limiting, request deduplication, and retry with
//! circuit breaking, packaged as a library and as a gateway in front of
//! upstream data services.

pub mod admin;
pub mod cache;
pub mod clock;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use cache::{generate_cache_key, RequestCache};
pub use config::GuardConfig;
pub use http::GuardServer;
pub use lifecycle::shutdown::Shutdown;
pub use resilience::{BreakerError, CircuitBreaker, RetryPolicy};
pub use security::{client_ip, RateLimiter};
