//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (identify client: X-Forwarded-For, X-Real-IP, peer)
//!     → rate_limit.rs (fixed-window check, X-RateLimit-* headers, 429)
//!     → Pass to routing
//! ```

pub mod headers;
pub mod rate_limit;

pub use headers::client_ip;
pub use rate_limit::{rate_limit_middleware, RateLimitResult, RateLimitState, RateLimiter};
