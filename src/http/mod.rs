//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, trace, timeout)
//!     → security (per-client rate limit)
//!     → [routing layer picks route]
//!     → server.rs (dedup → retry → breaker)
//!     → upstream.rs (reqwest call)
//!     → response.rs (status mapping, JSON errors)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod upstream;

pub use request::{UuidRequestId, X_REQUEST_ID};
pub use server::{AppState, GuardServer, ServerError};
pub use upstream::{UpstreamClient, UpstreamError, UpstreamResponse};
