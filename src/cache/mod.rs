//! Caching subsystem.
//!
//! # Data Flow
//! ```text
//! Wrapped call (name, args)
//!     → generate_cache_key (canonical JSON)
//!     → per-key lock (one execution per key at a time)
//!     → fresh entry? return it : run call, store Ok result
//! ```

pub mod dedup;

pub use dedup::{generate_cache_key, CacheError, Deduplicated, RequestCache};
