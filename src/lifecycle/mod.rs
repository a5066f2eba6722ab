//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//!
//! Maintenance (maintenance.rs):
//!     Interval tick → Sweep expired rate-limit / dedup entries
//!     Shutdown → Sweeper loop exits
//! ```
//!
//! # Design Decisions
//! - Background sweepers are owned by the server and stop on shutdown,
//!   so embedding the library never leaks timers
//! - Sweeping is never required for correctness; readers ignore stale entries

pub mod maintenance;
pub mod shutdown;
pub mod signals;
