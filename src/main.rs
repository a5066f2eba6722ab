//! Request guard gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ───────▶ request id / trace / timeout
//!                  │
//!                  ▼
//!            ┌────────────┐   429 + Retry-After
//!            │ rate limit │──────────────────────▶
//!            └─────┬──────┘
//!                  ▼
//!            ┌────────────┐   404
//!            │  routing   │──────────────────────▶
//!            └─────┬──────┘
//!                  ▼
//!            ┌────────────┐   cached result
//!            │   dedup    │──────────────────────▶  (GET, opted-in routes)
//!            └─────┬──────┘
//!                  ▼
//!            ┌────────────┐
//!            │   retry    │  backoff between attempts (GET/HEAD)
//!            └─────┬──────┘
//!                  ▼
//!            ┌────────────┐   503 while open
//!            │  breaker   │──────────────────────▶
//!            └─────┬──────┘
//!                  ▼
//!              upstream (database / api)
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use request_guard::config::{load_config, GuardConfig};
use request_guard::lifecycle::signals::wait_for_shutdown_signal;
use request_guard::observability::{logging, metrics};
use request_guard::{GuardServer, Shutdown};

#[derive(Parser)]
#[command(name = "request-guard")]
#[command(about = "Rate limiting, deduplication, and circuit breaking gateway", long_about = None)]
struct Args {
    /// Path to the TOML config file; defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-guard starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal.trigger();
    });

    let server = GuardServer::new(config)?;
    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
