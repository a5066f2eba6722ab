//! HTTP server setup and request forwarding.
//!
//! # Responsibilities
//! - Create the Axum router with health, admin, and gateway handlers
//! - Wire up middleware (request ID, tracing, timeout, rate limit)
//! - Forward matched requests upstream through retry, breaker, and dedup
//! - Run maintenance sweepers for the lifetime of the server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin;
use crate::cache::RequestCache;
use crate::clock::{system_clock, SharedClock};
use crate::config::GuardConfig;
use crate::http::request::{forwarded_headers, UuidRequestId, X_REQUEST_ID};
use crate::http::response::json_error;
use crate::http::upstream::{UpstreamClient, UpstreamError, UpstreamRequest, UpstreamResponse};
use crate::lifecycle::maintenance::spawn_sweeper;
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::resilience::{BreakerError, Breakers, RetryPolicy};
use crate::routing::{Route, RouteError, RouteTable};
use crate::security::rate_limit::{rate_limit_middleware, RateLimitState, RateLimiter};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("failed to build upstream client: {0}")]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub routes: Arc<RouteTable>,
    pub upstream: UpstreamClient,
    pub cache: RequestCache,
    pub rate_limiter: Arc<RateLimiter>,
    pub breakers: Arc<Breakers>,
    pub retry_policy: RetryPolicy,
    pub config: Arc<GuardConfig>,
}

/// HTTP server for the gateway.
pub struct GuardServer {
    state: AppState,
}

impl GuardServer {
    pub fn new(config: GuardConfig) -> Result<Self, ServerError> {
        Self::with_clock(config, system_clock())
    }

    /// Build the server with an explicit time source for the rate limiter,
    /// dedup cache, and breakers.
    pub fn with_clock(config: GuardConfig, clock: SharedClock) -> Result<Self, ServerError> {
        let routes = Arc::new(RouteTable::from_config(&config.routes)?);
        let upstream = UpstreamClient::new(&config.upstream)?;
        let cache = RequestCache::from_config(&config.dedup, clock.clone());
        let rate_limiter = Arc::new(RateLimiter::new(
            clock.clone(),
            Duration::from_secs(config.rate_limit.sweep_interval_secs),
        ));
        let breakers = Arc::new(Breakers::from_config(&config.breakers, clock));
        let retry_policy = RetryPolicy::from(&config.retries);

        tracing::info!(
            routes = routes.len(),
            rate_limit = config.rate_limit.enabled,
            dedup = config.dedup.enabled,
            admin = config.admin.enabled,
            "Gateway configured"
        );

        Ok(Self {
            state: AppState {
                routes,
                upstream,
                cache,
                rate_limiter,
                breakers,
                retry_policy,
                config: Arc::new(config),
            },
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let config = state.config.clone();

        let mut gateway = Router::new().fallback(gateway_handler);
        if config.rate_limit.enabled {
            let limit_state = RateLimitState::new(state.rate_limiter.clone(), &config.rate_limit);
            gateway = gateway.layer(middleware::from_fn_with_state(limit_state, rate_limit_middleware));
        }
        let gateway = gateway.with_state(state.clone());

        let mut app = Router::new().route("/health", get(health_handler));
        if config.admin.enabled {
            app = app.merge(admin::admin_router(state));
        }

        app.fallback_service(gateway)
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                let request_id = request
                    .headers()
                    .get(X_REQUEST_ID)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("unknown");
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// Serve on `listener` until `shutdown` fires, then drain.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let config = &self.state.config;
        let mut sweepers = Vec::new();
        if config.rate_limit.enabled {
            sweepers.push(spawn_sweeper(self.state.rate_limiter.clone(), shutdown.subscribe()));
        }
        if config.dedup.enabled {
            sweepers.push(spawn_sweeper(self.state.cache.clone(), shutdown.subscribe()));
        }

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let mut stop = shutdown.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        shutdown.trigger();
        for sweeper in sweepers {
            let _ = sweeper.await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Dedup arguments: the upstream URL plus every configured vary header the
/// client sent, so requests that could get different answers never share one.
#[derive(Serialize)]
struct DedupArgs {
    url: String,
    vary: Vec<(String, String)>,
}

impl DedupArgs {
    fn new(url: &url::Url, headers: &HeaderMap, vary_headers: &[String]) -> Self {
        let vary = vary_headers
            .iter()
            .filter_map(|name| {
                let values: Vec<String> = headers
                    .get_all(name.as_str())
                    .iter()
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .collect();
                (!values.is_empty()).then(|| (name.to_ascii_lowercase(), values.join(", ")))
            })
            .collect();
        Self {
            url: url.to_string(),
            vary,
        }
    }
}

/// Looks up the route and forwards the request upstream.
async fn gateway_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();

    let Some(route) = state.routes.match_request(&request) else {
        tracing::debug!(path = %request.uri().path(), "No route matched");
        metrics::record_request("none", 404, start);
        return json_error(StatusCode::NOT_FOUND, "No matching route");
    };

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, state.config.upstream.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(route = %route.name, error = %e, "Request body rejected");
            metrics::record_request(&route.name, 413, start);
            return json_error(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
        }
    };

    let upstream_request = UpstreamRequest {
        method: parts.method.clone(),
        url: route.upstream_url(parts.uri.path(), parts.uri.query()),
        headers: forwarded_headers(&parts.headers, &route.headers),
        body,
    };

    tracing::debug!(route = %route.name, method = %parts.method, url = %upstream_request.url, "Forwarding request");

    let result = if state.config.dedup.enabled && route.dedup && parts.method == Method::GET {
        let (state_ref, request_ref) = (&state, &upstream_request);
        let args = DedupArgs::new(&upstream_request.url, &parts.headers, &state.config.dedup.vary_headers);
        state
            .cache
            .with_deduplication(route.name.as_str(), move |_: DedupArgs| {
                forward(state_ref, route, request_ref)
            })
            .call(args)
            .await
    } else {
        forward(&state, route, &upstream_request).await
    };

    let response = match result {
        Ok(upstream) => upstream.into_response(),
        Err(BreakerError::Open) => json_error(StatusCode::SERVICE_UNAVAILABLE, "circuit breaker is open"),
        Err(BreakerError::Inner(UpstreamError::Status(upstream))) => upstream.into_response(),
        Err(BreakerError::Inner(e)) => {
            tracing::error!(route = %route.name, error = %e, "Upstream request failed");
            json_error(StatusCode::BAD_GATEWAY, "Upstream request failed")
        }
    };

    metrics::record_request(&route.name, response.status().as_u16(), start);
    response
}

/// One logical upstream call: retried for GET/HEAD, each attempt through the route's breaker.
async fn forward(
    state: &AppState,
    route: &Route,
    request: &UpstreamRequest,
) -> Result<UpstreamResponse, BreakerError<UpstreamError>> {
    let breaker = state.breakers.get(route.breaker);
    let upstream = &state.upstream;

    let attempt = move || async move {
        let start = Instant::now();
        let result = breaker.execute(move || upstream.send(request)).await;
        metrics::record_upstream_duration(&route.name, start);
        result
    };

    if request.method == Method::GET || request.method == Method::HEAD {
        state
            .retry_policy
            .retry_if(attempt, |error: &BreakerError<UpstreamError>| match error {
                BreakerError::Open => false,
                BreakerError::Inner(e) => e.is_retryable(),
            })
            .await
    } else {
        attempt().await
    }
}
