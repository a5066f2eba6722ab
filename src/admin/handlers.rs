use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::http::response::json_error;
use crate::http::server::AppState;
use crate::resilience::BreakerSnapshot;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub routes: usize,
    pub breakers: Vec<BreakerSnapshot>,
    pub rate_limit_entries: usize,
    pub dedup_entries: usize,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        routes: state.routes.len(),
        breakers: state.breakers.snapshots(),
        rate_limit_entries: state.rate_limiter.len(),
        dedup_entries: state.cache.len(),
    })
}

pub async fn reset_breaker(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.breakers.by_name(&name) {
        Some(breaker) => {
            breaker.reset();
            Json(breaker.snapshot()).into_response()
        }
        None => json_error(StatusCode::NOT_FOUND, "Unknown breaker"),
    }
}

pub async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.cache.len();
    state.cache.clear_all();
    tracing::info!(cleared, "Dedup cache cleared");
    Json(json!({ "cleared": cleared }))
}

pub async fn clear_cache_key(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    if state.cache.clear(&key) {
        tracing::info!(key = %key, "Dedup cache entry cleared");
        Json(json!({ "cleared": 1 })).into_response()
    } else {
        json_error(StatusCode::NOT_FOUND, "Unknown cache key")
    }
}
