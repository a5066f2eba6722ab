//! Admin API.
//!
//! # Endpoints
//! - `GET /admin/status`: version, breaker snapshots, store sizes
//! - `POST /admin/breakers/{name}/reset`: force a breaker closed
//! - `DELETE /admin/cache`: drop every dedup entry
//! - `DELETE /admin/cache/{key}`: drop one dedup entry
//!
//! Every endpoint requires the configured bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn admin_router(state: AppState) -> Router {
    let api_key: Arc<str> = Arc::from(state.config.admin.api_key.as_str());

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers/{name}/reset", post(reset_breaker))
        .route("/admin/cache", delete(clear_cache))
        .route("/admin/cache/{key}", delete(clear_cache_key))
        .route_layer(middleware::from_fn_with_state(api_key, admin_auth_middleware))
        .with_state(state)
}
