use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::response::json_error;

/// Rejects requests without `Authorization: Bearer <api_key>`.
///
/// An empty key never authenticates.
pub async fn admin_auth_middleware(
    State(api_key): State<Arc<str>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if !api_key.is_empty() && token == &*api_key => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request");
            json_error(StatusCode::UNAUTHORIZED, "Unauthorized")
        }
    }
}
