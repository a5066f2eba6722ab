//! Response helpers.
//!
//! # Responsibilities
//! - Render gateway-generated errors as `{"error": "..."}` JSON
//! - Map upstream failures to client-facing status codes

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

/// `{"error": message}` with `status`.
pub fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

/// Like [`json_error`], merging the fields of `extra` (an object) into the body.
pub fn json_error_with(status: StatusCode, message: &str, extra: Value) -> Response {
    let mut body = json!({ "error": message });
    if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
        body.extend(extra);
    }
    (status, Json(body)).into_response()
}
