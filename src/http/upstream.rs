//! Outbound calls to upstream services.
//!
//! # Responsibilities
//! - Send one request to an upstream with a per-attempt timeout
//! - Classify failures as retryable (transport, timeout, 5xx) or final
//! - Carry the upstream response in a form the dedup cache can store

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::UpstreamConfig;
use crate::http::request::is_hop_by_hop;

/// A buffered upstream response.
///
/// Headers are the upstream's end-to-end headers in arrival order; the body
/// is kept as raw bytes. Both survive a trip through the dedup cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    /// Collect the end-to-end headers of an upstream response.
    ///
    /// Values that are not visible ASCII cannot be cached as text and are dropped.
    pub fn end_to_end_headers(headers: &HeaderMap) -> Vec<(String, String)> {
        headers
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name))
            .filter_map(|(name, value)| match value.to_str() {
                Ok(value) => Some((name.as_str().to_string(), value.to_string())),
                Err(_) => {
                    tracing::debug!(header = %name, "Dropping non-ASCII upstream header");
                    None
                }
            })
            .collect()
    }

    /// First value of `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response = (status, self.body).into_response();
        // Drop the default octet-stream type; the upstream's own headers decide.
        response.headers_mut().remove(header::CONTENT_TYPE);
        for (name, value) in self.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
                (Ok(name), Ok(value)) => {
                    response.headers_mut().append(name, value);
                }
                _ => tracing::debug!(header = %name, "Skipping invalid cached header"),
            }
        }
        response
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream returned {}", .0.status)]
    Status(UpstreamResponse),
    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Transport failures, timeouts, and 5xx responses may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout | UpstreamError::Transport(_) => true,
            UpstreamError::Status(response) => response.status >= 500,
            UpstreamError::InvalidRequest(_) => false,
        }
    }
}

/// A request ready to be sent, possibly more than once.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Shared HTTP client for all routes.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs.max(1)));
        if !config.system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder
            .build()
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
        Ok(Self { client })
    }

    /// Send `request` once. Statuses >= 500 are returned as [`UpstreamError::Status`].
    pub async fn send(&self, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(classify)?;

        let status = response.status().as_u16();
        let headers = UpstreamResponse::end_to_end_headers(response.headers());
        let bytes = response.bytes().await.map_err(classify)?;

        let response = UpstreamResponse {
            status,
            headers,
            body: bytes.to_vec(),
        };

        if status >= 500 {
            tracing::warn!(url = %request.url, status, "Upstream server error");
            return Err(UpstreamError::Status(response));
        }
        Ok(response)
    }
}

fn classify(error: reqwest::Error) -> UpstreamError {
    if error.is_timeout() {
        UpstreamError::Timeout
    } else if error.is_builder() {
        UpstreamError::InvalidRequest(error.to_string())
    } else {
        UpstreamError::Transport(error.to_string())
    }
}
