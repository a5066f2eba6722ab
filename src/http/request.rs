//! Request identification and header forwarding.
//!
//! # Responsibilities
//! - Generate a UUID v4 request ID for every incoming request
//! - Select the headers forwarded to upstreams
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Hop-by-hop headers and `Host` are never forwarded, in either direction

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

pub const X_REQUEST_ID: &str = "x-request-id";

/// Request ID generator for `SetRequestIdLayer`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

pub(crate) fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "host"
            | "content-length"
            | "keep-alive"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

/// Headers to send upstream: the client's end-to-end headers plus `extra`.
///
/// Invalid `extra` entries are skipped with a warning.
pub fn forwarded_headers<'a, I>(incoming: &HeaderMap, extra: I) -> HeaderMap
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut headers = HeaderMap::with_capacity(incoming.len());
    for (name, value) in incoming {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    for (name, value) in extra {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "Skipping invalid route header"),
        }
    }
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_request_ids_are_unique_uuids() {
        let mut make = UuidRequestId;
        let req = Request::new(());
        let a = make.make_request_id(&req).unwrap();
        let b = make.make_request_id(&req).unwrap();

        let a = a.header_value().to_str().unwrap().to_string();
        assert!(Uuid::parse_str(&a).is_ok());
        assert_ne!(a, b.header_value().to_str().unwrap());
    }

    #[test]
    fn test_forwarded_headers_strip_hop_by_hop() {
        let mut incoming = HeaderMap::new();
        incoming.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        incoming.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        incoming.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        incoming.insert(X_REQUEST_ID, HeaderValue::from_static("abc"));

        let mut extra = BTreeMap::new();
        extra.insert("apikey".to_string(), "secret".to_string());
        extra.insert("bad header".to_string(), "x".to_string());

        let headers = forwarded_headers(&incoming, &extra);
        assert!(headers.get(header::HOST).is_none());
        assert!(headers.get(header::CONNECTION).is_none());
        assert_eq!(headers[header::ACCEPT], "application/json");
        assert_eq!(headers[X_REQUEST_ID], "abc");
        assert_eq!(headers["apikey"], "secret");
        assert_eq!(headers.len(), 3);
    }
}
