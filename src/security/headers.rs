//! Client identification from request headers.
//!
//! Proxies in front of the gateway report the original client in
//! `X-Forwarded-For` (first hop wins) or `X-Real-IP`.

use std::net::IpAddr;

use axum::http::HeaderMap;

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Identifier used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Client IP from forwarding headers, or `"unknown"`.
pub fn client_ip(headers: &HeaderMap) -> String {
    header_str(headers, X_FORWARDED_FOR)
        .and_then(|forwarded| forwarded.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(headers, X_REAL_IP).map(str::trim).filter(|ip| !ip.is_empty()))
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Rate-limit key: forwarding headers first, then the TCP peer address.
pub fn resolve_client_key(headers: &HeaderMap, peer: Option<IpAddr>) -> String {
    let ip = client_ip(headers);
    match peer {
        Some(addr) if ip == UNKNOWN_CLIENT => addr.to_string(),
        _ => ip,
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
