//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use request_guard::clock::ManualClock;
use request_guard::config::{GuardConfig, RouteConfig};
use request_guard::resilience::BreakerKind;
use request_guard::GuardServer;

/// What the mock upstream sends back.
pub struct MockResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl MockResponse {
    pub fn json(status: u16, body: String) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json".to_string())],
            body: body.into_bytes(),
        }
    }
}

/// Start a programmable mock upstream on an ephemeral port.
///
/// `f` receives the request line (e.g. `GET /x?y=1 HTTP/1.1`) and returns
/// the status and JSON body to send back.
pub async fn start_programmable_upstream<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let f = Arc::new(f);
    start_mock_upstream(move |head: String| {
        let f = f.clone();
        async move {
            let request_line = head.lines().next().unwrap_or_default().to_string();
            let (status, body) = f(request_line).await;
            MockResponse::json(status, body)
        }
    })
    .await
}

/// Like [`start_programmable_upstream`], but `f` sees the full request head
/// and controls the response headers and raw body.
pub async fn start_mock_upstream<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MockResponse> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let head_len = buf.windows(4).position(|w| w == b"\r\n\r\n").unwrap_or(0) + 4;
                let head = String::from_utf8_lossy(&buf[..head_len]).to_string();

                // Drain the body so closing the socket does not reset the connection.
                let content_length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                let mut received = buf.len() - head_len;
                while received < content_length {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => received += n,
                    }
                }

                let reply = f(head).await;
                let reason = StatusCode::from_u16(reply.status)
                    .ok()
                    .and_then(|s| s.canonical_reason())
                    .unwrap_or("Unknown");

                let mut response = format!("HTTP/1.1 {} {}\r\n", reply.status, reason);
                for (name, value) in &reply.headers {
                    response.push_str(&format!("{}: {}\r\n", name, value));
                }
                response.push_str(&format!(
                    "Content-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.body.len()
                ));
                let mut bytes = response.into_bytes();
                bytes.extend_from_slice(&reply.body);
                let _ = socket.write_all(&bytes).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Value of header `name` in a raw request head, case-insensitively.
pub fn head_header(head: &str, name: &str) -> Option<String> {
    head.lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(n, _)| n.trim().eq_ignore_ascii_case(name))
        .map(|(_, v)| v.trim().to_string())
}

/// Defaults suitable for tests: fast retries, no proxy, no metrics.
pub fn test_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.upstream.system_proxy = false;
    config.observability.metrics_enabled = false;
    config.retries.initial_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config
}

pub fn route(name: &str, prefix: &str, upstream: String) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        host: None,
        path_prefix: prefix.to_string(),
        upstream_url: upstream,
        breaker: BreakerKind::Api,
        dedup: false,
        priority: 0,
        headers: Default::default(),
    }
}

/// A server driven by a manual clock starting at `start_ms`.
pub fn server(config: GuardConfig, start_ms: u64) -> (GuardServer, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(start_ms));
    let server = GuardServer::with_clock(config, clock.clone()).unwrap();
    (server, clock)
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn body_string(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}
