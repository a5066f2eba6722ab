//! Admin API tests.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use request_guard::GuardConfig;

mod common;
use common::{body_json, get, server, test_config};

const KEY: &str = "test-admin-key";

fn admin_config() -> GuardConfig {
    let mut config = test_config();
    config.admin.enabled = true;
    config.admin.api_key = KEY.to_string();
    config
}

fn admin(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {}", KEY))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_requires_bearer_token() {
    let (server, _clock) = server(admin_config(), 0);
    let app = server.router();

    let missing = app.clone().oneshot(get("/admin/status")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = Request::builder()
        .uri("/admin/status")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.clone().oneshot(wrong).await.unwrap().status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_status_reports_breakers_and_stores() {
    let (server, _clock) = server(admin_config(), 0);
    server.state().rate_limiter.check_default("9.9.9.9");

    let response = server.router().oneshot(admin(Method::GET, "/admin/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["rate_limit_entries"], 1);
    assert_eq!(body["dedup_entries"], 0);

    let breakers = body["breakers"].as_array().unwrap();
    assert_eq!(breakers.len(), 2);
    assert_eq!(breakers[0]["name"], "database");
    assert_eq!(breakers[0]["state"], "closed");
    assert_eq!(breakers[0]["threshold"], 5);
}

#[tokio::test]
async fn test_reset_breaker() {
    let (server, _clock) = server(admin_config(), 0);
    let api = server.state().breakers.api.clone();
    for _ in 0..10 {
        let _ = api
            .execute(|| async { Err::<(), _>("down") })
            .await;
    }
    assert_eq!(api.state(), request_guard::resilience::CircuitState::Open);

    let app = server.router();
    let response = app
        .clone()
        .oneshot(admin(Method::POST, "/admin/breakers/api/reset"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["state"], "closed");
    assert_eq!(api.failures(), 0);

    let unknown = app
        .oneshot(admin(Method::POST, "/admin/breakers/cache/reset"))
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_clear_cache() {
    let (server, _clock) = server(admin_config(), 0);
    let cache = server.state().cache.clone();
    cache.set("a", json!(1));
    cache.set("b", json!(2));
    let app = server.router();

    let one = app.clone().oneshot(admin(Method::DELETE, "/admin/cache/a")).await.unwrap();
    assert_eq!(one.status(), StatusCode::OK);
    assert_eq!(cache.len(), 1);

    let missing = app.clone().oneshot(admin(Method::DELETE, "/admin/cache/a")).await.unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let all = app.oneshot(admin(Method::DELETE, "/admin/cache")).await.unwrap();
    assert_eq!(body_json(all).await, json!({ "cleared": 1 }));
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_disabled_admin_is_not_routed() {
    let (server, _clock) = server(test_config(), 0);
    let response = server
        .router()
        .oneshot(admin(Method::GET, "/admin/status"))
        .await
        .unwrap();
    // Falls through to the gateway, which has no routes.
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
