//! Health endpoint tests.
//!
//! Tests `/health`, `/health/ready`, and `/health/live` including the
//! storage connectivity check and degraded-mode responses.

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use test_harness::{response_json, RelayTestEnv};

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("valid health request")
}

/// The health endpoint reports healthy while storage answers pings.
#[tokio::test]
async fn health_check_returns_success_when_healthy() {
    let env = RelayTestEnv::new();

    let response = env.send(get("/health")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"]["status"], "up");
    assert!(body["version"].is_string());
    assert!(body["timestamp"].is_string());
}

/// Storage outages flip the health endpoint to 503 with the failing
/// component named.
#[tokio::test]
async fn health_check_reports_storage_outage() {
    let env = RelayTestEnv::new();
    env.storage.fail_pings(true);

    let response = env.send(get("/health")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = response_json(response).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["database"]["status"], "down");
    assert!(body["checks"]["database"]["message"]
        .as_str()
        .is_some_and(|m| m.contains("Database connection failed")));
}

/// Readiness mirrors the full health check.
#[tokio::test]
async fn readiness_follows_storage_state() {
    let env = RelayTestEnv::new();

    let response = env.send(get("/health/ready")).await;
    assert_eq!(response.status(), StatusCode::OK);

    env.storage.fail_pings(true);
    let response = env.send(get("/health/ready")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

/// Liveness stays up even when storage is down; it only proves the
/// process is serving requests.
#[tokio::test]
async fn liveness_ignores_storage_state() {
    let env = RelayTestEnv::new();
    env.storage.fail_pings(true);

    let response = env.send(get("/health/live")).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_json(response).await;
    assert_eq!(body["status"], "alive");
    assert_eq!(body["service"], "event-relay");
}

/// The health surface only answers GET.
#[tokio::test]
async fn health_check_rejects_post() {
    let env = RelayTestEnv::new();

    let request = Request::builder()
        .method(Method::POST)
        .uri("/health")
        .body(Body::empty())
        .expect("valid request");

    let response = env.send(request).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}
