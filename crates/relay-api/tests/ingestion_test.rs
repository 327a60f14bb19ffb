//! Integration tests for the account data ingestion endpoint.
//!
//! Exercises `/api-account/accounts` through the full router: header
//! validation, token authentication, rate limiting, destination fan-out,
//! and background offload, asserting both HTTP responses and the audit
//! trail the pipeline leaves behind.

use std::time::Duration;

use axum::http::StatusCode;
use relay_api::RelayConfig;
use serde_json::json;
use test_harness::{
    net::{mount_destination, mount_destination_expecting, MockServer},
    raw_ingest_request, response_json, response_message, scenarios, RelayTestEnv,
};

/// Verifies the complete happy path: authentication, fan-out to every
/// destination, background offload, and the acceptance response.
#[tokio::test]
async fn ingest_succeeds_and_forwards_to_destinations() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-happy-path");

    let server = MockServer::start().await;
    mount_destination_expecting(&server, "/hooks/crm", 200, 1).await;
    mount_destination_expecting(&server, "/hooks/billing", 200, 1).await;
    env.seed_destination(&format!("{}/hooks/crm", server.uri()));
    env.seed_destination(&format!("{}/hooks/billing", server.uri()));

    let response = env.ingest("tok-happy-path", "evt-100", &scenarios::account_payload()).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response_message(response).await, "Account data received and forwarded");

    assert_eq!(env.storage.count_message("Account authenticated"), 1);
    assert_eq!(env.storage.count_message("Event dispatched"), 1);
    assert_eq!(env.storage.count_message("Webhook delivered"), 2);

    // Background processing settles after the response.
    env.wait_for_audit("Worker processing completed", 1).await;
}

/// Verifies that the dispatched event records the payload's declared type
/// and the caller's correlation id.
#[tokio::test]
async fn dispatched_event_carries_declared_type_and_event_id() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-event-type");

    let response = env
        .ingest("tok-event-type", "evt-webhooks-7", &json!({"type": "account.deleted"}))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let dispatched = env.storage.logs_with_message("Event dispatched");
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].details["event_type"], "account.deleted");
    assert_eq!(dispatched[0].details["event_id"], "evt-webhooks-7");
}

/// Requests without the token or correlation-id header are rejected before
/// any account lookup happens.
#[tokio::test]
async fn ingest_rejects_missing_headers() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-headers");

    let without_token = raw_ingest_request(None, Some("evt-1"), r#"{"a": 1}"#);
    let response = env.send(without_token).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_message(response).await, "Missing required headers");

    let without_event = raw_ingest_request(Some("tok-headers"), None, r#"{"a": 1}"#);
    let response = env.send(without_event).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(env.storage.count_message("Missing required headers"), 2);
    assert_eq!(env.storage.account_lookups(), 0);
}

/// Empty header values count as absent, mirroring proxies that forward
/// headers they strip the value from.
#[tokio::test]
async fn ingest_treats_empty_token_as_missing() {
    let env = RelayTestEnv::new();

    let response = env.send(raw_ingest_request(Some(""), Some("evt-1"), r#"{"a": 1}"#)).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response_message(response).await, "Missing required headers");
}

/// Tokens that match no account are rejected with 401.
#[tokio::test]
async fn ingest_rejects_unknown_token() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-known");

    let response = env.ingest("tok-unknown", "evt-2", &json!({"a": 1})).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response_message(response).await, "Invalid secret token");
    assert_eq!(env.storage.count_message("Invalid secret token"), 1);
}

/// Bodies that are not JSON objects or arrays are rejected before
/// authentication runs.
#[tokio::test]
async fn ingest_rejects_invalid_body_before_authentication() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-body");

    for body in ["", "not json", "42", "\"scalar\""] {
        let request = raw_ingest_request(Some("tok-body"), Some("evt-3"), body);
        let response = env.send(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body:?}");
        assert_eq!(response_message(response).await, "Invalid request body");
    }

    assert_eq!(env.storage.count_message("Invalid request body"), 4);
    assert_eq!(env.storage.account_lookups(), 0);
}

/// Sixth request in the same window is refused; the first five pass.
#[tokio::test]
async fn ingest_enforces_rate_limit_per_token() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-limited");

    for i in 0..5 {
        let response = env.ingest("tok-limited", &format!("evt-{i}"), &json!({"n": i})).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED, "request {i}");
    }

    let response = env.ingest("tok-limited", "evt-5", &json!({"n": 5})).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response_message(response).await, "Rate limit exceeded");
    assert_eq!(env.storage.count_message("Rate limit exceeded"), 1);
}

/// A fresh window grants a fresh budget.
#[tokio::test]
async fn rate_limit_resets_after_window_boundary() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-window");

    for i in 0..5 {
        let response = env.ingest("tok-window", &format!("evt-{i}"), &json!({"n": i})).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
    let response = env.ingest("tok-window", "evt-blocked", &json!({})).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    env.clock.advance(Duration::from_millis(1100));

    let response = env.ingest("tok-window", "evt-fresh", &json!({})).await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

/// Destination load failures surface as 500 after the request was
/// admitted.
#[tokio::test]
async fn ingest_reports_destination_load_failure() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-storage");
    env.storage.fail_destination_loads(true);

    let response = env.ingest("tok-storage", "evt-4", &json!({"a": 1})).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response_message(response).await, "Failed to fetch destinations");
}

/// Account lookup failures report the same storage error as destination
/// loads, tagged with the stage they happened in.
#[tokio::test]
async fn ingest_reports_auth_stage_storage_failure() {
    let env = RelayTestEnv::new();
    env.storage.fail_account_lookups(true);

    let response = env.ingest("tok-any", "evt-5", &json!({"a": 1})).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response_message(response).await, "Failed to fetch destinations");

    let entries = env.storage.logs_with_message("Failed to fetch destinations");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].details["stage"], "authentication");
}

/// Audit writes are best-effort; a store that rejects them must not leak
/// into the caller's response.
#[tokio::test]
async fn audit_write_failures_do_not_change_response() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-audit-down");
    env.storage.fail_log_writes(true);

    let response = env.ingest("tok-audit-down", "evt-lost", &json!({"a": 1})).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response_message(response).await, "Account data received and forwarded");
    assert!(env.storage.logs().is_empty());
}

/// When the configured processor is not registered the caller gets a 500
/// and the failure is audited.
#[tokio::test]
async fn ingest_fails_when_processor_missing() {
    let mut config = RelayConfig::default();
    config.offload_processor = "not-registered".to_string();
    let env = RelayTestEnv::builder().config(config).build();
    env.seed_account("tok-no-processor");

    let response = env.ingest("tok-no-processor", "evt-6", &json!({"a": 1})).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response_message(response).await, "Failed to process account data");
    assert_eq!(env.storage.count_message("Event processor not found"), 1);
}

/// A destination rejecting the webhook does not change the caller's
/// response; the failure lives in the audit trail only.
#[tokio::test]
async fn delivery_failure_does_not_change_response() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-failures");

    let server = MockServer::start().await;
    mount_destination(&server, "/hooks/ok", 200).await;
    mount_destination(&server, "/hooks/broken", 500).await;
    env.seed_destination(&format!("{}/hooks/ok", server.uri()));
    env.seed_destination(&format!("{}/hooks/broken", server.uri()));

    let response = env.ingest("tok-failures", "evt-7", &json!({"a": 1})).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(env.storage.count_message("Webhook delivered"), 1);
    assert_eq!(env.storage.count_message("Webhook delivery failed"), 1);
}

/// A destination with unusable stored headers is skipped without
/// affecting its siblings.
#[tokio::test]
async fn malformed_destination_headers_skip_only_that_destination() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-malformed");

    let server = MockServer::start().await;
    mount_destination_expecting(&server, "/hooks/good", 200, 1).await;
    env.seed_destination(&format!("{}/hooks/good", server.uri()));
    env.seed_built_destination(scenarios::malformed_destination(format!(
        "{}/hooks/never-called",
        server.uri()
    )));

    let response = env.ingest("tok-malformed", "evt-8", &json!({"a": 1})).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(env.storage.count_message("Malformed destination headers"), 1);
    assert_eq!(env.storage.count_message("Webhook delivered"), 1);
    assert_eq!(env.storage.count_message("Webhook delivery failed"), 0);
}

/// Requests with no registered destinations still succeed; there is
/// simply nothing to fan out to.
#[tokio::test]
async fn ingest_succeeds_with_no_destinations() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-empty");

    let response = env.ingest("tok-empty", "evt-9", &json!({"a": 1})).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(env.storage.count_message("Webhook delivered"), 0);
    env.wait_for_audit("Worker processing completed", 1).await;
}

/// The response carries only the acceptance message, never delivery
/// details.
#[tokio::test]
async fn response_body_shape_is_stable() {
    let env = RelayTestEnv::new();
    env.seed_account("tok-shape");

    let response = env.ingest("tok-shape", "evt-10", &json!({"a": 1})).await;
    let body = response_json(response).await;

    insta::assert_json_snapshot!(body, @r#"
    {
      "message": "Account data received and forwarded"
    }
    "#);
}
