//! End-to-end tests: the full axum app against a mock controller.

mod helpers;

use axum::body::Body;
use http::{Request, StatusCode, header};
use serde_json::json;

use helpers::*;

fn sync_request() -> serde_json::Value {
    json!({
        "requestId": "req-sync",
        "agentUserId": "household-1",
        "inputs": [{"intent": "action.devices.SYNC"}]
    })
}

fn query_request(ids: &[&str]) -> serde_json::Value {
    let devices: Vec<_> = ids.iter().map(|id| json!({"id": id})).collect();
    json!({
        "requestId": "req-query",
        "agentUserId": "household-1",
        "inputs": [{"intent": "action.devices.QUERY", "payload": {"devices": devices}}]
    })
}

fn execute_request() -> serde_json::Value {
    json!({
        "requestId": "req-exec",
        "agentUserId": "household-1",
        "inputs": [{
            "intent": "action.devices.EXECUTE",
            "payload": {"commands": [{
                "devices": [{"id": "light.kitchen"}],
                "execution": [{"command": "action.devices.commands.OnOff", "params": {"on": false}}]
            }]}
        }]
    })
}

// ============================================================================
// Dialect endpoints
// ============================================================================

#[tokio::test]
async fn test_sync_served_from_cache_within_ttl() {
    let controller = MockController::start().await;
    let (app, _) = app_for(test_config(&controller.url()));

    let first = send(&app, post_json("/api/google_assistant", &sync_request())).await;
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_bytes(first).await;

    let second = send(&app, post_json("/api/google_assistant", &sync_request())).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second = body_bytes(second).await;

    assert_eq!(controller.calls(), 1);
    assert_eq!(first, second);

    let parsed: serde_json::Value = serde_json::from_slice(&first).unwrap();
    assert_eq!(parsed["payload"]["devices"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_query_falls_back_to_cached_state_when_controller_down() {
    let mut controller = MockController::start().await;
    let (app, _) = app_for(test_config(&controller.url()));

    let (status, live) = json_body(
        send(&app, post_json("/api/google_assistant", &query_request(&["light.kitchen"]))).await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(live["payload"]["devices"]["light.kitchen"]["on"], true);
    assert!(live["payload"]["devices"]["light.kitchen"].get("cached").is_none());

    controller.stop().await;

    let (status, fallback) = json_body(
        send(
            &app,
            post_json("/api/google_assistant", &query_request(&["light.kitchen", "switch.fan"])),
        )
        .await,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fallback["requestId"], "req-query");
    let kitchen = &fallback["payload"]["devices"]["light.kitchen"];
    assert_eq!(kitchen["on"], true);
    assert_eq!(kitchen["cached"], true);
    assert!(kitchen["cachedAt"].is_string());
    assert!(fallback["payload"]["devices"].get("switch.fan").is_none());

    let (status, error) = json_body(
        send(&app, post_json("/api/google_assistant", &query_request(&["switch.fan"]))).await,
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error["error"], "upstream_unavailable");
}

#[tokio::test]
async fn test_controller_error_status_is_not_masked_by_cache() {
    let controller = MockController::start().await;
    let (app, _) = app_for(test_config(&controller.url()));

    let response =
        send(&app, post_json("/api/google_assistant", &query_request(&["light.kitchen"]))).await;
    assert_eq!(response.status(), StatusCode::OK);

    controller.fail_with(StatusCode::INTERNAL_SERVER_ERROR);

    let (status, error) = json_body(
        send(&app, post_json("/api/google_assistant", &query_request(&["light.kitchen"]))).await,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(error["error"], "upstream_error");
    assert_eq!(error["upstream_status"], 500);
}

#[tokio::test]
async fn test_execute_always_reaches_controller() {
    let controller = MockController::start().await;
    let (app, state) = app_for(test_config(&controller.url()));

    for _ in 0..2 {
        let response = send(&app, post_json("/api/google_assistant", &execute_request())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(controller.calls(), 2);
    let stats = state.cache.stats();
    assert_eq!(stats.enumeration_entries, 0);
    assert_eq!(stats.state_entries, 0);
}

#[tokio::test]
async fn test_alexa_discovery_cached() {
    let controller = MockController::start().await;
    let (app, _) = app_for(test_config(&controller.url()));

    let discover = json!({
        "directive": {
            "header": {"namespace": "Alexa.Discovery", "name": "Discover", "messageId": "m-1"},
            "payload": {"scope": {"type": "BearerToken", "token": "linked-token"}}
        }
    });

    for _ in 0..3 {
        let response = send(&app, post_json("/api/alexa", &discover)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(controller.calls(), 1);
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let controller = MockController::start().await;
    let (app, _) = app_for(test_config(&controller.url()));

    let request = Request::builder()
        .method("POST")
        .uri("/api/google_assistant")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, error) = json_body(send(&app, request).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "malformed_request");
    assert_eq!(controller.calls(), 0);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let controller = MockController::start().await;
    let mut config = test_config(&controller.url());
    config.max_body_bytes = 64;
    let (app, _) = app_for(config);

    let padding = "x".repeat(256);
    let body = json!({"inputs": [{"intent": "action.devices.SYNC"}], "padding": padding});

    let (status, error) = json_body(send(&app, post_json("/api/google_assistant", &body)).await).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["error"], "malformed_request");
    assert_eq!(controller.calls(), 0);
}

#[tokio::test]
async fn test_rate_limit_rejects_with_retry_after() {
    let controller = MockController::start().await;
    let mut config = test_config(&controller.url());
    config.rate_limit_requests = 3;
    let (app, _) = app_for(config);

    for _ in 0..3 {
        let response = send(&app, post_json("/api/google_assistant", &sync_request())).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = send(&app, post_json("/api/google_assistant", &sync_request())).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get(header::RETRY_AFTER).unwrap(),
        "60"
    );
    let (_, error) = json_body(response).await;
    assert_eq!(error["error"], "rate_limit_exceeded");
    assert_eq!(error["retry_after"], 60);

    // Another client is unaffected.
    let mut other = post_json("/api/google_assistant", &sync_request());
    other
        .headers_mut()
        .insert("x-forwarded-for", "198.51.100.99".parse().unwrap());
    assert_eq!(send(&app, other).await.status(), StatusCode::OK);
}

// ============================================================================
// Passthrough
// ============================================================================

#[tokio::test]
async fn test_unmatched_paths_relayed_verbatim() {
    let controller = MockController::start().await;
    let (app, _) = app_for(test_config(&controller.url()));

    let request = Request::builder()
        .method("PUT")
        .uri("/api/states/light.kitchen?source=edge")
        .body(Body::from("payload"))
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/plain"
    );
    let body = body_bytes(response).await;
    assert_eq!(&body[..], b"PUT /api/states/light.kitchen?source=edge - payload");
}

#[tokio::test]
async fn test_passthrough_keeps_caller_content_type() {
    let controller = MockController::start().await;
    let (app, _) = app_for(test_config(&controller.url()));

    let request = Request::builder()
        .method("POST")
        .uri("/auth/token")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("grant_type=refresh_token&x=1"))
        .unwrap();
    let body = body_bytes(send(&app, request).await).await;

    assert_eq!(
        &body[..],
        b"POST /auth/token application/x-www-form-urlencoded grant_type=refresh_token&x=1"
    );
}

#[tokio::test]
async fn test_passthrough_reports_proxy_error_when_controller_down() {
    let mut controller = MockController::start().await;
    let (app, _) = app_for(test_config(&controller.url()));
    controller.stop().await;

    let (status, body) = json_body(send(&app, get("/api/config")).await).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body, json!({"error": "proxy_error"}));
}
