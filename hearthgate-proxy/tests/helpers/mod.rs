//! Test helpers for hearthgate integration tests.
//!
//! - Mock smart-home controller
//! - App construction and request/response utilities

#![allow(unused_imports)] // Re-exports may not be used by all test files
#![allow(dead_code)]

pub mod mock_controller;

pub use mock_controller::*;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use base64::Engine;
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use hearthgate_core::admin::AdminCredentials;
use hearthgate_core::audit::AuditLogger;
use hearthgate_core::config::EdgeConfig;
use hearthgate_core::events::EventNotifier;
use hearthgate_core::upstream::{UpstreamClient, UpstreamConfig};
use hearthgate_proxy::server::{AppState, build_app};

pub const ADMIN_USER: &str = "operator";
pub const ADMIN_PASSWORD: &str = "hunter2";

/// Configuration pointed at `upstream_url` with admin credentials set.
pub fn test_config(upstream_url: &str) -> EdgeConfig {
    EdgeConfig {
        upstream_url: upstream_url.to_string(),
        admin_credentials: Some(AdminCredentials::new(ADMIN_USER, ADMIN_PASSWORD)),
        log_requests: false,
        ..EdgeConfig::default()
    }
}

/// Build the app for `config` with a real upstream client.
///
/// Pooling is off so a stopped controller refuses the next call outright.
pub fn app_for(config: EdgeConfig) -> (Router, AppState) {
    let upstream = UpstreamClient::new(UpstreamConfig {
        timeout: Duration::from_secs(2),
        connect_timeout: Duration::from_millis(500),
        pool_max_idle_per_host: 0,
        ..UpstreamConfig::with_base_url(config.upstream_url.clone())
    })
    .expect("upstream client");

    let state = AppState::new(
        config,
        Arc::new(upstream),
        EventNotifier::disabled(),
        Arc::new(AuditLogger::disabled()),
    );
    (build_app(state.clone()), state)
}

/// Like [`app_for`], with a caller-chosen notifier and audit sink.
pub fn app_with(
    config: EdgeConfig,
    notifier: EventNotifier,
    audit: AuditLogger,
) -> (Router, AppState) {
    let upstream = UpstreamClient::new(UpstreamConfig::with_base_url(
        config.upstream_url.clone(),
    ))
    .expect("upstream client");

    let state = AppState::new(config, Arc::new(upstream), notifier, Arc::new(audit));
    (build_app(state.clone()), state)
}

pub fn basic_auth(user: &str, password: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
    format!("Basic {encoded}")
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.10")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Send one request through a clone of `app`.
pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn json_body(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body_bytes(response).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}
