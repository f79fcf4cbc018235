//! Axum-based stand-in for the smart-home controller.
//!
//! Answers Google fulfillment calls with canned device data, counts every
//! call it receives, and can be told to fail with a status code or be shut
//! down entirely to simulate a tunnel outage.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};

use axum::Router;
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, body::Bytes};
use http::{StatusCode, header};
use serde_json::{Map, Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct ControllerState {
    calls: AtomicUsize,
    /// Non-zero: answer every dialect call with this status.
    fail_status: AtomicU16,
}

/// A running mock controller.
pub struct MockController {
    addr: SocketAddr,
    state: Arc<ControllerState>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl MockController {
    /// Bind to an ephemeral localhost port and start serving.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock controller");
        let addr = listener.local_addr().expect("local addr");

        let state = Arc::new(ControllerState::default());
        let app = Router::new()
            .route("/api/google_assistant", post(google))
            .route("/api/alexa", post(alexa))
            .fallback(echo)
            .with_state(state.clone());

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .expect("mock controller serve");
        });

        Self {
            addr,
            state,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Dialect calls received so far.
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Answer subsequent dialect calls with `status`.
    pub fn fail_with(&self, status: StatusCode) {
        self.state.fail_status.store(status.as_u16(), Ordering::SeqCst);
    }

    /// Stop listening; later connections are refused.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn failure(state: &ControllerState) -> Option<Response> {
    let status = state.fail_status.load(Ordering::SeqCst);
    (status != 0).then(|| {
        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, "controller failure").into_response()
    })
}

async fn google(State(state): State<Arc<ControllerState>>, body: Bytes) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(response) = failure(&state) {
        return response;
    }

    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let request_id = request["requestId"].clone();
    let intent = request["inputs"][0]["intent"].as_str().unwrap_or_default();

    let payload = match intent {
        "action.devices.SYNC" => json!({
            "agentUserId": request["agentUserId"],
            "devices": [
                {"id": "light.kitchen", "type": "action.devices.types.LIGHT"},
                {"id": "switch.fan", "type": "action.devices.types.SWITCH"}
            ]
        }),
        "action.devices.QUERY" => {
            let mut devices = Map::new();
            for device in request["inputs"][0]["payload"]["devices"]
                .as_array()
                .cloned()
                .unwrap_or_default()
            {
                if let Some(id) = device["id"].as_str() {
                    devices.insert(id.to_string(), json!({"on": true, "online": true}));
                }
            }
            json!({ "devices": devices })
        }
        "action.devices.EXECUTE" => json!({
            "commands": [{"ids": ["light.kitchen"], "status": "SUCCESS"}]
        }),
        _ => json!({}),
    };

    Json(json!({ "requestId": request_id, "payload": payload })).into_response()
}

async fn alexa(State(state): State<Arc<ControllerState>>, body: Bytes) -> Response {
    state.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(response) = failure(&state) {
        return response;
    }

    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let namespace = request["directive"]["header"]["namespace"]
        .as_str()
        .unwrap_or_default();

    if namespace == "Alexa.Discovery" {
        return Json(json!({
            "event": {
                "header": {"namespace": "Alexa.Discovery", "name": "Discover.Response"},
                "payload": {"endpoints": [{"endpointId": "light.kitchen"}]}
            }
        }))
        .into_response();
    }

    Json(json!({"event": {"header": {"name": "Response"}}})).into_response()
}

/// Reflects method, path, content type and body so passthrough can be
/// checked. A missing content type shows as `-`.
async fn echo(request: Request) -> Response {
    let method = request.method().to_string();
    let uri = request.uri().to_string();
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let body = axum::body::to_bytes(request.into_body(), 64 * 1024)
        .await
        .unwrap_or_default();

    (
        StatusCode::ACCEPTED,
        [(header::CONTENT_TYPE, "text/plain")],
        format!("{method} {uri} {content_type} {}", String::from_utf8_lossy(&body)),
    )
        .into_response()
}
