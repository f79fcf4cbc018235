//! Operator endpoints: statistics, cache control, remote access, liveness.
//!
//! Read-only routes are open. Mutating routes require the configured Basic
//! credentials (see [`AdminGate::authenticate`]), and fail with 401 before
//! looking at the request body.
//!
//! | Method | Path |
//! |---|---|
//! | GET | `/edge/stats` |
//! | POST | `/edge/cache/clear` |
//! | GET, POST | `/edge/remote-access` |
//! | GET | `/edge/remote-access/check` |
//! | GET | `/health` |
//!
//! [`AdminGate::authenticate`]: hearthgate_core::admin::AdminGate::authenticate

use axum::body::Bytes;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use http::{HeaderMap, StatusCode, header};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use hearthgate_core::EdgeError;

use crate::error::ApiError;
use crate::server::{AppState, header_string};

const SERVICE_NAME: &str = "hearthgate";

/// Capabilities present in every deployment.
const BASE_FEATURES: &[&str] = &[
    "enumeration_cache",
    "state_cache",
    "offline_fallback",
    "rate_limit",
    "remote_access_toggle",
];

/// Admin routes, merged into the main app by [`crate::server::build_app`].
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/edge/stats", get(stats_handler))
        .route("/edge/cache/clear", post(clear_cache_handler))
        .route(
            "/edge/remote-access",
            get(get_remote_access_handler).post(set_remote_access_handler),
        )
        .route("/edge/remote-access/check", get(check_remote_access_handler))
        .route("/health", get(health_handler))
}

async fn stats_handler(State(state): State<AppState>) -> Json<Value> {
    let cache = state.cache.stats();

    Json(json!({
        "enumeration_cache": {
            "count": cache.enumeration_entries,
            "live": cache.enumeration_live,
            "ttl_seconds": state.config.enumeration_ttl.as_secs(),
            "avg_age_seconds": cache.enumeration_avg_age_secs,
        },
        "state_cache": {
            "count": cache.state_entries,
            "ttl_seconds": state.config.state_ttl.as_secs(),
            "avg_age_seconds": cache.state_avg_age_secs,
        },
        "rate_limiting": {
            "active_clients": state.limiter.tracked_clients(),
            "limit": state.limiter.max_requests(),
            "window_seconds": state.limiter.window().as_secs(),
        },
        "remote_access": state.admin.get_remote_access(),
    }))
}

async fn clear_cache_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;

    let cleared = state.admin.clear_caches();
    Ok(Json(json!({
        "status": "cleared",
        "cleared": cleared,
    })))
}

async fn get_remote_access_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.admin.get_remote_access()))
}

#[derive(Debug, Deserialize)]
struct RemoteAccessUpdate {
    enabled: bool,
}

async fn set_remote_access_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    authorize(&state, &headers)?;

    let update: RemoteAccessUpdate =
        serde_json::from_slice(&body).map_err(|e| EdgeError::MalformedRequest {
            details: format!("expected {{\"enabled\": bool}}: {e}"),
        })?;

    Ok(Json(json!(state.admin.set_remote_access(update.enabled))))
}

/// Ingress check: 200 admits the remote request, 403 refuses it.
async fn check_remote_access_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let upgrade = is_upgrade_request(&headers);
    let allowed = state.admin.check_remote_access(upgrade);
    let status = if allowed {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };

    (status, Json(json!({ "allowed": allowed, "upgrade": upgrade }))).into_response()
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "features": active_features(&state),
    }))
}

/// Capability flags switched on in this process.
fn active_features(state: &AppState) -> Vec<&'static str> {
    let mut features = BASE_FEATURES.to_vec();
    if state.audit_enabled {
        features.push("audit_log");
    }
    if state.webhook_enabled {
        features.push("event_webhook");
    }
    if state.config.admin_credentials.is_some() {
        features.push("admin_auth");
    }
    features
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let authorization = header_string(headers, header::AUTHORIZATION);
    if state.admin.authenticate(authorization.as_deref()) {
        Ok(())
    } else {
        debug!("Admin request rejected");
        Err(ApiError(EdgeError::Unauthorized))
    }
}

/// WebSocket-style upgrade: an `Upgrade` header, or `Connection: upgrade`.
fn is_upgrade_request(headers: &HeaderMap) -> bool {
    if headers.contains_key(header::UPGRADE) {
        return true;
    }
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}
