//! HTTP surface of the edge proxy.
//!
//! A single axum [`Router`] carries the two dialect endpoints, the admin
//! routes from [`crate::admin`], and a catch-all that relays everything else
//! to the controller. Policy lives in [`EdgeRouter`]; handlers here only
//! translate between HTTP and core types.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use http::{HeaderMap, HeaderValue, header};
use tracing::debug;

use hearthgate_core::EdgeError;
use hearthgate_core::admin::AdminGate;
use hearthgate_core::audit::AuditLogger;
use hearthgate_core::cache::FreshnessCache;
use hearthgate_core::config::EdgeConfig;
use hearthgate_core::dialect::Dialect;
use hearthgate_core::events::EventNotifier;
use hearthgate_core::rate_limiter::{RateLimiterConfig, SlidingWindowLimiter};
use hearthgate_core::router::{EdgeRouter, InboundRequest, RouterConfig};
use hearthgate_core::settings::RemoteAccessCell;
use hearthgate_core::upstream::{RelayHeaders, UpstreamCaller};

use crate::admin;
use crate::error::ApiError;
use crate::logging_layer::logging_layer;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<EdgeRouter>,
    pub admin: Arc<AdminGate>,
    pub cache: Arc<FreshnessCache>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub config: Arc<EdgeConfig>,
    /// Whether events reach a webhook.
    pub webhook_enabled: bool,
    /// Whether audit records are written.
    pub audit_enabled: bool,
}

impl AppState {
    /// Wire every component from a validated configuration.
    pub fn new(
        config: EdgeConfig,
        upstream: Arc<dyn UpstreamCaller>,
        notifier: EventNotifier,
        audit: Arc<AuditLogger>,
    ) -> Self {
        let cache = Arc::new(FreshnessCache::new());
        let limiter = Arc::new(SlidingWindowLimiter::new(RateLimiterConfig {
            max_requests: config.rate_limit_requests,
            window: config.rate_limit_window,
        }));
        let remote_access = Arc::new(RemoteAccessCell::new(config.remote_access_enabled));
        let webhook_enabled = notifier.is_enabled();
        let audit_enabled = audit.is_enabled();

        let router = Arc::new(EdgeRouter::new(
            cache.clone(),
            limiter.clone(),
            upstream,
            notifier,
            audit,
            RouterConfig {
                enumeration_ttl: config.enumeration_ttl,
                max_body_bytes: config.max_body_bytes,
            },
        ));
        let admin = Arc::new(AdminGate::new(
            config.admin_credentials.clone(),
            cache.clone(),
            remote_access,
        ));

        Self {
            router,
            admin,
            cache,
            limiter,
            config: Arc::new(config),
            webhook_enabled,
            audit_enabled,
        }
    }
}

/// Build the full application router.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/api/google_assistant", post(google_handler))
        .route("/api/alexa", post(alexa_handler))
        .merge(admin::routes())
        .fallback(passthrough_handler)
        .layer(logging_layer())
        .with_state(state)
}

// ============================================================================
// Dialect Handlers
// ============================================================================

async fn google_handler(State(state): State<AppState>, request: Request) -> Response {
    handle_dialect(&state, Dialect::Google, request).await
}

async fn alexa_handler(State(state): State<AppState>, request: Request) -> Response {
    handle_dialect(&state, Dialect::Alexa, request).await
}

async fn handle_dialect(state: &AppState, dialect: Dialect, request: Request) -> Response {
    let client_ip = client_ip(&request);
    let authorization = header_string(request.headers(), header::AUTHORIZATION);
    let limit = state.config.max_body_bytes;

    // Read one byte past the limit so the router can report the overflow.
    let body = axum::body::to_bytes(request.into_body(), limit.saturating_add(1))
        .await
        .map_err(|e| format!("failed to read body: {e}"));

    let inbound = InboundRequest {
        body,
        client_ip,
        authorization,
    };

    match state.router.handle(dialect, inbound).await {
        Ok(response) => (
            response.status,
            [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
            response.body,
        )
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

// ============================================================================
// Passthrough
// ============================================================================

async fn passthrough_handler(State(state): State<AppState>, request: Request) -> Response {
    let method = request.method().clone();
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), |pq| pq.as_str().to_string());
    let authorization = header_string(request.headers(), header::AUTHORIZATION);
    let content_type = header_string(request.headers(), header::CONTENT_TYPE);

    let body = match axum::body::to_bytes(request.into_body(), state.config.max_body_bytes).await
    {
        Ok(body) => body,
        Err(e) => {
            return ApiError(EdgeError::MalformedRequest {
                details: format!("failed to read body: {e}"),
            })
            .into_response();
        }
    };

    debug!(method = %method, path = %path_and_query, "Relaying request to upstream");

    let relayed = state
        .router
        .passthrough(
            method,
            &path_and_query,
            body,
            RelayHeaders {
                content_type: content_type.as_deref(),
                authorization: authorization.as_deref(),
            },
        )
        .await;

    let mut response = Response::new(Body::from(relayed.body));
    *response.status_mut() = relayed.status;
    if let Some(value) = relayed
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

// ============================================================================
// Helpers
// ============================================================================

/// Rate-limit identity: first `X-Forwarded-For` hop, then the peer address.
pub fn client_ip<B>(request: &http::Request<B>) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ci| ci.0.ip().to_string())
}

pub(crate) fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}
