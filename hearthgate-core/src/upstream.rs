//! Client for the downstream controller.
//!
//! Every call is bounded by a request timeout and a connect timeout and is
//! never retried: a repeated EXECUTE could toggle a device twice. Failures
//! are normalized into [`UpstreamOutcome`] so the router can decide between
//! surfacing an error and serving an offline fallback:
//!
//! | reqwest / HTTP result | Outcome |
//! |---|---|
//! | 2xx with JSON body | `Success` |
//! | timeout | `Timeout` |
//! | connect error | `ConnectionFailure` |
//! | non-2xx, non-JSON body, oversized body, other transport error | `ProtocolFailure` |
//!
//! Only `Content-Type` and the caller's `Authorization` header are forwarded.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{ConfigError, EdgeError};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL of the downstream controller (e.g. `http://127.0.0.1:9001`).
    pub base_url: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// TCP + TLS handshake timeout.
    pub connect_timeout: Duration,
    /// Maximum idle pooled connections.
    pub pool_max_idle_per_host: usize,
    /// Largest response body accepted from upstream.
    pub max_response_size: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: crate::config::DEFAULT_UPSTREAM_URL.to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            pool_max_idle_per_host: 16,
            max_response_size: 10 * 1024 * 1024,
        }
    }
}

impl UpstreamConfig {
    /// Default configuration pointed at `base_url`.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// A successful upstream answer.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status (always 2xx).
    pub status: StatusCode,
    /// Raw body as received.
    pub body: Bytes,
    /// Parsed body.
    pub json: Value,
}

/// Normalized result of one upstream call.
#[derive(Debug, Clone)]
pub enum UpstreamOutcome {
    /// Upstream answered with a usable JSON document.
    Success(UpstreamResponse),
    /// No answer within the request timeout.
    Timeout {
        /// The timeout that elapsed.
        timeout_secs: u64,
    },
    /// The connection could not be established.
    ConnectionFailure {
        /// Transport error text.
        reason: String,
    },
    /// Upstream was reached but the exchange was unusable.
    ProtocolFailure {
        /// HTTP status, when a response was received.
        status: Option<StatusCode>,
        /// What went wrong.
        reason: String,
    },
}

impl UpstreamOutcome {
    /// Outage outcomes are the only ones that allow an offline fallback.
    pub fn is_outage(&self) -> bool {
        matches!(
            self,
            UpstreamOutcome::Timeout { .. } | UpstreamOutcome::ConnectionFailure { .. }
        )
    }

    /// Translate into the error surfaced to callers.
    ///
    /// # Errors
    ///
    /// Every non-`Success` outcome maps to its [`EdgeError`] counterpart.
    pub fn into_result(self) -> Result<UpstreamResponse, EdgeError> {
        match self {
            UpstreamOutcome::Success(response) => Ok(response),
            UpstreamOutcome::Timeout { timeout_secs } => {
                Err(EdgeError::UpstreamTimeout { timeout_secs })
            }
            UpstreamOutcome::ConnectionFailure { .. } => Err(EdgeError::UpstreamUnreachable),
            UpstreamOutcome::ProtocolFailure { status, reason } => {
                Err(EdgeError::UpstreamProtocolError {
                    status: status.map(|s| s.as_u16()),
                    reason,
                })
            }
        }
    }

    fn protocol(status: Option<StatusCode>, reason: impl Into<String>) -> Self {
        UpstreamOutcome::ProtocolFailure {
            status,
            reason: reason.into(),
        }
    }
}

/// Inbound headers carried over by [`UpstreamCaller::passthrough`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RelayHeaders<'a> {
    /// Caller `Content-Type`; omitted upstream when absent.
    pub content_type: Option<&'a str>,
    /// Caller `Authorization`.
    pub authorization: Option<&'a str>,
}

/// Verbatim response relayed by [`UpstreamCaller::passthrough`].
#[derive(Debug, Clone)]
pub struct PassthroughResponse {
    /// Upstream status, or 502 when upstream could not be reached.
    pub status: StatusCode,
    /// Upstream `Content-Type`, if any.
    pub content_type: Option<String>,
    /// Upstream body.
    pub body: Bytes,
}

impl PassthroughResponse {
    fn proxy_error() -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            content_type: Some("application/json".to_string()),
            body: Bytes::from_static(br#"{"error":"proxy_error"}"#),
        }
    }
}

// ============================================================================
// Trait
// ============================================================================

/// Abstraction over the downstream controller (enables scripted tests).
#[async_trait]
pub trait UpstreamCaller: Send + Sync {
    /// POST a dialect body to `path` and normalize the result.
    async fn call(&self, path: &str, body: Bytes, authorization: Option<&str>)
    -> UpstreamOutcome;

    /// Relay any other request verbatim.
    async fn passthrough(
        &self,
        method: Method,
        path_and_query: &str,
        body: Bytes,
        headers: RelayHeaders<'_>,
    ) -> PassthroughResponse;
}

// ============================================================================
// Client
// ============================================================================

/// Pooled HTTP client for the downstream controller.
#[derive(Clone)]
pub struct UpstreamClient {
    client: Client,
    config: UpstreamConfig,
    base_url: String,
}

impl UpstreamClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidUpstreamUrl`] for an empty or relative
    /// base URL and [`ConfigError::HttpClient`] if reqwest cannot build.
    pub fn new(config: UpstreamConfig) -> Result<Self, ConfigError> {
        if let Err(e) = reqwest::Url::parse(&config.base_url) {
            return Err(ConfigError::InvalidUpstreamUrl {
                url: config.base_url.clone(),
                reason: e.to_string(),
            });
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Base URL calls are sent to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Read the response body, refusing anything above `max_response_size`.
    async fn read_body_limited(&self, mut response: reqwest::Response) -> Result<Bytes, String> {
        let max_size = self.config.max_response_size;

        if let Some(content_length) = response.content_length()
            && content_length as usize > max_size
        {
            warn!(
                content_length,
                max_response_size = max_size,
                "Upstream response exceeds size limit (Content-Length)"
            );
            return Err(format!(
                "Upstream response too large: {content_length} bytes exceeds {max_size} byte limit"
            ));
        }

        let mut buf = Vec::with_capacity(
            response
                .content_length()
                .map(|cl| cl as usize)
                .unwrap_or(8192)
                .min(max_size),
        );

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| format!("Failed to read upstream response: {e}"))?
        {
            if buf.len() + chunk.len() > max_size {
                warn!(
                    accumulated = buf.len(),
                    chunk_size = chunk.len(),
                    max_response_size = max_size,
                    "Upstream response exceeds size limit during streaming"
                );
                return Err(format!(
                    "Upstream response too large: >={} bytes exceeds {max_size} byte limit",
                    buf.len() + chunk.len()
                ));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.into())
    }

    fn classify_error(&self, error: reqwest::Error, path: &str) -> UpstreamOutcome {
        if error.is_timeout() {
            warn!(
                path,
                timeout_secs = self.config.timeout.as_secs(),
                "Upstream request timed out"
            );
            UpstreamOutcome::Timeout {
                timeout_secs: self.config.timeout.as_secs(),
            }
        } else if error.is_connect() {
            warn!(path, url = %self.base_url, "Failed to connect to upstream");
            UpstreamOutcome::ConnectionFailure {
                reason: error.to_string(),
            }
        } else {
            error!(path, error = %error, "Upstream request failed");
            UpstreamOutcome::protocol(None, error.to_string())
        }
    }
}

#[async_trait]
impl UpstreamCaller for UpstreamClient {
    #[tracing::instrument(skip(self, body, authorization), fields(body_len = body.len()))]
    async fn call(
        &self,
        path: &str,
        body: Bytes,
        authorization: Option<&str>,
    ) -> UpstreamOutcome {
        let url = self.url(path);
        debug!(url = %url, "Forwarding request to upstream");

        let mut request = self
            .client
            .post(&url)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body);
        if let Some(auth) = authorization {
            request = request.header(http::header::AUTHORIZATION, auth);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return self.classify_error(e, path),
        };

        let status = response.status();
        if !status.is_success() {
            warn!(path, status = %status, "Upstream returned error status");
            return UpstreamOutcome::protocol(Some(status), format!("Upstream returned HTTP {status}"));
        }

        let body = match self.read_body_limited(response).await {
            Ok(body) => body,
            Err(reason) => return UpstreamOutcome::protocol(Some(status), reason),
        };

        match serde_json::from_slice::<Value>(&body) {
            Ok(json) => {
                debug!(path, status = %status, body_len = body.len(), "Received upstream response");
                UpstreamOutcome::Success(UpstreamResponse { status, body, json })
            }
            Err(e) => {
                error!(path, error = %e, body_size = body.len(), "Failed to parse upstream response");
                UpstreamOutcome::protocol(
                    Some(status),
                    format!("Upstream response is not JSON: {e}"),
                )
            }
        }
    }

    async fn passthrough(
        &self,
        method: Method,
        path_and_query: &str,
        body: Bytes,
        headers: RelayHeaders<'_>,
    ) -> PassthroughResponse {
        let url = self.url(path_and_query);
        debug!(method = %method, url = %url, "Passing request through to upstream");

        let mut request = self.client.request(method, &url).body(body);
        if let Some(content_type) = headers.content_type {
            request = request.header(http::header::CONTENT_TYPE, content_type);
        }
        if let Some(auth) = headers.authorization {
            request = request.header(http::header::AUTHORIZATION, auth);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(path = path_and_query, error = %e, "Passthrough request failed");
                return PassthroughResponse::proxy_error();
            }
        };

        let status = response.status();
        let content_type = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        match self.read_body_limited(response).await {
            Ok(body) => PassthroughResponse {
                status,
                content_type,
                body,
            },
            Err(reason) => {
                warn!(path = path_and_query, reason = %reason, "Passthrough body unreadable");
                PassthroughResponse::proxy_error()
            }
        }
    }
}
