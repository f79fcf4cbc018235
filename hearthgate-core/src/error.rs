//! Error taxonomy for the edge proxy.
//!
//! Every failure the router can produce is translated into an [`EdgeError`]
//! before it reaches the HTTP layer. Each variant carries a stable
//! status/error-code pair so callers (Google Assistant, Alexa, the admin UI)
//! can rely on the shape of rejections.
//!
//! Configuration problems found at startup are reported separately through
//! [`ConfigError`]; the binary refuses to start on any of them.

use http::StatusCode;
use thiserror::Error;

/// Failures surfaced to inbound callers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EdgeError {
    /// Admission denied by the sliding-window limiter.
    ///
    /// Always recoverable: the caller may retry after `retry_after_secs`.
    #[error("Rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the window has fully rolled over.
        retry_after_secs: u64,
    },

    /// The downstream controller did not answer within the upstream timeout.
    #[error("Upstream did not respond within {timeout_secs}s")]
    UpstreamTimeout {
        /// The timeout that elapsed.
        timeout_secs: u64,
    },

    /// The tunnel to the downstream controller could not be established.
    #[error("Upstream unreachable")]
    UpstreamUnreachable,

    /// The downstream controller was reachable but rejected the call or
    /// answered with something unusable.
    ///
    /// Never triggers an offline fallback.
    #[error("Upstream protocol error: {reason}")]
    UpstreamProtocolError {
        /// HTTP status returned by upstream, when one was received.
        status: Option<u16>,
        /// What went wrong.
        reason: String,
    },

    /// A fallback was attempted after an outage but none of the requested
    /// endpoints had a cached state.
    #[error("Upstream unavailable and no cached state for {requested} requested endpoint(s)")]
    NoFallbackAvailable {
        /// Number of endpoint ids the caller asked for.
        requested: usize,
    },

    /// Administrative credential check failed.
    #[error("Unauthorized")]
    Unauthorized,

    /// The request body exceeded the safety bound or could not be parsed.
    #[error("Malformed request: {details}")]
    MalformedRequest {
        /// Why the body was rejected.
        details: String,
    },
}

impl EdgeError {
    /// HTTP status returned to the caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EdgeError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            EdgeError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            EdgeError::UpstreamUnreachable => StatusCode::BAD_GATEWAY,
            EdgeError::UpstreamProtocolError { .. } => StatusCode::BAD_GATEWAY,
            EdgeError::NoFallbackAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            EdgeError::Unauthorized => StatusCode::UNAUTHORIZED,
            EdgeError::MalformedRequest { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable error code placed in the `error` field of the body.
    pub fn error_code(&self) -> &'static str {
        match self {
            EdgeError::RateLimited { .. } => "rate_limit_exceeded",
            EdgeError::UpstreamTimeout { .. } => "upstream_timeout",
            EdgeError::UpstreamUnreachable => "upstream_unreachable",
            EdgeError::UpstreamProtocolError { .. } => "upstream_error",
            EdgeError::NoFallbackAvailable { .. } => "upstream_unavailable",
            EdgeError::Unauthorized => "unauthorized",
            EdgeError::MalformedRequest { .. } => "malformed_request",
        }
    }

    /// Seconds a rate-limited caller should wait, if applicable.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            EdgeError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }

    /// Upstream HTTP status behind a protocol error, if one was received.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            EdgeError::UpstreamProtocolError { status, .. } => *status,
            _ => None,
        }
    }

    /// JSON body sent to the caller.
    pub fn to_body(&self) -> serde_json::Value {
        let mut body = serde_json::json!({
            "error": self.error_code(),
            "message": self.to_string(),
        });
        if let Some(retry_after) = self.retry_after_secs() {
            body["retry_after"] = retry_after.into();
        }
        if let Some(status) = self.upstream_status() {
            body["upstream_status"] = status.into();
        }
        body
    }
}

/// Startup configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The upstream base URL is empty or not an absolute URL.
    #[error("Invalid upstream URL '{url}': {reason}")]
    InvalidUpstreamUrl {
        /// The offending value.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// The webhook URL is set but not an absolute URL.
    #[error("Invalid webhook URL '{url}': {reason}")]
    InvalidWebhookUrl {
        /// The offending value.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// A rate-limit parameter is zero.
    #[error("{name} must be greater than zero")]
    ZeroRateLimit {
        /// Environment variable name.
        name: &'static str,
    },

    /// Only one half of the admin credential pair is configured.
    #[error(
        "HEARTHGATE_ADMIN_USERNAME and HEARTHGATE_ADMIN_PASSWORD must be set together"
    )]
    IncompleteAdminCredentials,

    /// The HTTP client could not be built (TLS backend failure).
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}
