//! Tower layer for structured request/response logging.
//!
//! Wraps `tower_http::trace::TraceLayer` with callbacks that attach a
//! request id to every span and keep credentials out of the logs. Alexa and
//! Google both send account-linking tokens in `Authorization`, and admin
//! calls carry Basic credentials, so header dumps are always redacted.

use std::fmt;

use http::{HeaderMap, Request, Response};
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{DefaultOnBodyChunk, DefaultOnEos, TraceLayer};
use tracing::{debug, info, warn};

/// Headers whose values never reach the logs.
const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "proxy-authorization",
    "x-api-key",
    "x-auth-token",
];

const MAX_HEADERS_TO_LOG: usize = 50;
const MAX_VALUE_LEN: usize = 1024;

/// The logging/tracing layer applied to the whole app.
pub fn logging_layer() -> TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    RequestIdMakeSpan,
    OnRequestLogger,
    OnResponseLogger,
    DefaultOnBodyChunk,
    DefaultOnEos,
    OnFailureLogger,
> {
    TraceLayer::new_for_http()
        .make_span_with(RequestIdMakeSpan)
        .on_request(OnRequestLogger)
        .on_response(OnResponseLogger)
        .on_failure(OnFailureLogger)
}

/// Opens a span carrying `x-request-id`, or a fresh UUID when absent.
#[derive(Clone, Debug)]
pub struct RequestIdMakeSpan;

impl<B> tower_http::trace::MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> tracing::Span {
        let request_id = request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        tracing::info_span!(
            "request",
            method = %request.method(),
            path = %request.uri().path(),
            request_id = %request_id,
        )
    }
}

#[derive(Clone, Debug)]
pub struct OnRequestLogger;

impl<B> tower_http::trace::OnRequest<B> for OnRequestLogger {
    fn on_request(&mut self, request: &Request<B>, _span: &tracing::Span) {
        info!(
            method = %request.method(),
            path = %request.uri().path(),
            "Request received"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                version = ?request.version(),
                headers = ?SanitizedHeaders(request.headers()),
                "Request details"
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnResponseLogger;

impl<B> tower_http::trace::OnResponse<B> for OnResponseLogger {
    fn on_response(
        self,
        response: &Response<B>,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        info!(
            status = response.status().as_u16(),
            latency_ms = latency.as_millis(),
            "Response sent"
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                headers = ?SanitizedHeaders(response.headers()),
                "Response details"
            );
        }
    }
}

#[derive(Clone, Debug)]
pub struct OnFailureLogger;

impl tower_http::trace::OnFailure<ServerErrorsFailureClass> for OnFailureLogger {
    fn on_failure(
        &mut self,
        failure: ServerErrorsFailureClass,
        latency: std::time::Duration,
        _span: &tracing::Span,
    ) {
        warn!(
            classification = %failure,
            latency_ms = latency.as_millis(),
            "Request failed"
        );
    }
}

// ============================================================================
// Header Redaction
// ============================================================================

/// Debug view of a header map with credentials replaced.
struct SanitizedHeaders<'a>(&'a HeaderMap);

impl fmt::Debug for SanitizedHeaders<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();

        for (idx, (name, value)) in self.0.iter().enumerate() {
            if idx >= MAX_HEADERS_TO_LOG {
                map.entry(&"...", &format!("({} more headers)", self.0.len() - idx));
                break;
            }

            let name = name.as_str();
            let is_sensitive = SENSITIVE_HEADERS
                .iter()
                .any(|sensitive| name.eq_ignore_ascii_case(sensitive));

            if is_sensitive {
                map.entry(&name, &"[REDACTED]");
                continue;
            }

            match value.to_str() {
                Ok(val) if val.len() <= MAX_VALUE_LEN => {
                    map.entry(&name, &val);
                }
                Ok(val) => {
                    map.entry(
                        &name,
                        &format!("{}... ({} bytes)", truncate(val, MAX_VALUE_LEN), val.len()),
                    );
                }
                Err(_) => {
                    map.entry(&name, &format!("<binary: {} bytes>", value.len()));
                }
            }
        }

        map.finish()
    }
}

/// Longest prefix of `s` within `max` bytes that ends on a char boundary.
fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_sensitive_headers_redacted() {
        let mut headers = HeaderMap::new();
        headers.insert("Authorization", HeaderValue::from_static("Bearer secret"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        let rendered = format!("{:?}", SanitizedHeaders(&headers));
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
        assert!(rendered.contains("application/json"));
    }

    #[test]
    fn test_long_values_truncated_on_char_boundary() {
        let long = "é".repeat(MAX_VALUE_LEN);
        let cut = truncate(&long, MAX_VALUE_LEN + 1);
        assert!(cut.len() <= MAX_VALUE_LEN + 1);
        assert!(long.starts_with(cut));
    }
}
