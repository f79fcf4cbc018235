//! HTTP rendering of [`EdgeError`].

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, header};

use hearthgate_core::EdgeError;

/// Axum-facing wrapper around [`EdgeError`].
///
/// Renders `{"error": code, "message": text}` with the variant's status,
/// plus `Retry-After` for rate limiting and a Basic challenge for
/// authentication failures.
#[derive(Debug)]
pub struct ApiError(pub EdgeError);

impl From<EdgeError> for ApiError {
    fn from(err: EdgeError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let mut response = (status, Json(self.0.to_body())).into_response();

        if let Some(secs) = self.0.retry_after_secs() {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if matches!(self.0, EdgeError::Unauthorized) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"hearthgate\""),
            );
        }

        response
    }
}
