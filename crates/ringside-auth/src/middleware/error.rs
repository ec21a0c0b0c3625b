//! Error response handling for the auth gate.
//!
//! Rejections are rendered as `{"detail": ..., "code": ...}`. 401 responses
//! carry a `WWW-Authenticate` challenge and 503 responses a `Retry-After`
//! hint, so clients can tell re-authentication apart from retrying.

use axum::{
    Json,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::error::GateError;

/// Seconds a client should wait before retrying after `AuthServiceUnavailable`.
const RETRY_AFTER_SECS: &str = "5";

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let (status, detail) = error_details(&self);

        let body = json!({
            "detail": detail,
            "code": self.code(),
        });

        let mut headers = HeaderMap::new();
        match &self {
            GateError::AuthenticationRequired => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer realm=\"ringside\""),
                );
            }
            GateError::InvalidCredentials { .. } => {
                headers.insert(
                    header::WWW_AUTHENTICATE,
                    HeaderValue::from_static("Bearer realm=\"ringside\", error=\"invalid_token\""),
                );
            }
            GateError::AuthServiceUnavailable { .. } => {
                headers.insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
            }
        }

        (status, headers, Json(body)).into_response()
    }
}

/// Returns (HTTP status, client-facing detail).
///
/// Details are fixed strings; the internal message is only logged.
fn error_details(error: &GateError) -> (StatusCode, &'static str) {
    match error {
        GateError::AuthenticationRequired => (StatusCode::UNAUTHORIZED, "Not authenticated"),
        GateError::InvalidCredentials { .. } => (StatusCode::UNAUTHORIZED, "Invalid token"),
        GateError::AuthServiceUnavailable { .. } => {
            (StatusCode::SERVICE_UNAVAILABLE, "Auth service unavailable")
        }
    }
}
