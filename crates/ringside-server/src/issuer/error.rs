//! Issuing service errors.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Errors returned by the issuing service's HTTP surface.
#[derive(Debug, thiserror::Error)]
pub enum IssuerError {
    #[error("Email already registered")]
    DuplicateEmail,

    #[error("Username already taken")]
    DuplicateUsername,

    #[error("{0}")]
    Validation(String),

    #[error("Incorrect username or password")]
    InvalidLogin,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Could not validate credentials")]
    InvalidToken,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IssuerError {
    /// Creates a new `Validation` error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::DuplicateEmail | Self::DuplicateUsername | Self::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InvalidLogin | Self::NotAuthenticated | Self::InvalidToken => {
                StatusCode::UNAUTHORIZED
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IssuerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            // Internal details are logged, not returned.
            Self::Internal(message) => {
                tracing::error!(error = %message, "Issuer request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "detail": detail }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
