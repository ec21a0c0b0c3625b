//! Auth gate rejection errors.
//!
//! Every rejection the gate can produce maps to exactly one variant so
//! clients can tell "you are unauthorized" apart from "try again later".

/// Errors returned by the auth gate for protected requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// No credential was presented.
    #[error("Authentication required")]
    AuthenticationRequired,

    /// A credential was presented but rejected.
    #[error("Invalid credentials: {message}")]
    InvalidCredentials {
        /// Why the credential was rejected.
        message: String,
    },

    /// The fallback verification call could not complete.
    #[error("Auth service unavailable: {message}")]
    AuthServiceUnavailable {
        /// Why verification could not complete.
        message: String,
    },
}

impl GateError {
    /// Creates a new `InvalidCredentials` error.
    #[must_use]
    pub fn invalid_credentials(message: impl Into<String>) -> Self {
        Self::InvalidCredentials {
            message: message.into(),
        }
    }

    /// Creates a new `AuthServiceUnavailable` error.
    #[must_use]
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::AuthServiceUnavailable {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "authentication_required",
            Self::InvalidCredentials { .. } => "invalid_credentials",
            Self::AuthServiceUnavailable { .. } => "auth_service_unavailable",
        }
    }

    /// Returns `true` if the client should retry the same request later.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AuthServiceUnavailable { .. })
    }
}
