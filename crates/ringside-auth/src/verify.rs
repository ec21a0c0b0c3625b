//! Fallback identity verification against the issuing service.
//!
//! When a token is not in the local cache the gate asks the issuing service
//! directly: `GET <issuer>/users/me` with the caller's bearer token. Any
//! success status with a readable identity accepts the token; any other
//! status rejects it; a transport failure means verification could not be
//! completed at all.

use std::time::Duration;

use async_trait::async_trait;
use ringside_core::Identity;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::ConfigError;

/// Path of the verification endpoint relative to the issuer base URL.
pub const VERIFY_PATH: &str = "users/me";

/// Errors returned by an [`IdentityVerifier`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The issuing service answered with a non-success status.
    #[error("issuing service rejected the token with status {status}")]
    Rejected {
        /// HTTP status returned by the issuing service.
        status: u16,
    },

    /// The call could not be completed (network failure, timeout, unreadable body).
    #[error("issuing service unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

impl VerifyError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Resolves a bearer token to an identity by asking the issuing service.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verifies `token` and returns the identity it belongs to.
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError>;
}

/// Identity object returned by the verification endpoint.
///
/// The issuing service may encode `id` as a number or a string.
#[derive(Debug, Deserialize)]
struct VerifiedUser {
    id: Value,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

impl VerifiedUser {
    fn into_identity(self) -> Result<Identity, VerifyError> {
        let id = match self.id {
            Value::String(s) if !s.is_empty() => s,
            Value::Number(n) => n.to_string(),
            other => {
                return Err(VerifyError::unavailable(format!(
                    "identity response has unusable id: {other}"
                )));
            }
        };
        Ok(Identity {
            id,
            email: self.email.unwrap_or_default(),
            username: self.username,
        })
    }
}

/// [`IdentityVerifier`] that calls the issuing service over HTTP.
#[derive(Debug, Clone)]
pub struct HttpIdentityVerifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpIdentityVerifier {
    /// Creates a verifier for the issuing service at `issuer_base_url`.
    ///
    /// `timeout` bounds the whole request, including reading the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL cannot be built or the HTTP
    /// client cannot be created.
    pub fn new(issuer_base_url: &Url, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Self::with_client(client, issuer_base_url)
    }

    /// Creates a verifier using an existing HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint URL cannot be built.
    pub fn with_client(client: reqwest::Client, issuer_base_url: &Url) -> Result<Self, ConfigError> {
        let mut base = issuer_base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base.join(VERIFY_PATH).map_err(|e| {
            ConfigError::InvalidValue(format!("cannot build verification URL: {e}"))
        })?;
        Ok(Self { client, endpoint })
    }

    /// Full URL of the verification endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl IdentityVerifier for HttpIdentityVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, VerifyError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    VerifyError::unavailable("verification request timed out")
                } else {
                    VerifyError::unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), "Issuing service rejected token");
            return Err(VerifyError::Rejected {
                status: status.as_u16(),
            });
        }

        let user: VerifiedUser = response.json().await.map_err(|e| {
            VerifyError::unavailable(format!("unreadable identity response: {e}"))
        })?;

        user.into_identity()
    }
}
