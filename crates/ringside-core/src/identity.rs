//! Caller identity shared between the issuing service and downstream services.

use serde::{Deserialize, Serialize};

/// Minimal caller attributes needed by downstream services.
///
/// The issuing service is the only source of truth for these values;
/// downstream services receive them either through a login event or from
/// the issuing service's verification endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier.
    pub id: String,

    /// User's email address.
    pub email: String,

    /// Display username, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Identity {
    /// Creates an identity from an identifier and email.
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            username: None,
        }
    }

    /// Sets the username.
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Returns a short, log-safe prefix of a bearer token.
///
/// Tokens are credentials and must never be written to logs in full.
pub fn token_fingerprint(token: &str) -> &str {
    let end = token
        .char_indices()
        .nth(6)
        .map(|(idx, _)| idx)
        .unwrap_or(token.len());
    &token[..end]
}
