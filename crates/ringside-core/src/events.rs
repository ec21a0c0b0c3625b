//! Session event envelope.
//!
//! Every message on the session event channel is a JSON envelope:
//!
//! ```json
//! {"event_name": "UserLoggedIn", "data": {"email": "a@x.com", "token": "tok123"}}
//! ```
//!
//! The envelope is the unit of transport. Consumers decode it with
//! [`SessionEvent::kind`] and must treat unknown event names as no-ops so
//! that publishers can introduce new event types without breaking older
//! consumers.
//!
//! A login event may carry the session's `expires_at`; consumers must not
//! keep the token past it, however late the event arrives.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use crate::error::EventError;
use crate::identity::Identity;

/// Queue (stream) name shared by the publisher and every consumer.
pub const SESSION_EVENTS_QUEUE: &str = "auth_events";

/// Event emitted by the issuing service after a successful login.
pub const USER_LOGGED_IN: &str = "UserLoggedIn";

/// Event emitted by the issuing service when a session is terminated.
pub const USER_LOGGED_OUT: &str = "UserLoggedOut";

/// Current envelope version. Envelopes without a version are treated as v1.
pub const ENVELOPE_VERSION: u32 = 1;

fn default_version() -> u32 {
    ENVELOPE_VERSION
}

// =============================================================================
// Envelope
// =============================================================================

/// Immutable, versioned session event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Event type name, e.g. `UserLoggedIn`.
    pub event_name: String,

    /// Envelope version.
    #[serde(default = "default_version")]
    pub version: u32,

    /// Event-specific payload.
    pub data: Value,
}

impl SessionEvent {
    /// Builds an envelope around an arbitrary serializable payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::EmptyName`] for an empty (or whitespace) name and
    /// [`EventError::Serialization`] if the payload cannot be converted to JSON.
    pub fn from_payload<T: Serialize + ?Sized>(
        event_name: &str,
        payload: &T,
    ) -> Result<Self, EventError> {
        if event_name.trim().is_empty() {
            return Err(EventError::EmptyName);
        }
        let data = serde_json::to_value(payload).map_err(EventError::Serialization)?;
        Ok(Self {
            event_name: event_name.to_string(),
            version: ENVELOPE_VERSION,
            data,
        })
    }

    /// Builds a `UserLoggedIn` event.
    pub fn logged_in(login: &LoginData) -> Self {
        let mut data = Map::new();
        data.insert("email".into(), json!(login.email));
        data.insert("token".into(), json!(login.token));
        if let Some(user_id) = &login.user_id {
            data.insert("user_id".into(), json!(user_id));
        }
        if let Some(username) = &login.username {
            data.insert("username".into(), json!(username));
        }
        Self {
            event_name: USER_LOGGED_IN.to_string(),
            version: ENVELOPE_VERSION,
            data: Value::Object(data),
        }
    }

    /// Builds a `UserLoggedOut` event.
    pub fn logged_out(token: impl Into<String>) -> Self {
        Self {
            event_name: USER_LOGGED_OUT.to_string(),
            version: ENVELOPE_VERSION,
            data: json!({ "token": token.into() }),
        }
    }

    /// Parses an envelope from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Malformed`] if the bytes are not a valid envelope.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, EventError> {
        serde_json::from_slice(bytes).map_err(EventError::Malformed)
    }

    /// Serializes the envelope to its wire representation.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String, EventError> {
        serde_json::to_string(self).map_err(EventError::Serialization)
    }

    /// Decodes the typed event carried by this envelope.
    ///
    /// Unknown event names decode to [`SessionEventKind::Unknown`] rather
    /// than an error.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::InvalidData`] if a known event carries data of
    /// the wrong shape.
    pub fn kind(&self) -> Result<SessionEventKind, EventError> {
        let invalid = |source| EventError::InvalidData {
            event_name: self.event_name.clone(),
            source,
        };
        match self.event_name.as_str() {
            USER_LOGGED_IN => serde_json::from_value(self.data.clone())
                .map(SessionEventKind::LoggedIn)
                .map_err(invalid),
            USER_LOGGED_OUT => serde_json::from_value(self.data.clone())
                .map(SessionEventKind::LoggedOut)
                .map_err(invalid),
            other => Ok(SessionEventKind::Unknown(other.to_string())),
        }
    }
}

// =============================================================================
// Typed payloads
// =============================================================================

/// Decoded session event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEventKind {
    /// A new session token was issued.
    LoggedIn(LoginData),
    /// A session token was terminated.
    LoggedOut(LogoutData),
    /// An event type this consumer does not understand.
    Unknown(String),
}

/// Payload of a `UserLoggedIn` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginData {
    /// Email of the authenticated user.
    pub email: String,

    /// Newly issued session token.
    pub token: String,

    /// Stable user identifier. Older publishers omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Username of the authenticated user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// End of the issuing service's session (RFC 3339). Older publishers omit it.
    #[serde(
        default,
        with = "time::serde::rfc3339::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

impl LoginData {
    /// Creates login data with only the required fields.
    pub fn new(email: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            token: token.into(),
            user_id: None,
            username: None,
            expires_at: None,
        }
    }

    /// Session lifetime left at `now`.
    ///
    /// `None` when no expiry was published, `Some(Duration::ZERO)` once it has passed.
    pub fn remaining_at(&self, now: OffsetDateTime) -> Option<Duration> {
        self.expires_at
            .map(|expires_at| Duration::try_from(expires_at - now).unwrap_or(Duration::ZERO))
    }

    /// Returns the identity carried by this login.
    ///
    /// The email is the identifier when no `user_id` was published.
    pub fn identity(&self) -> Identity {
        Identity {
            id: self.user_id.clone().unwrap_or_else(|| self.email.clone()),
            email: self.email.clone(),
            username: self.username.clone(),
        }
    }
}

/// Payload of a `UserLoggedOut` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogoutData {
    /// Token whose session ended.
    pub token: String,
}
