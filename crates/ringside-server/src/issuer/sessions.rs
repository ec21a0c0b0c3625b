//! Issued session tokens.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use time::OffsetDateTime;

struct Session {
    user_id: u64,
    expires_at: Instant,
}

/// A freshly issued session.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    /// Wall-clock end of the session, published with the login event.
    pub expires_at: OffsetDateTime,
}

/// Sessions issued by this process, keyed by token.
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
        }
    }

    /// Session lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issues a new token for `user_id`.
    pub fn issue(&self, user_id: u64) -> IssuedSession {
        let token = generate_token();
        let expires_at = OffsetDateTime::now_utc() + self.ttl;
        self.sessions.insert(
            token.clone(),
            Session {
                user_id,
                expires_at: Instant::now() + self.ttl,
            },
        );
        IssuedSession { token, expires_at }
    }

    /// Returns the user owning `token`, if the session is live.
    pub fn resolve(&self, token: &str) -> Option<u64> {
        let now = Instant::now();
        if let Some(session) = self.sessions.get(token) {
            if session.expires_at > now {
                return Some(session.user_id);
            }
        }
        self.sessions.remove_if(token, |_, s| s.expires_at <= now);
        None
    }

    /// Ends a session. Returns `true` if it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(token).is_some()
    }

    /// Drops expired sessions and returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// 32 random bytes, hex-encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}
