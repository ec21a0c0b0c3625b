//! The issuing service.
//!
//! Registers users, authenticates them, issues session tokens and
//! publishes session events for downstream services.

pub mod error;
pub mod handlers;
pub mod password;
pub mod sessions;
pub mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use ringside_events::TokenPublisher;

pub use error::IssuerError;
pub use sessions::{IssuedSession, SessionStore};
pub use users::{InMemoryUserDirectory, User, UserDirectory, UserRead};

/// Shared state of the issuing service.
#[derive(Clone)]
pub struct IssuerState {
    pub users: Arc<dyn UserDirectory>,
    pub sessions: Arc<SessionStore>,
    pub publisher: TokenPublisher,
}

impl IssuerState {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        sessions: Arc<SessionStore>,
        publisher: TokenPublisher,
    ) -> Self {
        Self {
            users,
            sessions,
            publisher,
        }
    }
}

/// Issuer routes: registration, login, logout and the verification endpoint.
pub fn routes(state: IssuerState) -> Router {
    Router::new()
        .route("/users", post(handlers::register))
        .route("/users/me", get(handlers::me))
        .route("/auth/login", post(handlers::login))
        .route("/auth/logout", post(handlers::logout))
        .with_state(state)
}

/// Spawns a task that periodically drops expired sessions.
pub fn spawn_session_sweeper(
    sessions: Arc<SessionStore>,
    interval: std::time::Duration,
    shutdown: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = sessions.cleanup_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = sessions.len(), "Swept expired sessions");
                    }
                }
            }
        }
    })
}
