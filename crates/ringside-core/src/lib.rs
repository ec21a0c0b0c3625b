//! # ringside-core
//!
//! Types shared by every Ringside service:
//!
//! - [`events`] - the session event envelope carried on the event channel
//! - [`identity`] - the minimal caller identity resolved by downstream services
//! - [`error`] - decoding errors for the event envelope

pub mod error;
pub mod events;
pub mod identity;

pub use error::EventError;
pub use events::{
    ENVELOPE_VERSION, LoginData, LogoutData, SESSION_EVENTS_QUEUE, SessionEvent,
    SessionEventKind, USER_LOGGED_IN, USER_LOGGED_OUT,
};
pub use identity::{Identity, token_fingerprint};
