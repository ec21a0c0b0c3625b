//! # ringside-auth
//!
//! Caller authentication for Ringside downstream services.
//!
//! This crate provides:
//! - An in-process token cache populated from session events
//! - The auth gate middleware that classifies requests and resolves callers
//! - The fallback client for the issuing service's verification endpoint
//!
//! ## Modules
//!
//! - [`cache`] - Token cache store (token → identity) with TTL expiry
//! - [`config`] - Gate and cache configuration
//! - [`error`] - Gate rejection errors
//! - [`middleware`] - Axum middleware and extractors
//! - [`verify`] - Fallback identity verification

pub mod cache;
pub mod config;
pub mod error;
pub mod middleware;
pub mod verify;

pub use cache::{CacheStats, LocalTokenCache, NoOpTokenCache, TokenCache, create_token_cache};
pub use config::{CacheConfig, ConfigError, GateConfig};
pub use error::GateError;
pub use middleware::{
    Caller, GateState, OptionalCaller, PathPolicy, RequestClass, ResolutionSource,
    ResolvedCaller, auth_gate,
};
pub use verify::{HttpIdentityVerifier, IdentityVerifier, VerifyError};

/// Type alias for gate results.
pub type GateResult<T> = Result<T, GateError>;
