//! Request classification and caller context types.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use ringside_core::Identity;

use crate::error::GateError;

// =============================================================================
// Request Class
// =============================================================================

/// How the gate treats a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Health/liveness path, always let through.
    Bypass,
    /// Public read, let through without identity resolution.
    Public,
    /// Requires a valid bearer token.
    Protected,
}

impl RequestClass {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Bypass => "bypass",
            RequestClass::Public => "public",
            RequestClass::Protected => "protected",
        }
    }
}

// =============================================================================
// Resolved Caller
// =============================================================================

/// Where the caller's identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    /// Local token cache (no network call).
    Cache,
    /// Synchronous call to the issuing service.
    Verified,
}

impl ResolutionSource {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Cache => "cache",
            ResolutionSource::Verified => "verified",
        }
    }
}

/// Caller context attached to request extensions by the gate.
#[derive(Debug, Clone)]
pub struct ResolvedCaller {
    /// Resolved identity.
    pub identity: Arc<Identity>,
    /// Path that resolved it.
    pub source: ResolutionSource,
}

// =============================================================================
// Extractors
// =============================================================================

/// Axum extractor for the caller resolved by the auth gate.
///
/// Rejects with [`GateError::AuthenticationRequired`] when the request did
/// not pass through the gate's protected path (for example a public route).
///
/// # Example
///
/// ```ignore
/// async fn handler(Caller(identity): Caller) -> String {
///     format!("Hello, {}!", identity.email)
/// }
/// ```
pub struct Caller(pub Arc<Identity>);

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = GateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ResolvedCaller>()
            .map(|caller| Caller(Arc::clone(&caller.identity)))
            .ok_or(GateError::AuthenticationRequired)
    }
}

/// Axum extractor that yields `None` instead of rejecting.
///
/// Useful on public routes that behave differently for known callers.
pub struct OptionalCaller(pub Option<Arc<Identity>>);

impl<S> FromRequestParts<S> for OptionalCaller
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalCaller(
            parts
                .extensions
                .get::<ResolvedCaller>()
                .map(|caller| Arc::clone(&caller.identity)),
        ))
    }
}
