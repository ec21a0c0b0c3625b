//! The auth gate.
//!
//! Every request is classified before any credential work happens:
//!
//! 1. **Bypass** - the health path is always let through.
//! 2. **Public** - a public prefix read with GET/HEAD is let through.
//! 3. **Protected** - everything else needs `Authorization: Bearer <token>`.
//!
//! Protected requests resolve the caller from the local token cache (fast
//! path). On a miss the gate calls the issuing service once, bounded by
//! `verify_timeout` (fallback path). No lock is held across that call.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Method, Request, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};
use ringside_core::token_fingerprint;

use crate::cache::TokenCache;
use crate::config::GateConfig;
use crate::error::GateError;
use crate::verify::{IdentityVerifier, VerifyError};

use super::types::{RequestClass, ResolutionSource, ResolvedCaller};

// =============================================================================
// Path Policy
// =============================================================================

/// Decides which requests skip authentication.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    health_path: String,
    public_prefixes: Vec<String>,
}

impl PathPolicy {
    /// Creates a policy from a health path and a list of public prefixes.
    pub fn new(health_path: impl Into<String>, public_prefixes: Vec<String>) -> Self {
        Self {
            health_path: health_path.into(),
            public_prefixes,
        }
    }

    /// Classifies a request by method and path.
    pub fn classify(&self, method: &Method, path: &str) -> RequestClass {
        if path == self.health_path {
            return RequestClass::Bypass;
        }

        let safe_read = method == Method::GET || method == Method::HEAD;
        if safe_read && self.public_prefixes.iter().any(|p| matches_prefix(path, p)) {
            return RequestClass::Public;
        }

        RequestClass::Protected
    }
}

/// Prefix match on path segment boundaries: `/matches` covers `/matches`
/// and `/matches/3` but not `/matches-admin`.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

// =============================================================================
// Gate State
// =============================================================================

/// State shared by every request passing through the gate.
#[derive(Clone)]
pub struct GateState {
    /// Local token cache, shared with the session event consumer.
    pub cache: Arc<dyn TokenCache>,

    /// Fallback verification against the issuing service.
    pub verifier: Arc<dyn IdentityVerifier>,

    /// Bypass/public path rules.
    pub policy: Arc<PathPolicy>,

    /// Upper bound for a fallback verification call.
    pub verify_timeout: Duration,

    /// Store identities returned by the fallback call in the cache.
    pub populate_on_verify: bool,
}

impl GateState {
    /// Creates gate state from configuration.
    pub fn new(
        cache: Arc<dyn TokenCache>,
        verifier: Arc<dyn IdentityVerifier>,
        config: &GateConfig,
    ) -> Self {
        Self {
            cache,
            verifier,
            policy: Arc::new(PathPolicy::new(
                config.health_path.clone(),
                config.public_prefixes.clone(),
            )),
            verify_timeout: config.verify_timeout,
            populate_on_verify: config.populate_on_verify,
        }
    }

    /// Resolves the caller of a protected request from its headers.
    ///
    /// # Errors
    ///
    /// - [`GateError::AuthenticationRequired`] if no `Authorization` header is present
    /// - [`GateError::InvalidCredentials`] if the credential is malformed or rejected
    /// - [`GateError::AuthServiceUnavailable`] if the fallback call fails or times out
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<ResolvedCaller, GateError> {
        let token = bearer_token(headers)?;

        if let Some(identity) = self.cache.get(token) {
            tracing::debug!(
                token = %token_fingerprint(token),
                user_id = %identity.id,
                "Caller resolved from cache"
            );
            return Ok(ResolvedCaller {
                identity,
                source: ResolutionSource::Cache,
            });
        }

        let identity = self.verify_remote(token).await?;
        let identity = if self.populate_on_verify {
            self.cache.put(token.to_string(), identity)
        } else {
            Arc::new(identity)
        };

        tracing::debug!(
            token = %token_fingerprint(token),
            user_id = %identity.id,
            "Caller resolved by issuing service"
        );

        Ok(ResolvedCaller {
            identity,
            source: ResolutionSource::Verified,
        })
    }

    async fn verify_remote(&self, token: &str) -> Result<ringside_core::Identity, GateError> {
        match tokio::time::timeout(self.verify_timeout, self.verifier.verify(token)).await {
            Ok(Ok(identity)) => Ok(identity),
            Ok(Err(VerifyError::Rejected { status })) => {
                tracing::debug!(
                    token = %token_fingerprint(token),
                    status,
                    "Token rejected by issuing service"
                );
                Err(GateError::invalid_credentials(format!(
                    "issuing service returned status {status}"
                )))
            }
            Ok(Err(VerifyError::Unavailable { message })) => {
                tracing::warn!(error = %message, "Fallback verification failed");
                Err(GateError::service_unavailable(message))
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.verify_timeout.as_millis() as u64,
                    "Fallback verification timed out"
                );
                Err(GateError::service_unavailable("verification timed out"))
            }
        }
    }
}

/// Extracts the bearer token from the `Authorization` header.
///
/// The scheme is matched case-insensitively.
fn bearer_token(headers: &HeaderMap) -> Result<&str, GateError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(GateError::AuthenticationRequired)?;

    let value = value
        .to_str()
        .map_err(|_| GateError::invalid_credentials("Authorization header is not valid ASCII"))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| GateError::invalid_credentials("Invalid Authorization header format"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(GateError::invalid_credentials(
            "Authorization scheme must be Bearer",
        ));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(GateError::invalid_credentials("Empty Bearer token"));
    }

    Ok(token)
}

// =============================================================================
// Middleware
// =============================================================================

/// Auth gate middleware.
///
/// Use with `axum::middleware::from_fn_with_state(gate_state, auth_gate)`.
/// On success the [`ResolvedCaller`] is stored in request extensions, where
/// the [`Caller`](super::Caller) extractor picks it up.
pub async fn auth_gate(
    State(state): State<GateState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let class = state.policy.classify(req.method(), req.uri().path());

    if class != RequestClass::Protected {
        metrics::counter!("gate_requests_total", "class" => class.as_str(), "outcome" => "pass")
            .increment(1);
        return next.run(req).await;
    }

    match state.authenticate(req.headers()).await {
        Ok(caller) => {
            metrics::counter!(
                "gate_requests_total",
                "class" => class.as_str(),
                "outcome" => caller.source.as_str()
            )
            .increment(1);
            req.extensions_mut().insert(caller);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(
                path = %req.uri().path(),
                error = %e,
                "Request rejected by auth gate"
            );
            metrics::counter!(
                "gate_requests_total",
                "class" => class.as_str(),
                "outcome" => e.code()
            )
            .increment(1);
            e.into_response()
        }
    }
}
