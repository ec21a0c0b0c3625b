//! HTTP middleware for caller authentication.
//!
//! This module provides the Axum auth gate and the extractors handlers use
//! to read the resolved caller:
//!
//! - Request classification (bypass / public / protected)
//! - Bearer token extraction
//! - Cache lookup with fallback verification against the issuing service
//! - JSON error responses for rejected requests
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, middleware, routing::get};
//! use ringside_auth::middleware::{Caller, GateState, auth_gate};
//!
//! async fn whoami(Caller(identity): Caller) -> String {
//!     identity.email.clone()
//! }
//!
//! let app = Router::new()
//!     .route("/whoami", get(whoami))
//!     .layer(middleware::from_fn_with_state(gate_state, auth_gate));
//! ```

pub mod error;
pub mod gate;
pub mod types;

pub use gate::{GateState, PathPolicy, auth_gate};
pub use types::{Caller, OptionalCaller, RequestClass, ResolutionSource, ResolvedCaller};
