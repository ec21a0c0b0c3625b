//! # ringside-server
//!
//! The two halves of the Ringside session flow as HTTP services:
//!
//! - [`issuer`] - registers users, issues session tokens and publishes
//!   session events
//! - [`downstream`] - consumes session events into a token cache and guards
//!   its routes with the auth gate

pub mod config;
pub mod downstream;
pub mod handlers;
pub mod issuer;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod server;

pub use config::{AppConfig, ServiceRole};
pub use downstream::{BackgroundTasks, DownstreamService, start_downstream};
pub use server::{RingsideServer, ServerBuilder, build_app, build_issuer};
