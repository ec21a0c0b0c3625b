//! # ringside-events
//!
//! Session event plumbing between the issuing service and downstream
//! services.
//!
//! ## Modules
//!
//! - [`channel`] - Event channel traits (`EventSink`, `EventSource`, `Subscription`)
//! - [`redis_stream`] - Redis Streams channel with consumer groups
//! - [`memory`] - In-process channel with outage simulation
//! - [`publisher`] - Token publisher with deferred retries
//! - [`consumer`] - Token cache consumer and cache sweeper
//! - [`config`] - Channel, reconnect and retry configuration
//! - [`error`] - Channel errors

pub mod channel;
pub mod config;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod redis_stream;

pub use channel::{Delivery, EventSink, EventSource, Subscription};
pub use config::{ChannelConfig, PublishRetryConfig, ReconnectConfig};
pub use consumer::{
    ApplyOutcome, ConsumerStats, ConsumerStatsSnapshot, TokenCacheConsumer, spawn_cache_sweeper,
};
pub use error::ChannelError;
pub use memory::InMemoryChannel;
pub use publisher::{PublishOutcome, TokenPublisher};
pub use redis_stream::RedisStreamChannel;
