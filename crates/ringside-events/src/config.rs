//! Event channel configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use ringside_core::SESSION_EVENTS_QUEUE;

/// Session event channel configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [channel]
/// redis_url = "redis://event-bus:6379"
/// stream = "auth_events"
/// consumer_group = "wrestlers-service"
/// block = "5s"
/// max_len = 10000
///
/// [channel.reconnect]
/// initial_delay = "1s"
/// max_delay = "1m"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Redis connection URL.
    pub redis_url: String,

    /// Stream (queue) name shared by publisher and consumers.
    pub stream: String,

    /// Consumer group. Each downstream service uses its own group so every
    /// service receives every event. Defaults to the service name.
    pub consumer_group: Option<String>,

    /// Consumer name within the group. Defaults to the host name.
    pub consumer_name: Option<String>,

    /// Publisher connection pool size.
    pub pool_size: usize,

    /// Upper bound for a single publish.
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,

    /// How long a consumer read blocks waiting for new events.
    #[serde(with = "humantime_serde")]
    pub block: Duration,

    /// Maximum events fetched per read.
    pub batch_size: usize,

    /// Approximate number of entries the stream keeps. Older entries are
    /// trimmed on publish (`XADD ... MAXLEN ~`).
    pub max_len: usize,

    /// Consumer reconnect backoff.
    pub reconnect: ReconnectConfig,

    /// Deferred publish retries.
    pub publish_retry: PublishRetryConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            stream: SESSION_EVENTS_QUEUE.to_string(),
            consumer_group: None,
            consumer_name: None,
            pool_size: 8,
            publish_timeout: Duration::from_secs(2),
            block: Duration::from_secs(5),
            batch_size: 32,
            max_len: 10_000,
            reconnect: ReconnectConfig::default(),
            publish_retry: PublishRetryConfig::default(),
        }
    }
}

impl ChannelConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.redis_url.trim().is_empty() {
            return Err("channel.redis_url must not be empty".into());
        }
        if self.stream.trim().is_empty() {
            return Err("channel.stream must not be empty".into());
        }
        if self.pool_size == 0 {
            return Err("channel.pool_size must be > 0".into());
        }
        if self.batch_size == 0 {
            return Err("channel.batch_size must be > 0".into());
        }
        if self.max_len == 0 {
            return Err("channel.max_len must be > 0".into());
        }
        if self.publish_timeout.is_zero() {
            return Err("channel.publish_timeout must be > 0".into());
        }
        // BLOCK 0 waits forever.
        if self.block.is_zero() {
            return Err("channel.block must be > 0".into());
        }
        self.reconnect.validate()?;
        self.publish_retry.validate()
    }
}

/// Bounded exponential backoff for consumer reconnects.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First delay after a failure. Doubles on every consecutive failure.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for the delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl ReconnectConfig {
    fn validate(&self) -> Result<(), String> {
        if self.initial_delay.is_zero() {
            return Err("channel.reconnect.initial_delay must be > 0".into());
        }
        if self.max_delay < self.initial_delay {
            return Err("channel.reconnect.max_delay must be >= initial_delay".into());
        }
        Ok(())
    }
}

/// Retry policy for events whose first publish failed.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PublishRetryConfig {
    /// Retry attempts after the initial failure. Zero disables retries.
    pub max_attempts: u32,

    /// Delay before the first retry. Doubles on every attempt.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Upper bound for the delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for PublishRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl PublishRetryConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_attempts > 0 && self.initial_delay.is_zero() {
            return Err("channel.publish_retry.initial_delay must be > 0".into());
        }
        if self.max_delay < self.initial_delay {
            return Err("channel.publish_retry.max_delay must be >= initial_delay".into());
        }
        Ok(())
    }
}

/// Doubles `delay`, capped at `max`.
pub(crate) fn next_backoff(delay: Duration, max: Duration) -> Duration {
    delay.saturating_mul(2).min(max)
}
