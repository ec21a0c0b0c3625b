//! Event channel errors.

use ringside_core::EventError;

/// Errors raised by the event channel, the publisher and the consumer.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The broker is unreachable, the connection broke, or an operation
    /// did not finish within its timeout.
    #[error("Event channel unavailable: {message}")]
    Unavailable {
        /// What failed.
        message: String,
    },

    /// The event could not be built or serialized.
    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] EventError),
}

impl ChannelError {
    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<redis::RedisError> for ChannelError {
    fn from(e: redis::RedisError) -> Self {
        Self::unavailable(e.to_string())
    }
}

impl From<deadpool_redis::PoolError> for ChannelError {
    fn from(e: deadpool_redis::PoolError) -> Self {
        Self::unavailable(format!("redis pool: {e}"))
    }
}
