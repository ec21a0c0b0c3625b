//! Token publisher.
//!
//! The issuing service calls [`TokenPublisher::publish_or_defer`] right after
//! a successful login. The call never fails the login because of the
//! broker: if the first publish does not go through, the event is handed to
//! a background retry task with bounded exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use ringside_core::SessionEvent;
use serde::Serialize;

use crate::channel::EventSink;
use crate::config::{ChannelConfig, PublishRetryConfig, next_backoff};
use crate::error::ChannelError;

/// Result of [`TokenPublisher::publish_or_defer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The event is on the channel under this id.
    Published(String),
    /// The channel was unavailable; a background retry was scheduled.
    Deferred,
}

/// Publishes session events to the event channel.
#[derive(Clone)]
pub struct TokenPublisher {
    sink: Arc<dyn EventSink>,
    queue: String,
    publish_timeout: Duration,
    retry: PublishRetryConfig,
}

impl TokenPublisher {
    /// Creates a publisher for `queue`.
    pub fn new(
        sink: Arc<dyn EventSink>,
        queue: impl Into<String>,
        publish_timeout: Duration,
        retry: PublishRetryConfig,
    ) -> Self {
        Self {
            sink,
            queue: queue.into(),
            publish_timeout,
            retry,
        }
    }

    /// Creates a publisher using the stream and timeouts from `config`.
    pub fn from_config(sink: Arc<dyn EventSink>, config: &ChannelConfig) -> Self {
        Self::new(
            sink,
            config.stream.clone(),
            config.publish_timeout,
            config.publish_retry.clone(),
        )
    }

    /// Queue this publisher writes to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publishes `payload` under `event_name`.
    ///
    /// # Errors
    ///
    /// - [`ChannelError::InvalidEvent`] for an empty name or unserializable payload
    /// - [`ChannelError::Unavailable`] if the broker is unreachable or the
    ///   publish exceeds the configured timeout
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        event_name: &str,
        payload: &T,
    ) -> Result<String, ChannelError> {
        let event = SessionEvent::from_payload(event_name, payload)?;
        self.publish_event(&event).await
    }

    /// Publishes a prebuilt envelope.
    ///
    /// # Errors
    ///
    /// Same as [`publish`](Self::publish).
    pub async fn publish_event(&self, event: &SessionEvent) -> Result<String, ChannelError> {
        let body = event.to_json()?;

        let result = tokio::time::timeout(self.publish_timeout, self.sink.publish(&self.queue, &body))
            .await
            .map_err(|_| {
                ChannelError::unavailable(format!(
                    "publish timed out after {}ms",
                    self.publish_timeout.as_millis()
                ))
            })
            .and_then(|r| r);

        match &result {
            Ok(id) => {
                metrics::counter!("session_events_published_total", "event" => event.event_name.clone())
                    .increment(1);
                tracing::debug!(
                    stream = %self.queue,
                    event = %event.event_name,
                    id = %id,
                    "Published session event"
                );
            }
            Err(e) => {
                metrics::counter!("session_events_publish_failures_total").increment(1);
                tracing::debug!(event = %event.event_name, error = %e, "Publish failed");
            }
        }

        result
    }

    /// Publishes `payload`, scheduling a background retry if the channel is
    /// unavailable.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidEvent`] only; channel outages are
    /// reported as [`PublishOutcome::Deferred`].
    pub async fn publish_or_defer<T: Serialize + ?Sized>(
        &self,
        event_name: &str,
        payload: &T,
    ) -> Result<PublishOutcome, ChannelError> {
        let event = SessionEvent::from_payload(event_name, payload)?;
        self.publish_event_or_defer(event).await
    }

    /// Envelope variant of [`publish_or_defer`](Self::publish_or_defer).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidEvent`] if the envelope cannot be serialized.
    pub async fn publish_event_or_defer(
        &self,
        event: SessionEvent,
    ) -> Result<PublishOutcome, ChannelError> {
        match self.publish_event(&event).await {
            Ok(id) => Ok(PublishOutcome::Published(id)),
            Err(ChannelError::Unavailable { message }) => {
                tracing::warn!(
                    event = %event.event_name,
                    error = %message,
                    max_attempts = self.retry.max_attempts,
                    "Event channel unavailable, deferring publish"
                );
                self.spawn_retry(event);
                Ok(PublishOutcome::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    fn spawn_retry(&self, event: SessionEvent) {
        if self.retry.max_attempts == 0 {
            metrics::counter!("session_events_dropped_total").increment(1);
            tracing::error!(event = %event.event_name, "Publish retries disabled, event dropped");
            return;
        }

        let publisher = self.clone();
        tokio::spawn(async move {
            let mut delay = publisher.retry.initial_delay;

            for attempt in 1..=publisher.retry.max_attempts {
                tokio::time::sleep(delay).await;

                match publisher.publish_event(&event).await {
                    Ok(id) => {
                        tracing::info!(
                            event = %event.event_name,
                            id = %id,
                            attempt,
                            "Deferred session event published"
                        );
                        return;
                    }
                    Err(e) if e.is_retryable() => {
                        tracing::warn!(
                            event = %event.event_name,
                            attempt,
                            error = %e,
                            backoff_ms = delay.as_millis() as u64,
                            "Deferred publish failed, retrying"
                        );
                        delay = next_backoff(delay, publisher.retry.max_delay);
                    }
                    Err(e) => {
                        tracing::error!(event = %event.event_name, error = %e, "Deferred publish aborted");
                        break;
                    }
                }
            }

            metrics::counter!("session_events_dropped_total").increment(1);
            tracing::error!(
                event = %event.event_name,
                attempts = publisher.retry.max_attempts,
                "Giving up on session event, downstream services will use fallback verification"
            );
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryChannel;
    use ringside_core::{LoginData, SESSION_EVENTS_QUEUE, SessionEventKind};
    use serde_json::json;

    fn publisher(channel: &InMemoryChannel, retry: PublishRetryConfig) -> TokenPublisher {
        TokenPublisher::new(
            Arc::new(channel.clone()),
            SESSION_EVENTS_QUEUE,
            Duration::from_secs(1),
            retry,
        )
    }

    #[tokio::test]
    async fn test_publish_writes_envelope() {
        let channel = InMemoryChannel::new();
        let publisher = publisher(&channel, PublishRetryConfig::default());

        publisher
            .publish("UserLoggedIn", &json!({"email": "a@x.com", "token": "tok123"}))
            .await
            .unwrap();

        let published = channel.published(SESSION_EVENTS_QUEUE);
        assert_eq!(published.len(), 1);
        let event = SessionEvent::from_slice(published[0].as_bytes()).unwrap();
        assert_eq!(
            event.kind().unwrap(),
            SessionEventKind::LoggedIn(LoginData::new("a@x.com", "tok123"))
        );
    }

    #[tokio::test]
    async fn test_empty_event_name_is_invalid() {
        let channel = InMemoryChannel::new();
        let publisher = publisher(&channel, PublishRetryConfig::default());

        let err = publisher.publish("", &json!({})).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidEvent(_)));
        let err = publisher.publish_or_defer(" ", &json!({})).await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidEvent(_)));
        assert!(channel.published(SESSION_EVENTS_QUEUE).is_empty());
    }

    #[tokio::test]
    async fn test_publish_surfaces_outage() {
        let channel = InMemoryChannel::new();
        channel.set_available(false);
        let publisher = publisher(&channel, PublishRetryConfig::default());

        let err = publisher.publish("UserLoggedIn", &json!({})).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_publish_delivers_after_recovery() {
        let channel = InMemoryChannel::new();
        channel.set_available(false);
        let publisher = publisher(
            &channel,
            PublishRetryConfig {
                max_attempts: 5,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(4),
            },
        );

        let outcome = publisher
            .publish_event_or_defer(SessionEvent::logged_in(&LoginData::new("a@x.com", "tok")))
            .await
            .unwrap();
        assert_eq!(outcome, PublishOutcome::Deferred);

        // First retry at +1s still fails.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(channel.published(SESSION_EVENTS_QUEUE).is_empty());

        // Second retry at +3s succeeds.
        channel.set_available(true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(channel.published(SESSION_EVENTS_QUEUE).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deferred_publish_gives_up() {
        let channel = InMemoryChannel::new();
        channel.set_available(false);
        let publisher = publisher(
            &channel,
            PublishRetryConfig {
                max_attempts: 2,
                initial_delay: Duration::from_secs(1),
                max_delay: Duration::from_secs(1),
            },
        );

        publisher
            .publish_or_defer("UserLoggedIn", &json!({"email": "a@x.com", "token": "t"}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        channel.set_available(true);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(channel.published(SESSION_EVENTS_QUEUE).is_empty());
    }
}
