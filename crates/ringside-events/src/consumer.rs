//! Token cache consumer.
//!
//! One consumer task per downstream process keeps the local token cache in
//! step with the issuing service:
//!
//! ```text
//! subscribe ──► next_batch ──► apply (cache mutation) ──► ack ──┐
//!     ▲              ▲                                          │
//!     │              └──────────────────────────────────────────┘
//!     └── backoff (1s, 2s, 4s … max) ◄── any channel error
//! ```
//!
//! A delivery is acknowledged only after its cache mutation has been
//! applied. Deliveries that cannot be decoded and events this consumer does
//! not understand are acknowledged as no-ops so they never wedge the queue.
//! A login is cached for at most its session's remaining lifetime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use ringside_auth::TokenCache;
use ringside_core::{LoginData, SessionEvent, SessionEventKind, token_fingerprint};
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::{EventSource, Subscription};
use crate::config::{ChannelConfig, ReconnectConfig, next_backoff};
use crate::error::ChannelError;

/// What [`TokenCacheConsumer::apply`] did with a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The cache was updated.
    Applied,
    /// A well-formed event this consumer does not act on, or a login
    /// whose session already ended.
    Ignored,
    /// The payload could not be decoded.
    Malformed,
}

/// Consumer counters.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    applied: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
    reconnects: AtomicU64,
}

/// Point-in-time copy of [`ConsumerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStatsSnapshot {
    /// Deliveries that mutated the cache.
    pub applied: u64,
    /// Well-formed deliveries that were not acted on.
    pub ignored: u64,
    /// Deliveries whose payload could not be decoded.
    pub malformed: u64,
    /// Subscribe attempts after a failure or lost connection.
    pub reconnects: u64,
}

impl ConsumerStats {
    /// Returns a snapshot of all counters.
    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: ApplyOutcome) {
        let (counter, label) = match outcome {
            ApplyOutcome::Applied => (&self.applied, "applied"),
            ApplyOutcome::Ignored => (&self.ignored, "ignored"),
            ApplyOutcome::Malformed => (&self.malformed, "malformed"),
        };
        counter.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("session_events_consumed_total", "outcome" => label).increment(1);
    }
}

/// Background consumer that applies session events to a [`TokenCache`].
pub struct TokenCacheConsumer {
    source: Arc<dyn EventSource>,
    cache: Arc<dyn TokenCache>,
    queue: String,
    reconnect: ReconnectConfig,
    stats: Arc<ConsumerStats>,
}

impl TokenCacheConsumer {
    /// Creates a consumer reading `queue` from `source` into `cache`.
    pub fn new(
        source: Arc<dyn EventSource>,
        cache: Arc<dyn TokenCache>,
        queue: impl Into<String>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            source,
            cache,
            queue: queue.into(),
            reconnect,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    /// Creates a consumer using the stream and backoff from `config`.
    pub fn from_config(
        source: Arc<dyn EventSource>,
        cache: Arc<dyn TokenCache>,
        config: &ChannelConfig,
    ) -> Self {
        Self::new(source, cache, config.stream.clone(), config.reconnect.clone())
    }

    /// Shared handle to this consumer's counters.
    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Spawns the consumer on the current runtime.
    ///
    /// The task runs until `shutdown` is cancelled.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Runs the subscribe/consume loop until `shutdown` is cancelled.
    ///
    /// Subscribe failures and lost connections are retried with bounded
    /// exponential backoff; the delay resets after every successful
    /// subscribe.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(stream = %self.queue, "Starting token cache consumer");
        let mut backoff = self.reconnect.initial_delay;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let subscribed = tokio::select! {
                _ = shutdown.cancelled() => break,
                subscribed = self.source.subscribe(&self.queue) => subscribed,
            };

            match subscribed {
                Ok(subscription) => {
                    backoff = self.reconnect.initial_delay;
                    match self.consume(subscription, &shutdown).await {
                        Ok(()) => break,
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                backoff_ms = backoff.as_millis() as u64,
                                "Session event subscription lost, reconnecting"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "Failed to subscribe to session events, retrying"
                    );
                }
            }

            self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("session_events_consumer_reconnects_total").increment(1);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff, self.reconnect.max_delay);
        }

        tracing::info!(stream = %self.queue, "Token cache consumer stopped");
    }

    /// Drives one subscription. Returns `Ok(())` on shutdown.
    async fn consume(
        &self,
        mut subscription: Box<dyn Subscription>,
        shutdown: &CancellationToken,
    ) -> Result<(), ChannelError> {
        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                batch = subscription.next_batch() => batch?,
            };

            for delivery in batch {
                let outcome = self.apply(&delivery.payload);
                if outcome == ApplyOutcome::Malformed {
                    tracing::warn!(id = %delivery.id, "Acknowledging undecodable session event");
                }
                subscription.ack(&delivery.id).await?;
            }
        }
    }

    /// Applies one raw envelope to the cache.
    ///
    /// Never suspends and never fails; the outcome is recorded in the stats.
    pub fn apply(&self, payload: &[u8]) -> ApplyOutcome {
        let outcome = match SessionEvent::from_slice(payload).and_then(|event| event.kind()) {
            Ok(SessionEventKind::LoggedIn(login)) => self.apply_login(login),
            Ok(SessionEventKind::LoggedOut(logout)) => {
                let removed = self.cache.invalidate(&logout.token);
                tracing::debug!(
                    token = %token_fingerprint(&logout.token),
                    removed,
                    "Dropping session token"
                );
                ApplyOutcome::Applied
            }
            Ok(SessionEventKind::Unknown(name)) => {
                tracing::debug!(event = %name, "Ignoring unknown session event");
                ApplyOutcome::Ignored
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed session event");
                ApplyOutcome::Malformed
            }
        };

        self.stats.record(outcome);
        outcome
    }

    /// Caches a login for at most the session's remaining lifetime.
    ///
    /// Logins whose session already ended are skipped, so a late or
    /// replayed event never revives a token the issuer no longer accepts.
    fn apply_login(&self, login: LoginData) -> ApplyOutcome {
        let identity = login.identity();
        match login.remaining_at(OffsetDateTime::now_utc()) {
            Some(remaining) if remaining.is_zero() => {
                tracing::debug!(
                    token = %token_fingerprint(&login.token),
                    user_id = %identity.id,
                    "Skipping login for an expired session"
                );
                ApplyOutcome::Ignored
            }
            Some(remaining) => {
                tracing::debug!(
                    token = %token_fingerprint(&login.token),
                    user_id = %identity.id,
                    remaining_secs = remaining.as_secs(),
                    "Caching session token"
                );
                self.cache.put_bounded(login.token, identity, remaining);
                ApplyOutcome::Applied
            }
            None => {
                tracing::debug!(
                    token = %token_fingerprint(&login.token),
                    user_id = %identity.id,
                    "Caching session token"
                );
                self.cache.put(login.token, identity);
                ApplyOutcome::Applied
            }
        }
    }
}

/// Spawns a task that periodically drops expired cache entries.
pub fn spawn_cache_sweeper(
    cache: Arc<dyn TokenCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.cleanup_expired();
                    if removed > 0 {
                        tracing::debug!(removed, remaining = cache.len(), "Swept expired tokens");
                    }
                }
            }
        }
    })
}
