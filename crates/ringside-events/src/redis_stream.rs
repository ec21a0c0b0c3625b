//! Redis Streams event channel.
//!
//! Each envelope is one stream entry with a single `payload` field holding
//! the JSON text. Consumers read through a consumer group:
//!
//! ```text
//! issuer:      XADD auth_events MAXLEN ~ <max_len> * payload {...}
//! downstream:  XGROUP CREATE auth_events <group> 0 MKSTREAM   (once)
//!              XREADGROUP GROUP <group> <consumer> STREAMS auth_events 0   (pending)
//!              XREADGROUP GROUP <group> <consumer> BLOCK 5000 STREAMS auth_events >
//!              XACK auth_events <group> <id>
//! ```
//!
//! A new group starts at `0`, so a service joining late replays whatever
//! history the stream still holds. Replay is in append order, which keeps
//! every logout after its login, and logins carry their session expiry so
//! stale ones are dropped by the consumer. `MAXLEN ~` trims the oldest
//! entries on each append, bounding both memory and replay length.
//!
//! Publishing goes through a `deadpool-redis` pool. Each subscription holds
//! its own dedicated connection because `XREADGROUP ... BLOCK` ties up the
//! connection for the duration of the read.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime, Timeouts};
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply};

use crate::channel::{Delivery, EventSink, EventSource, Subscription};
use crate::config::ChannelConfig;
use crate::error::ChannelError;

/// Stream entry field that carries the envelope.
pub const PAYLOAD_FIELD: &str = "payload";

/// Upper bound for opening a subscription connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Slack added on top of the block window before a read is considered hung.
const READ_SLACK: Duration = Duration::from_secs(5);

/// Redis Streams implementation of [`EventSink`] and [`EventSource`].
#[derive(Clone)]
pub struct RedisStreamChannel {
    pool: Pool,
    client: redis::Client,
    group: String,
    consumer: String,
    block: Duration,
    batch_size: usize,
    max_len: usize,
}

impl RedisStreamChannel {
    /// Creates a channel from configuration.
    ///
    /// No connection is opened here; the first publish or subscribe does.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis URL is invalid or the pool cannot be
    /// created.
    pub fn new(
        config: &ChannelConfig,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Result<Self, ChannelError> {
        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts = Timeouts {
            wait: Some(config.publish_timeout),
            create: Some(config.publish_timeout),
            recycle: Some(config.publish_timeout),
        };

        let mut redis_config = deadpool_redis::Config::from_url(&config.redis_url);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ChannelError::unavailable(format!("failed to create Redis pool: {e}")))?;

        let client = redis::Client::open(config.redis_url.as_str())?;

        Ok(Self {
            pool,
            client,
            group: group.into(),
            consumer: consumer.into(),
            block: config.block,
            batch_size: config.batch_size,
            max_len: config.max_len,
        })
    }

    /// Consumer group this channel reads through.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Consumer name within the group.
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Trim policy applied on every append.
    pub fn trim(&self) -> StreamMaxlen {
        StreamMaxlen::Approx(self.max_len)
    }

    /// Checks that Redis answers `PING`.
    ///
    /// # Errors
    ///
    /// Returns `ChannelError::Unavailable` if Redis cannot be reached.
    pub async fn ping(&self) -> Result<(), ChannelError> {
        let mut conn = self.pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn ensure_group(
        &self,
        conn: &mut MultiplexedConnection,
        queue: &str,
    ) -> Result<(), ChannelError> {
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(queue, &self.group, "0").await;
        match created {
            Ok(()) => {
                tracing::info!(stream = %queue, group = %self.group, "Created consumer group");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EventSink for RedisStreamChannel {
    async fn publish(&self, queue: &str, payload: &str) -> Result<String, ChannelError> {
        let mut conn = self.pool.get().await?;
        let id: String = conn
            .xadd_maxlen(queue, self.trim(), "*", &[(PAYLOAD_FIELD, payload)])
            .await?;
        tracing::debug!(stream = %queue, id = %id, "Appended event to stream");
        Ok(id)
    }
}

#[async_trait]
impl EventSource for RedisStreamChannel {
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, ChannelError> {
        let mut conn = tokio::time::timeout(
            CONNECT_TIMEOUT,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| ChannelError::unavailable("timed out connecting to Redis"))??;

        self.ensure_group(&mut conn, queue).await?;

        tracing::info!(
            stream = %queue,
            group = %self.group,
            consumer = %self.consumer,
            "Subscribed to session event stream"
        );

        Ok(Box::new(RedisStreamSubscription {
            conn,
            queue: queue.to_string(),
            group: self.group.clone(),
            consumer: self.consumer.clone(),
            block: self.block,
            batch_size: self.batch_size,
            pending_cursor: Some("0".to_string()),
        }))
    }
}

struct RedisStreamSubscription {
    conn: MultiplexedConnection,
    queue: String,
    group: String,
    consumer: String,
    block: Duration,
    batch_size: usize,
    /// `Some(id)` while replaying this consumer's pending entries after `id`;
    /// `None` once they are exhausted and new entries are read.
    pending_cursor: Option<String>,
}

impl RedisStreamSubscription {
    async fn read(&mut self, id: &str, block: bool) -> Result<Vec<StreamId>, ChannelError> {
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch_size);
        if block {
            options = options.block(self.block.as_millis() as usize);
        }

        let reply: Option<StreamReadReply> = tokio::time::timeout(
            self.block + READ_SLACK,
            self.conn.xread_options(&[&self.queue], &[id], &options),
        )
        .await
        .map_err(|_| ChannelError::unavailable("stream read timed out"))??;

        Ok(reply
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default())
    }
}

fn to_delivery(entry: StreamId) -> Delivery {
    let payload = entry
        .get::<String>(PAYLOAD_FIELD)
        .map(String::into_bytes)
        .unwrap_or_default();
    Delivery {
        id: entry.id,
        payload,
    }
}

#[async_trait]
impl Subscription for RedisStreamSubscription {
    async fn next_batch(&mut self) -> Result<Vec<Delivery>, ChannelError> {
        if let Some(cursor) = self.pending_cursor.clone() {
            let entries = self.read(&cursor, false).await?;
            match entries.last() {
                Some(last) => {
                    self.pending_cursor = Some(last.id.clone());
                    tracing::debug!(count = entries.len(), "Replaying pending events");
                    return Ok(entries.into_iter().map(to_delivery).collect());
                }
                None => self.pending_cursor = None,
            }
        }

        let entries = self.read(">", true).await?;
        Ok(entries.into_iter().map(to_delivery).collect())
    }

    async fn ack(&mut self, id: &str) -> Result<(), ChannelError> {
        let _: i64 = self.conn.xack(&self.queue, &self.group, &[id]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_new_does_not_connect() {
        let config = ChannelConfig {
            redis_url: "redis://127.0.0.1:1".to_string(),
            ..ChannelConfig::default()
        };
        let channel = RedisStreamChannel::new(&config, "wrestlers", "host-1").unwrap();
        assert_eq!(channel.group(), "wrestlers");
        assert_eq!(channel.consumer(), "host-1");
    }

    #[test]
    fn test_publish_trims_to_configured_length() {
        let config = ChannelConfig {
            max_len: 500,
            ..ChannelConfig::default()
        };
        let channel = RedisStreamChannel::new(&config, "g", "c").unwrap();
        assert!(matches!(channel.trim(), StreamMaxlen::Approx(500)));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = ChannelConfig {
            redis_url: "not-a-url".to_string(),
            ..ChannelConfig::default()
        };
        assert!(RedisStreamChannel::new(&config, "g", "c").is_err());
    }

    #[test]
    fn test_entry_without_payload_is_empty_delivery() {
        let entry = StreamId {
            id: "1-0".to_string(),
            map: HashMap::new(),
        };
        let delivery = to_delivery(entry);
        assert_eq!(delivery.id, "1-0");
        assert!(delivery.payload.is_empty());
    }

    #[test]
    fn test_entry_payload_is_extracted() {
        let mut map = HashMap::new();
        map.insert(
            PAYLOAD_FIELD.to_string(),
            redis::Value::BulkString(br#"{"event_name":"X","data":{}}"#.to_vec()),
        );
        let delivery = to_delivery(StreamId {
            id: "2-0".to_string(),
            map,
        });
        assert_eq!(delivery.payload, br#"{"event_name":"X","data":{}}"#.to_vec());
    }
}
