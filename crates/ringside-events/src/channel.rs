//! Event channel abstraction.
//!
//! The channel is a durable, at-least-once queue. Publishers append
//! envelopes to a named queue; each consumer group receives every envelope
//! and must acknowledge it once processed. Deliveries that were read but
//! never acknowledged are handed out again after the consumer reconnects.

use async_trait::async_trait;

use crate::error::ChannelError;

/// One message read from the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-assigned message id, used for acknowledgement.
    pub id: String,

    /// Raw envelope bytes. Empty when the entry carried no payload.
    pub payload: Vec<u8>,
}

/// Write side of the channel.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Appends `payload` to `queue` and returns the assigned message id.
    async fn publish(&self, queue: &str, payload: &str) -> Result<String, ChannelError>;
}

/// Read side of the channel.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Opens a subscription on `queue`.
    ///
    /// A fresh subscription first yields deliveries that were previously
    /// read by this consumer but never acknowledged, then new ones.
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, ChannelError>;
}

/// An open subscription.
///
/// Any error means the subscription is broken; the caller drops it and
/// subscribes again.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next batch of deliveries.
    ///
    /// Returns an empty batch when nothing arrived within the read window.
    async fn next_batch(&mut self) -> Result<Vec<Delivery>, ChannelError>;

    /// Acknowledges a delivery so it is never handed out again.
    async fn ack(&mut self, id: &str) -> Result<(), ChannelError>;
}
