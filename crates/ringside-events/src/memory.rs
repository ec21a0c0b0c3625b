//! In-process event channel.
//!
//! Behaves like a single Redis consumer group: every entry is delivered
//! once, stays pending until acknowledged, and pending entries are replayed
//! to the next subscription. Outages can be simulated with
//! [`InMemoryChannel::set_available`], [`InMemoryChannel::disconnect`] and
//! [`InMemoryChannel::fail_next_subscribes`].

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::channel::{Delivery, EventSink, EventSource, Subscription};
use crate::error::ChannelError;

const DEFAULT_BLOCK: Duration = Duration::from_millis(100);
const DEFAULT_BATCH: usize = 32;

#[derive(Default)]
struct Queue {
    entries: Vec<Vec<u8>>,
    /// Index of the first entry never handed out.
    delivered: usize,
    /// Indexes handed out but not yet acknowledged.
    pending: BTreeSet<usize>,
}

struct State {
    queues: HashMap<String, Queue>,
    available: bool,
    generation: u64,
    failing_subscribes: u32,
    subscribes: u64,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    block: Duration,
    batch_size: usize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`EventSink`] and [`EventSource`].
#[derive(Clone)]
pub struct InMemoryChannel {
    inner: Arc<Inner>,
}

impl Default for InMemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChannel {
    /// Creates an available, empty channel.
    pub fn new() -> Self {
        Self::with_block(DEFAULT_BLOCK)
    }

    /// Creates a channel whose reads wait at most `block` for new entries.
    pub fn with_block(block: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    queues: HashMap::new(),
                    available: true,
                    generation: 0,
                    failing_subscribes: 0,
                    subscribes: 0,
                }),
                notify: Notify::new(),
                block,
                batch_size: DEFAULT_BATCH,
            }),
        }
    }

    /// Makes the broker reachable or unreachable.
    ///
    /// Going down also breaks every open subscription.
    pub fn set_available(&self, available: bool) {
        {
            let mut state = self.inner.lock();
            state.available = available;
            if !available {
                state.generation += 1;
            }
        }
        self.inner.notify.notify_waiters();
    }

    /// Breaks every open subscription without taking the broker down.
    pub fn disconnect(&self) {
        self.inner.lock().generation += 1;
        self.inner.notify.notify_waiters();
    }

    /// Makes the next `n` subscribe attempts fail.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.inner.lock().failing_subscribes = n;
    }

    /// Raw payloads appended to `queue`, oldest first.
    pub fn published(&self, queue: &str) -> Vec<String> {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map(|q| {
                q.entries
                    .iter()
                    .map(|e| String::from_utf8_lossy(e).into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entries handed out on `queue` but not yet acknowledged.
    pub fn pending_count(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .queues
            .get(queue)
            .map_or(0, |q| q.pending.len())
    }

    /// Number of successful subscribe calls so far.
    pub fn subscribe_count(&self) -> u64 {
        self.inner.lock().subscribes
    }

    /// Appends a raw payload, bypassing availability checks.
    pub fn inject_raw(&self, queue: &str, payload: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .entries
            .push(payload.into());
        self.inner.notify.notify_waiters();
    }
}

fn entry_id(index: usize) -> String {
    format!("{}-0", index + 1)
}

fn entry_index(id: &str) -> Option<usize> {
    id.strip_suffix("-0")?.parse::<usize>().ok()?.checked_sub(1)
}

#[async_trait]
impl EventSink for InMemoryChannel {
    async fn publish(&self, queue: &str, payload: &str) -> Result<String, ChannelError> {
        let id = {
            let mut state = self.inner.lock();
            if !state.available {
                return Err(ChannelError::unavailable("broker is down"));
            }
            let queue = state.queues.entry(queue.to_string()).or_default();
            queue.entries.push(payload.as_bytes().to_vec());
            entry_id(queue.entries.len() - 1)
        };
        self.inner.notify.notify_waiters();
        Ok(id)
    }
}

#[async_trait]
impl EventSource for InMemoryChannel {
    async fn subscribe(&self, queue: &str) -> Result<Box<dyn Subscription>, ChannelError> {
        let mut state = self.inner.lock();
        if !state.available {
            return Err(ChannelError::unavailable("broker is down"));
        }
        if state.failing_subscribes > 0 {
            state.failing_subscribes -= 1;
            return Err(ChannelError::unavailable("subscribe refused"));
        }
        state.subscribes += 1;
        state.queues.entry(queue.to_string()).or_default();

        Ok(Box::new(InMemorySubscription {
            inner: Arc::clone(&self.inner),
            queue: queue.to_string(),
            generation: state.generation,
            replay_after: Some(None),
        }))
    }
}

struct InMemorySubscription {
    inner: Arc<Inner>,
    queue: String,
    generation: u64,
    /// `Some(cursor)` while replaying pending entries after `cursor`.
    replay_after: Option<Option<usize>>,
}

impl InMemorySubscription {
    fn check(&self, state: &State) -> Result<(), ChannelError> {
        if !state.available || state.generation != self.generation {
            return Err(ChannelError::unavailable("connection lost"));
        }
        Ok(())
    }

    fn take_batch(&mut self) -> Result<Option<Vec<Delivery>>, ChannelError> {
        let mut state = self.inner.lock();
        self.check(&state)?;
        let batch_size = self.inner.batch_size;
        let queue = state.queues.entry(self.queue.clone()).or_default();

        if let Some(after) = self.replay_after {
            let replay: Vec<usize> = queue
                .pending
                .iter()
                .copied()
                .filter(|i| after.is_none_or(|a| *i > a))
                .take(batch_size)
                .collect();
            match replay.last() {
                Some(last) => {
                    self.replay_after = Some(Some(*last));
                    return Ok(Some(
                        replay
                            .into_iter()
                            .map(|i| Delivery {
                                id: entry_id(i),
                                payload: queue.entries[i].clone(),
                            })
                            .collect(),
                    ));
                }
                None => self.replay_after = None,
            }
        }

        if queue.delivered == queue.entries.len() {
            return Ok(None);
        }

        let end = (queue.delivered + batch_size).min(queue.entries.len());
        let batch = (queue.delivered..end)
            .map(|i| {
                queue.pending.insert(i);
                Delivery {
                    id: entry_id(i),
                    payload: queue.entries[i].clone(),
                }
            })
            .collect();
        queue.delivered = end;
        Ok(Some(batch))
    }
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next_batch(&mut self) -> Result<Vec<Delivery>, ChannelError> {
        let inner = Arc::clone(&self.inner);
        let notified = inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(batch) = self.take_batch()? {
            return Ok(batch);
        }

        let _ = tokio::time::timeout(inner.block, notified).await;
        Ok(self.take_batch()?.unwrap_or_default())
    }

    async fn ack(&mut self, id: &str) -> Result<(), ChannelError> {
        let mut state = self.inner.lock();
        self.check(&state)?;
        if let (Some(index), Some(queue)) = (entry_index(id), state.queues.get_mut(&self.queue)) {
            queue.pending.remove(&index);
        }
        Ok(())
    }
}
