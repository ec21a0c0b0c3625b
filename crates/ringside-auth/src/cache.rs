//! Token cache store.
//!
//! Each downstream service owns one cache mapping session tokens to the
//! caller identity published by the issuing service. The cache is written by
//! a single background consumer and read by every in-flight request.
//!
//! ## Consistency
//!
//! Entries are immutable `Arc<Identity>` values. A write replaces the whole
//! value under the owning shard's lock, so a concurrent reader sees either
//! the previous entry or the new one, never a mix of both.
//!
//! ## Expiry
//!
//! Entries expire after the configured TTL, or earlier when the session they
//! belong to ends first ([`TokenCache::put_bounded`]). Expired entries are treated as
//! misses on read and are swept periodically via [`TokenCache::cleanup_expired`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ringside_core::Identity;

use crate::config::CacheConfig;

/// Concurrency-safe token → identity store.
///
/// Implementations must never block a caller for longer than a single
/// in-memory map operation.
pub trait TokenCache: Send + Sync {
    /// Looks up a token.
    ///
    /// Returns `None` on a miss or if the entry has expired.
    fn get(&self, token: &str) -> Option<Arc<Identity>>;

    /// Inserts or overwrites the identity for a token.
    ///
    /// Returns the stored `Arc<Identity>` so callers can reuse it.
    fn put(&self, token: String, identity: Identity) -> Arc<Identity>;

    /// Like [`put`](Self::put), but the entry never outlives `lifetime`.
    ///
    /// The entry expires after the shorter of `lifetime` and the cache TTL.
    fn put_bounded(&self, token: String, identity: Identity, lifetime: Duration) -> Arc<Identity>;

    /// Removes a token. Returns `true` if an entry was present.
    fn invalidate(&self, token: &str) -> bool;

    /// Removes every entry.
    fn clear(&self);

    /// Number of entries currently stored (including not yet swept expired ones).
    fn len(&self) -> usize;

    /// Returns `true` if the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cache statistics for monitoring.
    fn stats(&self) -> CacheStats;

    /// Drops expired entries and returns how many were removed.
    fn cleanup_expired(&self) -> usize {
        0
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently in the cache.
    pub size: usize,
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries evicted due to TTL expiration.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct CachedIdentity {
    identity: Arc<Identity>,
    expires_at: Instant,
}

/// In-memory token cache backed by `DashMap` with TTL expiry.
pub struct LocalTokenCache {
    entries: DashMap<String, CachedIdentity>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl LocalTokenCache {
    /// Creates a cache whose entries live for `ttl`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use ringside_auth::cache::LocalTokenCache;
    ///
    /// let cache = LocalTokenCache::new(Duration::from_secs(3600));
    /// ```
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn insert(&self, token: String, identity: Identity, lifetime: Duration) -> Arc<Identity> {
        let identity = Arc::new(identity);
        self.entries.insert(
            token,
            CachedIdentity {
                identity: Arc::clone(&identity),
                expires_at: Instant::now() + lifetime,
            },
        );
        identity
    }
}

impl TokenCache for LocalTokenCache {
    fn get(&self, token: &str) -> Option<Arc<Identity>> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(token) {
            if entry.expires_at > now {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(Arc::clone(&entry.identity));
            }
            drop(entry);
            // A concurrent put may have refreshed the entry since the read guard dropped.
            if self
                .entries
                .remove_if(token, |_, entry| entry.expires_at <= now)
                .is_some()
            {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, token: String, identity: Identity) -> Arc<Identity> {
        self.insert(token, identity, self.ttl)
    }

    fn put_bounded(&self, token: String, identity: Identity, lifetime: Duration) -> Arc<Identity> {
        self.insert(token, identity, lifetime.min(self.ttl))
    }

    fn invalidate(&self, token: &str) -> bool {
        self.entries.remove(token).is_some()
    }

    fn clear(&self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.expires_at <= now {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        }

        removed
    }
}

/// A cache that stores nothing. Every lookup misses.
pub struct NoOpTokenCache;

impl TokenCache for NoOpTokenCache {
    fn get(&self, _token: &str) -> Option<Arc<Identity>> {
        None
    }

    fn put(&self, _token: String, identity: Identity) -> Arc<Identity> {
        Arc::new(identity)
    }

    fn put_bounded(&self, _token: String, identity: Identity, _lifetime: Duration) -> Arc<Identity> {
        Arc::new(identity)
    }

    fn invalidate(&self, _token: &str) -> bool {
        false
    }

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }

    fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

/// Creates the token cache described by `config`.
pub fn create_token_cache(config: &CacheConfig) -> Arc<dyn TokenCache> {
    if config.enabled {
        tracing::info!(ttl_secs = config.ttl.as_secs(), "Token cache enabled");
        Arc::new(LocalTokenCache::new(config.ttl))
    } else {
        tracing::info!("Token cache disabled, every protected request will be verified remotely");
        Arc::new(NoOpTokenCache)
    }
}
