//! In-memory cache tier with LRU eviction using moka.
//!
//! Moka's lock-free internals make the cache safe to touch from async
//! contexts without blocking the Tokio runtime. Eviction is automatic when
//! the entry budget is exceeded; TTL expiry is enforced lazily against the
//! injected [`Clock`] so tests can cross a 7-day TTL without sleeping (moka's
//! own `time_to_live` acts as a real-time backstop).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::clock::SharedClock;
use crate::types::{DataType, Payload};

use super::key::CacheKey;

/// A payload plus the metadata tracked alongside it in memory.
///
/// `stored_at` is fixed at creation: reads refresh LRU recency but never the
/// TTL origin, and disk-to-memory backfill preserves the original timestamp.
#[derive(Debug)]
pub struct StoredEntry {
    pub payload: Payload,
    /// Unix seconds at original creation.
    pub stored_at: i64,
    /// Where the payload came from (provider name, `"store"`, ...).
    pub source: Option<String>,
}

/// Process-wide memory cache for map payloads.
pub struct MemoryCache {
    cache: Cache<CacheKey, Arc<StoredEntry>>,
    ttl: Duration,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    /// Create a memory cache bounded to `max_items` entries.
    pub fn new(max_items: u64, ttl: Duration, clock: SharedClock) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_items)
            .time_to_live(ttl)
            .build();
        Self {
            cache,
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a cached entry, refreshing its LRU recency.
    ///
    /// An entry whose absolute age exceeds the TTL is invalidated and
    /// reported as a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<StoredEntry>> {
        match self.cache.get(key).await {
            Some(entry) => {
                if self.is_expired(&entry) {
                    self.cache.invalidate(key).await;
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                } else {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    Some(entry)
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a fresh payload, stamping `stored_at` from the clock.
    pub async fn store(&self, key: CacheKey, payload: Payload, source: Option<String>) {
        let entry = StoredEntry {
            payload,
            stored_at: self.clock.now_unix(),
            source,
        };
        self.insert(key, Arc::new(entry)).await;
    }

    /// Insert an entry with an existing timestamp (disk backfill path).
    pub async fn insert(&self, key: CacheKey, entry: Arc<StoredEntry>) {
        self.cache.insert(key, entry).await;
        self.cache.run_pending_tasks().await;
    }

    /// Whether a live, unexpired entry exists.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        match self.cache.get(key).await {
            Some(entry) => !self.is_expired(&entry),
            None => false,
        }
    }

    /// Remove one entry.
    pub async fn remove(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
    }

    /// Drop every entry of one data type.
    pub async fn clear_type(&self, data_type: DataType) {
        let doomed: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|(k, _)| k.data_type() == data_type)
            .map(|(k, _)| (*k).clone())
            .collect();
        for key in doomed {
            self.cache.invalidate(&key).await;
        }
        self.cache.run_pending_tasks().await;
    }

    /// Drop everything.
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
    }

    /// Remove entries whose absolute age exceeds the TTL.
    ///
    /// Returns the number of entries dropped. Lookup-time expiry already
    /// covers correctness; the sweep just reclaims memory early.
    pub async fn sweep_expired(&self) -> usize {
        let doomed: Vec<CacheKey> = self
            .cache
            .iter()
            .filter(|(_, entry)| self.is_expired(entry))
            .map(|(k, _)| (*k).clone())
            .collect();
        let count = doomed.len();
        for key in doomed {
            self.cache.invalidate(&key).await;
        }
        self.cache.run_pending_tasks().await;
        count
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn is_expired(&self, entry: &StoredEntry) -> bool {
        let age = self.clock.now_unix().saturating_sub(entry.stored_at);
        age > self.ttl.as_secs() as i64
    }
}
