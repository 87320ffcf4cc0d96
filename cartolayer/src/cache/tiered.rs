//! Two-tier cache facade.
//!
//! Lookups try the memory tier first, then disk; disk hits are backfilled
//! into memory with their original `stored_at` so the absolute TTL is
//! preserved across tiers.

use std::sync::Arc;

use crate::clock::SharedClock;
use crate::types::{DataType, Payload};

use super::disk::DiskCache;
use super::key::CacheKey;
use super::memory::{MemoryCache, StoredEntry};
use super::{CacheError, TileCacheConfig, TileCacheStats};

/// Tiered memory + disk cache for map payloads.
pub struct TileCache {
    memory: MemoryCache,
    disk: DiskCache,
    clock: SharedClock,
}

impl TileCache {
    /// Open the cache with the given configuration.
    pub fn open(config: TileCacheConfig, clock: SharedClock) -> Result<Self, CacheError> {
        let memory = MemoryCache::new(config.memory_max_items, config.ttl, clock.clone());
        let disk = DiskCache::open(
            config.disk_root,
            config.disk_max_bytes,
            config.ttl,
            config.max_concurrent_io,
            clock.clone(),
        )?;
        Ok(Self {
            memory,
            disk,
            clock,
        })
    }

    /// Whether a live entry exists in either tier.
    pub async fn has(&self, key: &CacheKey) -> bool {
        if self.memory.contains(key).await {
            return true;
        }
        self.disk.contains(key).await
    }

    /// Look up a payload: memory first, then disk with memory backfill.
    pub async fn get(&self, key: &CacheKey) -> Option<Arc<StoredEntry>> {
        if let Some(entry) = self.memory.get(key).await {
            return Some(entry);
        }
        let (payload, sidecar) = self.disk.get(key).await?;
        let entry = Arc::new(StoredEntry {
            payload,
            stored_at: sidecar.stored_at,
            source: sidecar.source,
        });
        self.memory.insert(key.clone(), Arc::clone(&entry)).await;
        Some(entry)
    }

    /// Store a payload in both tiers.
    ///
    /// Re-storing the same key replaces the entry; `stored_at` restarts,
    /// which matches TTL-from-creation semantics for the new value.
    pub async fn put(
        &self,
        key: &CacheKey,
        payload: Payload,
        source: Option<String>,
    ) -> Result<(), CacheError> {
        let stored_at = self.clock.now_unix();
        self.disk.put(key, &payload, stored_at, source.clone()).await?;
        self.memory
            .insert(
                key.clone(),
                Arc::new(StoredEntry {
                    payload,
                    stored_at,
                    source,
                }),
            )
            .await;
        Ok(())
    }

    /// Remove one entry from both tiers.
    pub async fn remove(&self, key: &CacheKey) {
        self.memory.remove(key).await;
        self.disk.remove(key).await;
    }

    /// Drop every entry of one data type from both tiers.
    pub async fn clear_type(&self, data_type: DataType) {
        self.memory.clear_type(data_type).await;
        self.disk.clear_type(data_type).await;
    }

    /// Drop everything from both tiers.
    pub async fn clear_all(&self) {
        self.memory.clear().await;
        self.disk.clear().await;
    }

    /// Remove expired entries from both tiers; returns total removed.
    pub async fn sweep_expired(&self) -> usize {
        self.memory.sweep_expired().await + self.disk.sweep_expired().await
    }

    /// Enforce the disk byte budget; returns `(entries_removed, bytes_freed)`.
    pub async fn enforce_disk_budget(&self) -> (usize, u64) {
        self.disk.enforce_budget().await
    }

    /// Current statistics.
    pub async fn stats(&self) -> TileCacheStats {
        TileCacheStats {
            memory_hits: self.memory.hits(),
            memory_misses: self.memory.misses(),
            memory_entries: self.memory.entry_count(),
            disk_entries: self.disk.entry_count().await as u64,
            disk_size_bytes: self.disk.size_bytes().await,
            disk_max_bytes: self.disk.max_bytes(),
        }
    }
}
