//! Zoom-bucketed volatile memory cache.
//!
//! Entries are grouped by [`ZoomBucket`]; each bucket holds a bounded number
//! of entries and evicts the oldest-inserted first, deterministically. The
//! whole structure is a reconstructable projection of the persistent tiers
//! and may be dropped at any time without data loss.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::cache::CacheKey;
use crate::clock::SharedClock;
use crate::coord::GeoBounds;
use crate::types::{DataType, Payload};
use crate::zoom::ZoomBucket;

/// Default per-bucket entry budget.
pub const DEFAULT_BUCKET_CAPACITY: usize = 50;

/// One cached entry plus the spatial metadata used for overlap scans.
#[derive(Debug, Clone)]
pub struct CachedRegion {
    pub payload: Arc<Payload>,
    /// Present for bounds-keyed entries; `None` for tile-keyed ones.
    pub bounds: Option<GeoBounds>,
    /// Unix seconds at creation, for TTL checks.
    pub stored_at: i64,
}

#[derive(Default)]
struct Bucket {
    entries: HashMap<CacheKey, CachedRegion>,
    /// Insertion order, oldest first.
    order: VecDeque<CacheKey>,
}

/// Bounded, insertion-ordered cache partitioned by zoom bucket.
pub struct BucketCache {
    capacity_per_bucket: usize,
    ttl: Duration,
    clock: SharedClock,
    buckets: Mutex<HashMap<ZoomBucket, Bucket>>,
}

impl BucketCache {
    pub fn new(capacity_per_bucket: usize, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            capacity_per_bucket: capacity_per_bucket.max(1),
            ttl,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Insert an entry, evicting the oldest-inserted entries if the bucket
    /// exceeds its budget. Replacing an existing key keeps its original
    /// position in the eviction order.
    pub fn insert(&self, key: CacheKey, region: CachedRegion) {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key.bucket()).or_default();

        if bucket.entries.insert(key.clone(), region).is_none() {
            bucket.order.push_back(key);
        }

        while bucket.entries.len() > self.capacity_per_bucket {
            let Some(oldest) = bucket.order.pop_front() else {
                break;
            };
            bucket.entries.remove(&oldest);
        }
    }

    /// Look up an entry. Entries past the TTL are dropped and reported as
    /// misses, keeping the projection consistent with the persistent tiers.
    pub fn get(&self, key: &CacheKey) -> Option<CachedRegion> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.get_mut(&key.bucket())?;
        let region = bucket.entries.get(key)?;
        if self.is_expired(region) {
            bucket.entries.remove(key);
            bucket.order.retain(|k| k != key);
            return None;
        }
        Some(region.clone())
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&self, key: &CacheKey) {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(&key.bucket()) {
            bucket.entries.remove(key);
            bucket.order.retain(|k| k != key);
        }
    }

    /// Find a cached entry of the same type whose bounds fully contain the
    /// requested bounds, preferring the greatest overlap area.
    ///
    /// A linear scan over one bucket; bucket budgets keep this cheap.
    pub fn find_overlapping(
        &self,
        data_type: DataType,
        bounds: &GeoBounds,
        zoom_bucket: ZoomBucket,
    ) -> Option<(CacheKey, CachedRegion)> {
        let buckets = self.buckets.lock();
        let bucket = buckets.get(&zoom_bucket)?;

        let mut best: Option<(f64, &CacheKey, &CachedRegion)> = None;
        for (key, region) in &bucket.entries {
            if key.data_type() != data_type || self.is_expired(region) {
                continue;
            }
            let Some(region_bounds) = &region.bounds else {
                continue;
            };
            if !region_bounds.contains(bounds) {
                continue;
            }
            let overlap = region_bounds.intersection_area(bounds);
            if best.map(|(area, _, _)| overlap > area).unwrap_or(true) {
                best = Some((overlap, key, region));
            }
        }
        best.map(|(_, key, region)| (key.clone(), region.clone()))
    }

    /// Drop every entry of one data type across all buckets.
    pub fn clear_type(&self, data_type: DataType) {
        let mut buckets = self.buckets.lock();
        for bucket in buckets.values_mut() {
            bucket.entries.retain(|k, _| k.data_type() != data_type);
            bucket.order.retain(|k| k.data_type() != data_type);
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.buckets.lock().clear();
    }

    /// Entry count for one bucket.
    pub fn bucket_len(&self, zoom_bucket: ZoomBucket) -> usize {
        self.buckets
            .lock()
            .get(&zoom_bucket)
            .map(|b| b.entries.len())
            .unwrap_or(0)
    }

    /// Entry count across all buckets.
    pub fn total_len(&self) -> usize {
        self.buckets.lock().values().map(|b| b.entries.len()).sum()
    }

    fn is_expired(&self, region: &CachedRegion) -> bool {
        let age = self.clock.now_unix().saturating_sub(region.stored_at);
        age > self.ttl.as_secs() as i64
    }
}
