//! Disk cache tier.
//!
//! Each entry is a payload file plus a `.meta` sidecar under the cache root,
//! named by the SHA-256 of the composite key. Blocking filesystem work runs
//! on `spawn_blocking`, gated by a semaphore so many concurrent lookups
//! cannot overwhelm the disk.
//!
//! Expiry is lazy: an entry found expired (or unreadable) during lookup is
//! deleted and reported as a miss. A periodic sweep and a size-budget
//! enforcement pass cover entries that are never looked up again. Sidecar
//! bytes are excluded from the budget sum; payload bytes dominate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::types::{DataType, Payload, PayloadKind};

use super::key::CacheKey;
use super::CacheError;

/// Fraction of the byte budget to trim down to when the budget is exceeded.
const TRIM_RATIO: f64 = 0.8;

/// Sidecar metadata stored next to each payload file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sidecar {
    /// Unix seconds at original creation; never refreshed by reads.
    pub stored_at: i64,
    pub data_type: DataType,
    pub kind: PayloadKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Payload size in bytes, counted against the disk budget.
    pub size_bytes: u64,
}

/// Disk-backed cache tier.
pub struct DiskCache {
    root: PathBuf,
    max_bytes: u64,
    ttl: Duration,
    io: Arc<Semaphore>,
    clock: SharedClock,
}

impl DiskCache {
    /// Open (creating if needed) a disk cache rooted at `root`.
    ///
    /// # Errors
    ///
    /// Fails only if the root directory cannot be created.
    pub fn open(
        root: PathBuf,
        max_bytes: u64,
        ttl: Duration,
        max_concurrent_io: usize,
        clock: SharedClock,
    ) -> Result<Self, CacheError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            max_bytes,
            ttl,
            io: Arc::new(Semaphore::new(max_concurrent_io.max(1))),
            clock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.bin", key.file_stem()))
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.meta", key.file_stem()))
    }

    /// Look up a payload.
    ///
    /// Expired or corrupt entries are deleted and reported as a miss;
    /// storage-layer errors never propagate to the caller.
    pub async fn get(&self, key: &CacheKey) -> Option<(Payload, Sidecar)> {
        let data_path = self.data_path(key);
        let meta_path = self.meta_path(key);
        let now = self.clock.now_unix();
        let ttl_secs = self.ttl.as_secs() as i64;

        let _permit = self.io.acquire().await.ok()?;
        let result = tokio::task::spawn_blocking(move || {
            let meta_bytes = match std::fs::read(&meta_path) {
                Ok(bytes) => bytes,
                Err(_) => return None,
            };
            let sidecar: Sidecar = match serde_json::from_slice(&meta_bytes) {
                Ok(sidecar) => sidecar,
                Err(_) => {
                    // Corrupt sidecar: delete the pair, treat as a miss.
                    remove_pair(&data_path, &meta_path);
                    return None;
                }
            };
            if now.saturating_sub(sidecar.stored_at) > ttl_secs {
                remove_pair(&data_path, &meta_path);
                return None;
            }
            let payload_bytes = match std::fs::read(&data_path) {
                Ok(bytes) => bytes,
                Err(_) => {
                    remove_pair(&data_path, &meta_path);
                    return None;
                }
            };
            match Payload::decode(sidecar.kind, payload_bytes) {
                Ok(payload) => Some((payload, sidecar)),
                Err(_) => {
                    remove_pair(&data_path, &meta_path);
                    None
                }
            }
        })
        .await;

        match result {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "disk cache read task failed");
                None
            }
        }
    }

    /// Whether a live, unexpired entry exists (payload is not read).
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let meta_path = self.meta_path(key);
        let now = self.clock.now_unix();
        let ttl_secs = self.ttl.as_secs() as i64;

        let Ok(_permit) = self.io.acquire().await else {
            return false;
        };
        tokio::task::spawn_blocking(move || {
            let Ok(bytes) = std::fs::read(&meta_path) else {
                return false;
            };
            match serde_json::from_slice::<Sidecar>(&bytes) {
                Ok(sidecar) => now.saturating_sub(sidecar.stored_at) <= ttl_secs,
                Err(_) => false,
            }
        })
        .await
        .unwrap_or(false)
    }

    /// Write a payload and its sidecar.
    ///
    /// The payload file lands first; the sidecar write makes the entry
    /// visible to readers.
    pub async fn put(
        &self,
        key: &CacheKey,
        payload: &Payload,
        stored_at: i64,
        source: Option<String>,
    ) -> Result<(), CacheError> {
        let encoded = payload.encode()?;
        let sidecar = Sidecar {
            stored_at,
            data_type: key.data_type(),
            kind: payload.kind(),
            source,
            size_bytes: encoded.len() as u64,
        };
        let meta_bytes = serde_json::to_vec(&sidecar)?;
        let data_path = self.data_path(key);
        let meta_path = self.meta_path(key);

        let _permit = self
            .io
            .acquire()
            .await
            .map_err(|_| CacheError::ShuttingDown)?;
        tokio::task::spawn_blocking(move || {
            std::fs::write(&data_path, &encoded)?;
            std::fs::write(&meta_path, &meta_bytes)
        })
        .await
        .map_err(|e| CacheError::Background(e.to_string()))??;
        Ok(())
    }

    /// Delete one entry; missing files are not an error.
    pub async fn remove(&self, key: &CacheKey) {
        let data_path = self.data_path(key);
        let meta_path = self.meta_path(key);
        if self.io.acquire().await.is_ok() {
            let _ = tokio::task::spawn_blocking(move || remove_pair(&data_path, &meta_path)).await;
        }
    }

    /// Total payload bytes currently stored (sidecars excluded).
    pub async fn size_bytes(&self) -> u64 {
        self.scan()
            .await
            .iter()
            .map(|(_, sidecar)| sidecar.size_bytes)
            .sum()
    }

    /// Number of live entries.
    pub async fn entry_count(&self) -> usize {
        self.scan().await.len()
    }

    /// Delete expired entries. Returns the number removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.now_unix();
        let ttl_secs = self.ttl.as_secs() as i64;
        let expired: Vec<PathBuf> = self
            .scan()
            .await
            .into_iter()
            .filter(|(_, sidecar)| now.saturating_sub(sidecar.stored_at) > ttl_secs)
            .map(|(stem, _)| stem)
            .collect();

        let count = expired.len();
        if count > 0 {
            debug!(count, "sweeping expired disk cache entries");
            self.remove_stems(expired).await;
        }
        count
    }

    /// Enforce the byte budget.
    ///
    /// When the payload total exceeds the budget, oldest-by-`stored_at`
    /// entries are deleted until the total is at or under
    /// `TRIM_RATIO × budget`. Returns `(entries_removed, bytes_freed)`.
    pub async fn enforce_budget(&self) -> (usize, u64) {
        let mut entries = self.scan().await;
        let total: u64 = entries.iter().map(|(_, s)| s.size_bytes).sum();
        if total <= self.max_bytes {
            return (0, 0);
        }

        let target = (self.max_bytes as f64 * TRIM_RATIO) as u64;
        entries.sort_by_key(|(_, s)| s.stored_at);

        let mut remaining = total;
        let mut doomed = Vec::new();
        let mut freed = 0u64;
        for (stem, sidecar) in entries {
            if remaining <= target {
                break;
            }
            remaining -= sidecar.size_bytes;
            freed += sidecar.size_bytes;
            doomed.push(stem);
        }

        let count = doomed.len();
        debug!(count, freed, "trimming disk cache to budget");
        self.remove_stems(doomed).await;
        (count, freed)
    }

    /// Delete every entry of one data type.
    pub async fn clear_type(&self, data_type: DataType) -> usize {
        let doomed: Vec<PathBuf> = self
            .scan()
            .await
            .into_iter()
            .filter(|(_, sidecar)| sidecar.data_type == data_type)
            .map(|(stem, _)| stem)
            .collect();
        let count = doomed.len();
        self.remove_stems(doomed).await;
        count
    }

    /// Delete everything under the cache root.
    pub async fn clear(&self) {
        let doomed: Vec<PathBuf> = self.scan().await.into_iter().map(|(stem, _)| stem).collect();
        self.remove_stems(doomed).await;
    }

    /// List `(path-stem, sidecar)` pairs for all readable entries.
    ///
    /// Unreadable sidecars are skipped (and logged); they are reclaimed by
    /// the lookup path or the next sweep that touches them.
    async fn scan(&self) -> Vec<(PathBuf, Sidecar)> {
        let root = self.root.clone();
        let Ok(_permit) = self.io.acquire().await else {
            return Vec::new();
        };
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            let entries = match std::fs::read_dir(&root) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(error = %e, root = %root.display(), "disk cache scan failed");
                    return out;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("meta") {
                    continue;
                }
                match std::fs::read(&path)
                    .ok()
                    .and_then(|bytes| serde_json::from_slice::<Sidecar>(&bytes).ok())
                {
                    Some(sidecar) => {
                        let stem = path.with_extension("");
                        out.push((stem, sidecar));
                    }
                    None => {
                        debug!(path = %path.display(), "skipping unreadable sidecar");
                    }
                }
            }
            out
        })
        .await
        .unwrap_or_default()
    }

    async fn remove_stems(&self, stems: Vec<PathBuf>) {
        if stems.is_empty() {
            return;
        }
        if self.io.acquire().await.is_ok() {
            let _ = tokio::task::spawn_blocking(move || {
                for stem in stems {
                    remove_pair(&stem.with_extension("bin"), &stem.with_extension("meta"));
                }
            })
            .await;
        }
    }
}

fn remove_pair(data_path: &Path, meta_path: &Path) {
    let _ = std::fs::remove_file(data_path);
    let _ = std::fs::remove_file(meta_path);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::clock::ManualClock;
    use crate::coord::TileCoord;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    fn test_key(x: u32) -> CacheKey {
        CacheKey::for_tile(DataType::Tile, TileCoord::new(14, x, 7))
    }

    fn open_cache(max_bytes: u64) -> (DiskCache, Arc<ManualClock>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new());
        let cache = DiskCache::open(
            dir.path().to_path_buf(),
            max_bytes,
            WEEK,
            16,
            clock.clone(),
        )
        .unwrap();
        (cache, clock, dir)
    }

    #[tokio::test]
    async fn roundtrip_preserves_bytes() {
        let (cache, clock, _dir) = open_cache(10_000_000);
        let key = test_key(1);
        let payload = Payload::Raster(vec![0xFF, 0xD8, 0xFF, 0xE0]);

        cache.put(&key, &payload, clock.now_unix(), None).await.unwrap();

        let (read_back, sidecar) = cache.get(&key).await.unwrap();
        assert_eq!(read_back, payload);
        assert_eq!(sidecar.size_bytes, 4);
        assert_eq!(sidecar.data_type, DataType::Tile);
    }

    #[tokio::test]
    async fn miss_on_absent_key() {
        let (cache, _clock, _dir) = open_cache(10_000_000);
        assert!(cache.get(&test_key(1)).await.is_none());
        assert!(!cache.contains(&test_key(1)).await);
    }

    #[tokio::test]
    async fn expired_entry_is_deleted_on_lookup() {
        let (cache, clock, _dir) = open_cache(10_000_000);
        let key = test_key(1);
        cache
            .put(&key, &Payload::Bytes(vec![1, 2]), clock.now_unix(), None)
            .await
            .unwrap();

        clock.advance(WEEK + Duration::from_secs(1));

        assert!(cache.get(&key).await.is_none());
        // The lazy delete removed the files too.
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn entry_survives_until_just_before_ttl() {
        let (cache, clock, _dir) = open_cache(10_000_000);
        let key = test_key(1);
        cache
            .put(&key, &Payload::Bytes(vec![1]), clock.now_unix(), None)
            .await
            .unwrap();

        clock.advance(WEEK - Duration::from_secs(1));
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn corrupt_sidecar_is_treated_as_miss_and_cleaned() {
        let (cache, clock, dir) = open_cache(10_000_000);
        let key = test_key(1);
        cache
            .put(&key, &Payload::Bytes(vec![1]), clock.now_unix(), None)
            .await
            .unwrap();

        // Corrupt the sidecar on disk.
        let meta = dir.path().join(format!("{}.meta", key.file_stem()));
        std::fs::write(&meta, b"{ garbage").unwrap();

        assert!(cache.get(&key).await.is_none());
        assert!(!meta.exists());
    }

    #[tokio::test]
    async fn corrupt_geometry_payload_is_treated_as_miss() {
        let (cache, clock, dir) = open_cache(10_000_000);
        let key = CacheKey::for_spatial(DataType::Building, "b", 14.0);
        let payload = Payload::Geometry(crate::types::GeometrySet::default());
        cache.put(&key, &payload, clock.now_unix(), None).await.unwrap();

        let data = dir.path().join(format!("{}.bin", key.file_stem()));
        std::fs::write(&data, b"not json at all").unwrap();

        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let (cache, clock, _dir) = open_cache(10_000_000);
        cache
            .put(&test_key(1), &Payload::Bytes(vec![1]), clock.now_unix(), None)
            .await
            .unwrap();

        clock.advance(WEEK + Duration::from_secs(10));
        cache
            .put(&test_key(2), &Payload::Bytes(vec![2]), clock.now_unix(), None)
            .await
            .unwrap();

        let removed = cache.sweep_expired().await;
        assert_eq!(removed, 1);
        assert!(cache.get(&test_key(2)).await.is_some());
    }

    #[tokio::test]
    async fn budget_enforcement_trims_oldest_first_to_eighty_percent() {
        let (cache, clock, _dir) = open_cache(10_000);

        // Five 3 KB entries stored at increasing timestamps: 15 KB total.
        for i in 0..5 {
            cache
                .put(
                    &test_key(i),
                    &Payload::Bytes(vec![0u8; 3000]),
                    clock.now_unix(),
                    None,
                )
                .await
                .unwrap();
            clock.advance(Duration::from_secs(60));
        }

        let (removed, freed) = cache.enforce_budget().await;
        // Trimming to 8 KB requires dropping the three oldest entries.
        assert_eq!(removed, 3);
        assert_eq!(freed, 9000);

        assert!(cache.get(&test_key(0)).await.is_none());
        assert!(cache.get(&test_key(1)).await.is_none());
        assert!(cache.get(&test_key(2)).await.is_none());
        assert!(cache.get(&test_key(3)).await.is_some());
        assert!(cache.get(&test_key(4)).await.is_some());

        assert!(cache.size_bytes().await <= 8000);
    }

    #[tokio::test]
    async fn budget_enforcement_is_noop_under_budget() {
        let (cache, clock, _dir) = open_cache(1_000_000);
        cache
            .put(&test_key(1), &Payload::Bytes(vec![0; 100]), clock.now_unix(), None)
            .await
            .unwrap();
        assert_eq!(cache.enforce_budget().await, (0, 0));
    }

    #[tokio::test]
    async fn clear_type_leaves_other_types() {
        let (cache, clock, _dir) = open_cache(10_000_000);
        let tile = test_key(1);
        let road = CacheKey::for_spatial(DataType::Road, "r", 14.0);
        cache
            .put(&tile, &Payload::Bytes(vec![1]), clock.now_unix(), None)
            .await
            .unwrap();
        cache
            .put(&road, &Payload::Bytes(vec![2]), clock.now_unix(), None)
            .await
            .unwrap();

        let removed = cache.clear_type(DataType::Tile).await;
        assert_eq!(removed, 1);
        assert!(cache.get(&tile).await.is_none());
        assert!(cache.get(&road).await.is_some());
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (cache, clock, _dir) = open_cache(10_000_000);
        for i in 0..4 {
            cache
                .put(&test_key(i), &Payload::Bytes(vec![1]), clock.now_unix(), None)
                .await
                .unwrap();
        }
        cache.clear().await;
        assert_eq!(cache.entry_count().await, 0);
    }
}
