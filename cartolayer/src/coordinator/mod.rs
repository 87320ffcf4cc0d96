//! Cache coordinator: routes data requests through the cache tiers.
//!
//! Per-request state machine:
//!
//! ```text
//! BUCKET_LOOKUP -> (hit) DONE
//!   | (miss) TILE_CACHE_LOOKUP -> (hit: backfill bucket) DONE
//!   | (miss) REGION_STORE_LOOKUP -> (hit: backfill tiers) DONE
//!   | (miss, fetcher present) THROTTLE -> FETCH
//!       -> (success: persist to all tiers) DONE
//!       -> (failure) DONE with None
//! ```
//!
//! The coordinator-level throttle on geometry fetches is a coarse global
//! safety valve against an external rate-limited API; it is distinct from
//! (and additive to) the fetcher's per-host adaptive backoff.

mod bucket;
mod prefetch;

pub use bucket::{BucketCache, CachedRegion, DEFAULT_BUCKET_CAPACITY};
pub use prefetch::{PrefetchHandler, PrefetchPriority, PrefetchQueue, PrefetchRequest};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheKey, TileCache};
use crate::clock::SharedClock;
use crate::coord::{tiles_in_bounds, GeoBounds, TileCoord, MAX_ZOOM};
use crate::fetch::{BoxFuture, FetchError, Priority, TileFetcher, TileSource};
use crate::store::RegionStore;
use crate::types::{DataType, Payload};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-zoom-bucket entry budget for the volatile memory cache.
    pub bucket_capacity: usize,
    /// Absolute TTL shared with the cache tiers.
    pub ttl: Duration,
    /// Global minimum interval between coordinator-issued geometry fetches.
    pub min_fetch_interval: Duration,
    /// Debounce window for prefetch submissions.
    pub prefetch_debounce: Duration,
    /// Pause between processed prefetch requests.
    pub prefetch_pause: Duration,
    /// Cap on tiles fanned out per prefetch request and zoom level.
    pub max_prefetch_tiles: usize,
    /// Source label used for tile rows in the region store.
    pub tile_source: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            ttl: crate::cache::DEFAULT_TTL,
            min_fetch_interval: Duration::from_secs(10),
            prefetch_debounce: Duration::from_millis(100),
            prefetch_pause: Duration::from_millis(100),
            max_prefetch_tiles: 16,
            tile_source: "default".into(),
        }
    }
}

/// Outcome of a store-targeted tile download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileDownloadOutcome {
    /// Fetched from the network and persisted; carries stored byte count.
    Stored(u64),
    /// The store already had this tile.
    AlreadyStored,
    /// The fetch degraded to a fallback or failed; nothing was stored.
    Skipped,
}

#[derive(Default)]
struct TypeCounters {
    requests: AtomicU64,
    hits: AtomicU64,
}

/// Per-type request/hit counters for one data type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeStats {
    pub requests: u64,
    pub hits: u64,
}

/// Point-in-time coordinator statistics.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub hit_rate: f64,
    pub by_type: HashMap<DataType, TypeStats>,
}

/// Routes requests through bucket cache → tile cache → region store →
/// network, and owns the prefetch queue.
pub struct CacheCoordinator {
    buckets: BucketCache,
    cache: Arc<TileCache>,
    store: Arc<RegionStore>,
    fetcher: Option<Arc<TileFetcher>>,
    config: CoordinatorConfig,
    clock: SharedClock,
    prefetch_queue: Arc<PrefetchQueue>,
    last_fetch: Mutex<Option<Instant>>,
    requests: AtomicU64,
    hits: AtomicU64,
    by_type: DashMap<DataType, TypeCounters>,
}

impl CacheCoordinator {
    pub fn new(
        cache: Arc<TileCache>,
        store: Arc<RegionStore>,
        fetcher: Option<Arc<TileFetcher>>,
        config: CoordinatorConfig,
        clock: SharedClock,
    ) -> Self {
        let buckets = BucketCache::new(config.bucket_capacity, config.ttl, clock.clone());
        let prefetch_queue = Arc::new(PrefetchQueue::new(
            config.prefetch_debounce,
            config.prefetch_pause,
        ));
        Self {
            buckets,
            cache,
            store,
            fetcher,
            config,
            clock,
            prefetch_queue,
            last_fetch: Mutex::new(None),
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            by_type: DashMap::new(),
        }
    }

    // ── primary read/write paths ─────────────────────────────────────────

    /// Fetch bounds-keyed data of one type at a continuous zoom.
    ///
    /// Only geometry types have a network path; tile payloads keyed by
    /// bounds resolve from the cache tiers alone.
    pub async fn get_data(
        &self,
        data_type: DataType,
        bounds: &GeoBounds,
        zoom: f64,
        fetch_if_missing: bool,
    ) -> Option<Payload> {
        self.get_data_with_priority(data_type, bounds, zoom, fetch_if_missing, Priority::ON_DEMAND)
            .await
    }

    async fn get_data_with_priority(
        &self,
        data_type: DataType,
        bounds: &GeoBounds,
        zoom: f64,
        fetch_if_missing: bool,
        priority: Priority,
    ) -> Option<Payload> {
        self.record_request(data_type);
        let key = CacheKey::for_bounds(data_type, bounds, zoom);

        // 1. Volatile bucket cache, exact key then containing-overlap scan.
        if let Some(region) = self.buckets.get(&key) {
            self.record_hit(data_type);
            return Some((*region.payload).clone());
        }
        if let Some((_, region)) = self.buckets.find_overlapping(data_type, bounds, key.bucket()) {
            self.record_hit(data_type);
            return Some((*region.payload).clone());
        }

        // 2. Tiered payload cache.
        if let Some(entry) = self.cache.get(&key).await {
            self.record_hit(data_type);
            self.buckets.insert(
                key,
                CachedRegion {
                    payload: Arc::new(entry.payload.clone()),
                    bounds: Some(*bounds),
                    stored_at: entry.stored_at,
                },
            );
            return Some(entry.payload.clone());
        }

        // 3. Region store (geometry tables only).
        let zoom_level = zoom.round().clamp(0.0, MAX_ZOOM as f64) as u8;
        if data_type != DataType::Tile {
            if let Some(set) = self.store.get_geometry(data_type, zoom_level, bounds).await {
                self.record_hit(data_type);
                let payload = Payload::Geometry(set);
                self.backfill(&key, bounds, &payload).await;
                return Some(payload);
            }
        }

        // 4. Network.
        if !fetch_if_missing || data_type == DataType::Tile {
            return None;
        }
        let fetcher = self.fetcher.as_ref()?;
        self.throttle().await;
        match fetcher
            .fetch_geometry(data_type, bounds, zoom_level, priority)
            .await
        {
            Ok(set) => {
                if let Err(error) = self
                    .store
                    .put_geometry(data_type, zoom_level, bounds, &set)
                    .await
                {
                    warn!(%data_type, %error, "failed to persist fetched geometry");
                }
                let payload = Payload::Geometry(set);
                self.backfill(&key, bounds, &payload).await;
                Some(payload)
            }
            Err(error) => {
                debug!(%data_type, %error, "geometry fetch failed, returning miss");
                None
            }
        }
    }

    /// Store bounds-keyed data through every cache tier.
    pub async fn store_data(
        &self,
        data_type: DataType,
        bounds: &GeoBounds,
        zoom: f64,
        payload: Payload,
    ) {
        let key = CacheKey::for_bounds(data_type, bounds, zoom);
        if let Payload::Geometry(set) = &payload {
            let zoom_level = zoom.round().clamp(0.0, MAX_ZOOM as f64) as u8;
            if let Err(error) = self.store.put_geometry(data_type, zoom_level, bounds, set).await {
                warn!(%data_type, %error, "failed to persist stored geometry");
            }
        }
        self.backfill(&key, bounds, &payload).await;
    }

    /// Store data under a caller-supplied spatial key (no bounds metadata).
    pub async fn store_data_keyed(
        &self,
        data_type: DataType,
        spatial: &str,
        zoom: f64,
        payload: Payload,
    ) {
        let key = CacheKey::for_spatial(data_type, spatial, zoom);
        if let Err(error) = self.cache.put(&key, payload.clone(), None).await {
            warn!(%key, %error, "failed to persist stored payload");
        }
        self.buckets.insert(
            key,
            CachedRegion {
                payload: Arc::new(payload),
                bounds: None,
                stored_at: self.clock.now_unix(),
            },
        );
    }

    /// Read data stored under a caller-supplied spatial key.
    pub async fn get_data_keyed(
        &self,
        data_type: DataType,
        spatial: &str,
        zoom: f64,
    ) -> Option<Payload> {
        self.record_request(data_type);
        let key = CacheKey::for_spatial(data_type, spatial, zoom);
        if let Some(region) = self.buckets.get(&key) {
            self.record_hit(data_type);
            return Some((*region.payload).clone());
        }
        if let Some(entry) = self.cache.get(&key).await {
            self.record_hit(data_type);
            self.buckets.insert(
                key,
                CachedRegion {
                    payload: Arc::new(entry.payload.clone()),
                    bounds: None,
                    stored_at: entry.stored_at,
                },
            );
            return Some(entry.payload.clone());
        }
        None
    }

    /// Whether any tier holds live data for the key.
    pub async fn has_data(&self, data_type: DataType, bounds: &GeoBounds, zoom: f64) -> bool {
        let key = CacheKey::for_bounds(data_type, bounds, zoom);
        if self.buckets.contains(&key) || self.cache.has(&key).await {
            return true;
        }
        if data_type != DataType::Tile {
            let zoom_level = zoom.round().clamp(0.0, MAX_ZOOM as f64) as u8;
            return self
                .store
                .get_geometry(data_type, zoom_level, bounds)
                .await
                .is_some();
        }
        false
    }

    // ── tile path ────────────────────────────────────────────────────────

    /// Fetch a tile image by coordinate: cache → store → network.
    ///
    /// Network fallbacks are returned to the caller but never cached, so a
    /// placeholder cannot mask a later successful fetch.
    pub async fn get_tile(
        &self,
        coord: TileCoord,
        priority: Priority,
        fetch_if_missing: bool,
    ) -> Option<Vec<u8>> {
        self.record_request(DataType::Tile);
        let key = CacheKey::for_tile(DataType::Tile, coord);

        if let Some(entry) = self.cache.get(&key).await {
            if let Some(bytes) = entry.payload.as_bytes() {
                self.record_hit(DataType::Tile);
                return Some(bytes.to_vec());
            }
        }

        if let Some(bytes) = self.store.get_tile(coord, &self.config.tile_source).await {
            self.record_hit(DataType::Tile);
            if let Err(error) = self
                .cache
                .put(&key, Payload::Raster(bytes.clone()), Some("store".into()))
                .await
            {
                warn!(%coord, %error, "failed to backfill tile cache");
            }
            return Some(bytes);
        }

        if !fetch_if_missing {
            return None;
        }
        let fetcher = self.fetcher.as_ref()?;
        match fetcher.fetch_tile(coord, priority).await {
            Ok(tile) => {
                if tile.source == TileSource::Network {
                    if let Err(error) = self
                        .cache
                        .put(&key, Payload::Raster(tile.bytes.clone()), Some("network".into()))
                        .await
                    {
                        warn!(%coord, %error, "failed to cache fetched tile");
                    }
                }
                Some(tile.bytes)
            }
            Err(error) => {
                debug!(%coord, %error, "tile fetch yielded no result");
                None
            }
        }
    }

    /// Fetch a tile for an offline region and persist it to the store.
    pub async fn download_tile_to_store(
        &self,
        coord: TileCoord,
        priority: Priority,
    ) -> TileDownloadOutcome {
        if self.store.has_tile(coord, &self.config.tile_source).await {
            return TileDownloadOutcome::AlreadyStored;
        }
        let Some(fetcher) = self.fetcher.as_ref() else {
            return TileDownloadOutcome::Skipped;
        };
        match fetcher.fetch_tile(coord, priority).await {
            Ok(tile) if tile.source == TileSource::Network => {
                let len = tile.bytes.len() as u64;
                match self
                    .store
                    .put_tile(coord, &self.config.tile_source, tile.bytes)
                    .await
                {
                    Ok(()) => TileDownloadOutcome::Stored(len),
                    Err(error) => {
                        warn!(%coord, %error, "failed to persist downloaded tile");
                        TileDownloadOutcome::Skipped
                    }
                }
            }
            Ok(_) => {
                debug!(%coord, "fallback served during region download, skipping tile");
                TileDownloadOutcome::Skipped
            }
            Err(error) => {
                debug!(%coord, %error, "tile download failed, skipping");
                TileDownloadOutcome::Skipped
            }
        }
    }

    /// Fetch a geometry payload for an offline region download, persisting
    /// it to the store. Returns stored bytes, `None` when skipped.
    pub async fn download_geometry_to_store(
        &self,
        data_type: DataType,
        bounds: &GeoBounds,
        zoom: u8,
    ) -> Option<u64> {
        let payload = self
            .get_data_with_priority(data_type, bounds, zoom as f64, true, Priority::PREFETCH)
            .await?;
        Some(payload.size_bytes())
    }

    // ── prefetch ─────────────────────────────────────────────────────────

    /// Submit a fire-and-forget prefetch request.
    pub fn prefetch(&self, request: PrefetchRequest) {
        self.prefetch_queue.submit(request);
    }

    /// Start the prefetch worker; runs until the token is cancelled.
    pub fn start_prefetch_worker(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let queue = Arc::clone(&coordinator.prefetch_queue);
            queue.run(coordinator.as_ref(), cancel).await;
        })
    }

    /// Requests waiting in the prefetch queue.
    pub fn prefetch_queue_depth(&self) -> usize {
        self.prefetch_queue.depth()
    }

    /// Prefetch requests fully processed so far.
    pub fn prefetch_processed(&self) -> u64 {
        self.prefetch_queue.processed()
    }

    async fn execute_prefetch(&self, request: &PrefetchRequest) {
        let max_zoom = request.max_zoom.min(MAX_ZOOM);
        for zoom in request.min_zoom..=max_zoom {
            for &data_type in &request.data_types {
                if data_type == DataType::Tile {
                    let tiles = match tiles_in_bounds(&request.bounds, zoom) {
                        Ok(tiles) => tiles,
                        Err(error) => {
                            warn!(%error, zoom, "invalid prefetch bounds, skipping zoom level");
                            continue;
                        }
                    };
                    for coord in tiles.into_iter().take(self.config.max_prefetch_tiles) {
                        self.get_tile(coord, Priority::PREFETCH, true).await;
                    }
                } else {
                    self.get_data_with_priority(
                        data_type,
                        &request.bounds,
                        zoom as f64,
                        true,
                        Priority::PREFETCH,
                    )
                    .await;
                }
            }
        }
    }

    // ── maintenance ──────────────────────────────────────────────────────

    /// Drop one data type from the volatile and tiered caches.
    pub async fn clear_type(&self, data_type: DataType) {
        self.buckets.clear_type(data_type);
        self.cache.clear_type(data_type).await;
    }

    /// Drop everything from the volatile and tiered caches.
    pub async fn clear_all(&self) {
        self.buckets.clear();
        self.cache.clear_all().await;
    }

    /// Current statistics snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let mut by_type = HashMap::new();
        for entry in self.by_type.iter() {
            by_type.insert(
                *entry.key(),
                TypeStats {
                    requests: entry.value().requests.load(Ordering::Relaxed),
                    hits: entry.value().hits.load(Ordering::Relaxed),
                },
            );
        }
        StatsSnapshot {
            requests,
            hits,
            hit_rate: if requests == 0 {
                0.0
            } else {
                hits as f64 / requests as f64
            },
            by_type,
        }
    }

    /// Entries currently held in one zoom bucket (test/diagnostic hook).
    pub fn bucket_len(&self, zoom: f64) -> usize {
        self.buckets.bucket_len(crate::zoom::ZoomBucket::for_zoom(zoom))
    }

    // ── internals ────────────────────────────────────────────────────────

    async fn backfill(&self, key: &CacheKey, bounds: &GeoBounds, payload: &Payload) {
        if let Err(error) = self.cache.put(key, payload.clone(), None).await {
            warn!(%key, %error, "failed to write payload cache");
        }
        self.buckets.insert(
            key.clone(),
            CachedRegion {
                payload: Arc::new(payload.clone()),
                bounds: Some(*bounds),
                stored_at: self.clock.now_unix(),
            },
        );
    }

    /// Coordinator-level safety valve: space geometry fetches at least
    /// `min_fetch_interval` apart, globally.
    async fn throttle(&self) {
        let mut last = self.last_fetch.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.config.min_fetch_interval {
                let wait = self.config.min_fetch_interval - elapsed;
                debug!(?wait, "coordinator throttle before network fetch");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }

    fn record_request(&self, data_type: DataType) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.by_type
            .entry(data_type)
            .or_default()
            .requests
            .fetch_add(1, Ordering::Relaxed);
    }

    fn record_hit(&self, data_type: DataType) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.by_type
            .entry(data_type)
            .or_default()
            .hits
            .fetch_add(1, Ordering::Relaxed);
    }
}

impl PrefetchHandler for CacheCoordinator {
    fn handle<'a>(&'a self, request: &'a PrefetchRequest) -> BoxFuture<'a, ()> {
        Box::pin(self.execute_prefetch(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TileCacheConfig;
    use crate::clock::ManualClock;
    use crate::fetch::testing::ScriptedHttpClient;
    use crate::fetch::{AsyncHttpClient, FetcherConfig};
    use crate::types::GeometrySet;

    struct Fixture {
        coordinator: Arc<CacheCoordinator>,
        client: Arc<ScriptedHttpClient>,
        clock: Arc<ManualClock>,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(config: CoordinatorConfig, client: ScriptedHttpClient) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let clock: Arc<ManualClock> = Arc::new(ManualClock::new());
        let cache = Arc::new(
            TileCache::open(
                TileCacheConfig {
                    disk_root: dir.path().join("cache"),
                    ..TileCacheConfig::default()
                },
                clock.clone(),
            )
            .unwrap(),
        );
        let store =
            Arc::new(RegionStore::open(dir.path().join("store"), clock.clone()).unwrap());
        let client = Arc::new(client);
        let fetcher = Arc::new(TileFetcher::new(
            Arc::clone(&client) as Arc<dyn AsyncHttpClient>,
            FetcherConfig {
                base_interval: Duration::from_millis(1),
                ..FetcherConfig::default()
            },
        ));
        let coordinator = Arc::new(CacheCoordinator::new(
            cache,
            store,
            Some(fetcher),
            config,
            clock.clone(),
        ));
        Fixture {
            coordinator,
            client,
            clock,
            _dir: dir,
        }
    }

    fn fast_config() -> CoordinatorConfig {
        CoordinatorConfig {
            min_fetch_interval: Duration::ZERO,
            prefetch_debounce: Duration::from_millis(20),
            prefetch_pause: Duration::from_millis(1),
            ..CoordinatorConfig::default()
        }
    }

    fn geometry_body() -> Vec<u8> {
        serde_json::to_vec(&GeometrySet::default()).unwrap()
    }

    fn sf() -> GeoBounds {
        GeoBounds::new(37.75, -122.45, 37.78, -122.40).unwrap()
    }

    #[tokio::test]
    async fn miss_fetches_and_persists_to_all_tiers() {
        let fx = fixture_with(fast_config(), ScriptedHttpClient::always_ok(geometry_body()));
        let bounds = sf();

        let payload = fx
            .coordinator
            .get_data(DataType::Building, &bounds, 14.0, true)
            .await
            .expect("fetch should succeed");
        assert!(matches!(payload, Payload::Geometry(_)));
        assert_eq!(fx.client.request_count(), 1);

        // Second request is a hit with no further network traffic.
        fx.coordinator
            .get_data(DataType::Building, &bounds, 14.0, true)
            .await
            .unwrap();
        assert_eq!(fx.client.request_count(), 1);

        let stats = fx.coordinator.stats();
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.hits, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
        assert_eq!(stats.by_type[&DataType::Building].requests, 2);
    }

    #[tokio::test]
    async fn fetch_if_missing_false_never_touches_network() {
        let fx = fixture_with(fast_config(), ScriptedHttpClient::always_ok(geometry_body()));

        let result = fx
            .coordinator
            .get_data(DataType::Road, &sf(), 14.0, false)
            .await;
        assert!(result.is_none());
        assert_eq!(fx.client.request_count(), 0);
    }

    #[tokio::test]
    async fn store_hit_avoids_network() {
        let fx = fixture_with(fast_config(), ScriptedHttpClient::always_ok(geometry_body()));
        let bounds = sf();

        // Seed the region store directly, then drop volatile tiers.
        fx.coordinator
            .store
            .put_geometry(DataType::Road, 14, &bounds, &GeometrySet::default())
            .await
            .unwrap();

        let payload = fx
            .coordinator
            .get_data(DataType::Road, &bounds, 14.0, true)
            .await
            .unwrap();
        assert!(matches!(payload, Payload::Geometry(_)));
        assert_eq!(fx.client.request_count(), 0);
    }

    #[tokio::test]
    async fn overlapping_broader_entry_satisfies_narrower_request() {
        let fx = fixture_with(fast_config(), ScriptedHttpClient::always_ok(geometry_body()));
        let broad = GeoBounds::new(37.70, -122.52, 37.83, -122.35).unwrap();
        let narrow = GeoBounds::new(37.75, -122.45, 37.78, -122.40).unwrap();

        fx.coordinator
            .store_data(
                DataType::Road,
                &broad,
                14.0,
                Payload::Geometry(GeometrySet::default()),
            )
            .await;

        // The narrow request has a different rounded key but is contained in
        // the broad cached area, so no fetch is needed.
        let payload = fx
            .coordinator
            .get_data(DataType::Road, &narrow, 14.0, true)
            .await;
        assert!(payload.is_some());
        assert_eq!(fx.client.request_count(), 0);
    }

    #[tokio::test]
    async fn coordinator_throttle_spaces_geometry_fetches() {
        let config = CoordinatorConfig {
            min_fetch_interval: Duration::from_millis(80),
            ..fast_config()
        };
        let fx = fixture_with(config, ScriptedHttpClient::always_ok(geometry_body()));

        let a = GeoBounds::new(37.75, -122.45, 37.78, -122.40).unwrap();
        let b = GeoBounds::new(38.75, -121.45, 38.78, -121.40).unwrap();

        let start = Instant::now();
        fx.coordinator.get_data(DataType::Road, &a, 14.0, true).await;
        fx.coordinator.get_data(DataType::Road, &b, 14.0, true).await;
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(80),
            "second fetch should wait out the throttle, elapsed {elapsed:?}"
        );
        assert_eq!(fx.client.request_count(), 2);
    }

    #[tokio::test]
    async fn tile_path_caches_network_bytes_but_not_fallbacks() {
        let fx = fixture_with(fast_config(), ScriptedHttpClient::always_ok(vec![0xAB]));
        let coord = TileCoord::new(10, 5, 5);

        let bytes = fx
            .coordinator
            .get_tile(coord, Priority::ON_DEMAND, true)
            .await
            .unwrap();
        assert_eq!(bytes, vec![0xAB]);
        assert_eq!(fx.client.request_count(), 1);

        // Cached now.
        fx.coordinator
            .get_tile(coord, Priority::ON_DEMAND, true)
            .await
            .unwrap();
        assert_eq!(fx.client.request_count(), 1);
    }

    #[tokio::test]
    async fn fallback_tiles_are_served_but_not_cached() {
        let err = FetchError::Transport("down".into());
        let fx = fixture_with(fast_config(), ScriptedHttpClient::always_err(err));
        let coord = TileCoord::new(10, 5, 5);

        let bytes = fx
            .coordinator
            .get_tile(coord, Priority::ON_DEMAND, true)
            .await
            .unwrap();
        assert_eq!(bytes, crate::fetch::fallback_tile());

        // Nothing was cached: the next lookup with fetching disabled misses.
        let cached = fx
            .coordinator
            .get_tile(coord, Priority::ON_DEMAND, false)
            .await;
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn download_tile_to_store_persists_and_detects_duplicates() {
        let fx = fixture_with(fast_config(), ScriptedHttpClient::always_ok(vec![1, 2, 3]));
        let coord = TileCoord::new(13, 1310, 3166);

        let outcome = fx
            .coordinator
            .download_tile_to_store(coord, Priority::PREFETCH)
            .await;
        assert_eq!(outcome, TileDownloadOutcome::Stored(3));

        let outcome = fx
            .coordinator
            .download_tile_to_store(coord, Priority::PREFETCH)
            .await;
        assert_eq!(outcome, TileDownloadOutcome::AlreadyStored);
    }

    #[tokio::test]
    async fn prefetch_requests_coalesce_and_warm_the_cache() {
        let fx = fixture_with(fast_config(), ScriptedHttpClient::always_ok(geometry_body()));
        let cancel = CancellationToken::new();
        let worker = fx.coordinator.start_prefetch_worker(cancel.clone());
        let bounds = sf();

        let request = |priority| PrefetchRequest {
            bounds,
            data_types: vec![DataType::Road],
            min_zoom: 14,
            max_zoom: 14,
            priority,
        };

        // Two rapid submissions within the debounce window coalesce.
        fx.coordinator.prefetch(request(PrefetchPriority::Normal));
        tokio::time::sleep(Duration::from_millis(5)).await;
        fx.coordinator.prefetch(request(PrefetchPriority::Normal));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fx.coordinator.prefetch_processed(), 1);
        assert_eq!(fx.client.request_count(), 1);

        // The prefetched data is now a cache hit.
        fx.coordinator
            .get_data(DataType::Road, &bounds, 14.0, false)
            .await
            .unwrap();

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn prefetch_tile_fanout_is_bounded() {
        let config = CoordinatorConfig {
            max_prefetch_tiles: 4,
            ..fast_config()
        };
        let fx = fixture_with(config, ScriptedHttpClient::always_ok(vec![9]));
        let cancel = CancellationToken::new();
        let worker = fx.coordinator.start_prefetch_worker(cancel.clone());

        // A large area covering far more than four tiles at zoom 14.
        let big = GeoBounds::new(37.0, -123.0, 38.0, -121.5).unwrap();
        fx.coordinator.prefetch(PrefetchRequest {
            bounds: big,
            data_types: vec![DataType::Tile],
            min_zoom: 14,
            max_zoom: 14,
            priority: PrefetchPriority::Normal,
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(fx.client.request_count(), 4, "fan-out must be capped");

        cancel.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn bucket_eviction_bound_holds_under_load() {
        let config = CoordinatorConfig {
            bucket_capacity: 5,
            ..fast_config()
        };
        let fx = fixture_with(config, ScriptedHttpClient::always_ok(geometry_body()));

        for i in 0..20 {
            let bounds = GeoBounds::new(
                37.0 + i as f64 * 0.01,
                -122.0,
                37.005 + i as f64 * 0.01,
                -121.995,
            )
            .unwrap();
            fx.coordinator
                .store_data(
                    DataType::Poi,
                    &bounds,
                    14.0,
                    Payload::Geometry(GeometrySet::default()),
                )
                .await;
        }

        assert!(fx.coordinator.bucket_len(14.0) <= 5);
    }

    #[tokio::test]
    async fn clear_type_and_clear_all_cascade_through_tiers() {
        let fx = fixture_with(fast_config(), ScriptedHttpClient::always_ok(geometry_body()));
        let bounds = sf();

        fx.coordinator
            .store_data(
                DataType::Road,
                &bounds,
                14.0,
                Payload::Geometry(GeometrySet::default()),
            )
            .await;
        fx.coordinator
            .store_data_keyed(DataType::Poi, "poi-area", 15.0, Payload::Bytes(vec![1]))
            .await;

        fx.coordinator.clear_type(DataType::Road).await;
        // Road is gone from cache tiers but POI survives.
        assert!(fx
            .coordinator
            .get_data_keyed(DataType::Poi, "poi-area", 15.0)
            .await
            .is_some());

        fx.coordinator.clear_all().await;
        assert!(fx
            .coordinator
            .get_data_keyed(DataType::Poi, "poi-area", 15.0)
            .await
            .is_none());
        let _ = fx.clock;
    }
}
