//! The engine facade.
//!
//! [`MapDataEngine`] is the explicitly constructed, dependency-injected
//! service that UI and rendering collaborators talk to. It owns the cache
//! tiers, region store, coordinator, fetcher, decode pool, and background
//! workers, and is torn down explicitly via [`MapDataEngine::shutdown`].
//!
//! # Startup sequence
//!
//! 1. Payload cache and region store open (disk roots created).
//! 2. Fetcher and decode pool are constructed.
//! 3. The coordinator wires the tiers together.
//! 4. The prefetch worker and maintenance sweep start.
//!
//! Nothing in this engine is allowed to terminate the host process: every
//! internal fault is absorbed and degrades to cache-miss or fallback
//! behavior. The only errors surfaced to callers are failed region
//! downloads and deletions.

mod config;
mod error;

pub use config::{EngineConfig, DEFAULT_SWEEP_INTERVAL_SECS};
pub use error::EngineError;

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::TileCache;
use crate::clock::{system_clock, SharedClock};
use crate::coord::{GeoBounds, TileCoord};
use crate::coordinator::{
    CacheCoordinator, PrefetchPriority, PrefetchRequest, TypeStats,
};
use crate::decode::{DecodePool, StyleSheet};
use crate::fetch::{
    fallback_tile, AsyncHttpClient, Priority, ReqwestClient, TileFetcher, TileSource,
};
use crate::region::{
    DownloadRequest, ProgressCallback, RegionDownloader, RegionError,
};
use crate::store::{RegionRecord, RegionStore, StoreError};
use crate::tasks::TaskSupervisor;
use crate::types::{DataType, Payload};
use crate::zoom::ZoomLevel;

/// Aggregated statistics exposed to UI collaborators.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub requests: u64,
    pub hits: u64,
    pub hit_rate: f64,
    pub by_type: HashMap<DataType, TypeStats>,
    pub disk_size_bytes: u64,
    pub memory_entries: u64,
    /// Waiting work: queued prefetch requests plus fetches awaiting an
    /// admission slot.
    pub queue_depth: usize,
}

/// Client-side map data caching and delivery engine.
pub struct MapDataEngine {
    coordinator: Arc<CacheCoordinator>,
    cache: Arc<TileCache>,
    store: Arc<RegionStore>,
    fetcher: Arc<TileFetcher>,
    downloader: RegionDownloader,
    decode_pool: DecodePool,
    style: Arc<StyleSheet>,
    supervisor: Arc<TaskSupervisor>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl MapDataEngine {
    /// Start the engine with a real HTTP client and the system clock.
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        let client: Arc<dyn AsyncHttpClient> = Arc::new(ReqwestClient::new()?);
        Self::start_with(config, client, system_clock())
    }

    /// Start the engine with an injected HTTP client and clock.
    pub fn start_with(
        config: EngineConfig,
        client: Arc<dyn AsyncHttpClient>,
        clock: SharedClock,
    ) -> Result<Self, EngineError> {
        info!(
            cache_dir = %config.cache.disk_root.display(),
            store_dir = %config.store_root.display(),
            "starting map data engine"
        );

        let cache = Arc::new(TileCache::open(config.cache.clone(), clock.clone())?);
        let store = Arc::new(RegionStore::open(config.store_root.clone(), clock.clone())?);
        let fetcher = Arc::new(TileFetcher::new(client, config.fetcher.clone()));

        let coordinator = Arc::new(CacheCoordinator::new(
            Arc::clone(&cache),
            Arc::clone(&store),
            Some(Arc::clone(&fetcher)),
            config.coordinator.clone(),
            clock.clone(),
        ));

        let downloader = RegionDownloader::new(
            Arc::clone(&coordinator),
            Arc::clone(&store),
            config.downloader.clone(),
            clock.clone(),
        );

        let decode_pool = match config.decode_workers {
            Some(size) => DecodePool::new(size),
            None => DecodePool::with_default_size(),
        };

        let cancel = CancellationToken::new();
        let mut workers = Vec::new();

        workers.push(coordinator.start_prefetch_worker(cancel.clone()));
        workers.push(Self::start_sweep_worker(
            Arc::clone(&cache),
            Arc::clone(&store),
            config.sweep_interval,
            cancel.clone(),
        ));

        Ok(Self {
            coordinator,
            cache,
            store,
            fetcher,
            downloader,
            decode_pool,
            style: Arc::new(config.style),
            supervisor: Arc::new(TaskSupervisor::new()),
            cancel,
            workers,
        })
    }

    // ── primary read/write surface ───────────────────────────────────────

    /// Primary read path.
    ///
    /// With `bounds` present, the request routes through the full lookup
    /// chain (bucket cache → payload cache → region store → network when
    /// `fetch_if_missing`). Without bounds the caller-supplied key addresses
    /// the cache tiers only.
    pub async fn get_data(
        &self,
        data_type: DataType,
        key: &str,
        bounds: Option<GeoBounds>,
        zoom: Option<f64>,
        fetch_if_missing: bool,
    ) -> Option<Payload> {
        let zoom = zoom.unwrap_or(0.0);
        match bounds {
            Some(bounds) => {
                self.coordinator
                    .get_data(data_type, &bounds, zoom, fetch_if_missing)
                    .await
            }
            None => self.coordinator.get_data_keyed(data_type, key, zoom).await,
        }
    }

    /// Store a payload through every cache tier.
    pub async fn store_data(
        &self,
        data_type: DataType,
        key: &str,
        payload: Payload,
        bounds: Option<GeoBounds>,
        zoom: Option<f64>,
    ) {
        let zoom = zoom.unwrap_or(0.0);
        match bounds {
            Some(bounds) => {
                self.coordinator
                    .store_data(data_type, &bounds, zoom, payload)
                    .await
            }
            None => {
                self.coordinator
                    .store_data_keyed(data_type, key, zoom, payload)
                    .await
            }
        }
    }

    /// Whether any tier holds live data for the key.
    pub async fn has_data(
        &self,
        data_type: DataType,
        key: &str,
        bounds: Option<GeoBounds>,
        zoom: Option<f64>,
    ) -> bool {
        let zoom = zoom.unwrap_or(0.0);
        match bounds {
            Some(bounds) => self.coordinator.has_data(data_type, &bounds, zoom).await,
            None => self
                .coordinator
                .get_data_keyed(data_type, key, zoom)
                .await
                .is_some(),
        }
    }

    // ── tile delivery ────────────────────────────────────────────────────

    /// Tile image for `(z, x, y)`: cache → store → network, falling back to
    /// the placeholder when the network cannot supply it.
    pub async fn tile_image(&self, coord: TileCoord) -> Option<Vec<u8>> {
        self.coordinator
            .get_tile(coord, Priority::ON_DEMAND, true)
            .await
    }

    /// Rasterized vector tile for `(z, x, y)`.
    ///
    /// Raw vector payloads are decoded and rasterized on the worker pool;
    /// the rasterized PNG is cached write-behind. A payload that fails to
    /// decode serves the placeholder, mirroring the raster path's
    /// degradation.
    pub async fn vector_tile_image(&self, coord: TileCoord) -> Option<Vec<u8>> {
        let spatial = format!("v/{}", coord.path_key());
        let zoom = coord.zoom as f64;

        if let Some(payload) = self
            .coordinator
            .get_data_keyed(DataType::Tile, &spatial, zoom)
            .await
        {
            if let Some(bytes) = payload.as_bytes() {
                return Some(bytes.to_vec());
            }
        }

        let raw = match self.fetcher.fetch_tile(coord, Priority::ON_DEMAND).await {
            Ok(raw) => raw,
            Err(error) => {
                debug!(%coord, %error, "vector tile fetch superseded");
                return None;
            }
        };
        if raw.source == TileSource::Fallback {
            return Some(raw.bytes);
        }

        let png = match self
            .decode_pool
            .rasterize_tile(coord, raw.bytes, Arc::clone(&self.style))
            .await
        {
            Ok(png) => png,
            Err(error) => {
                warn!(%coord, %error, "vector tile decode failed, serving fallback");
                return Some(fallback_tile().to_vec());
            }
        };

        let coordinator = Arc::clone(&self.coordinator);
        let persisted = png.clone();
        self.supervisor.spawn("persist-vector-tile", async move {
            coordinator
                .store_data_keyed(DataType::Tile, &spatial, zoom, Payload::Raster(persisted))
                .await;
            Ok::<(), Infallible>(())
        });
        Some(png)
    }

    // ── prefetch and zoom-driven warming ─────────────────────────────────

    /// Fire-and-forget cache warming for an area.
    ///
    /// An empty data-type list is caller misuse: logged and ignored, never
    /// fatal.
    pub fn prefetch_region(
        &self,
        bounds: GeoBounds,
        data_types: Vec<DataType>,
        min_zoom: u8,
        max_zoom: u8,
        priority: PrefetchPriority,
    ) {
        if data_types.is_empty() {
            warn!("prefetch_region called with no data types, ignoring");
            return;
        }
        self.coordinator.prefetch(PrefetchRequest {
            bounds,
            data_types,
            min_zoom,
            max_zoom: max_zoom.max(min_zoom),
            priority,
        });
    }

    /// Warm the data types relevant to the next zoom tier within the given
    /// bounds, without blocking the caller.
    pub fn preload_next_zoom(&self, level: ZoomLevel, bounds: GeoBounds, current_zoom: f64) {
        let next = level.next();
        let zoom = current_zoom.ceil().min(crate::coord::MAX_ZOOM as f64) as u8;
        self.prefetch_region(
            bounds,
            next.relevant_data_types().to_vec(),
            zoom,
            zoom.saturating_add(1),
            PrefetchPriority::Low,
        );
    }

    // ── offline regions ──────────────────────────────────────────────────

    /// Download a region for offline use. See [`RegionDownloader::download`].
    pub async fn download_region(
        &self,
        request: DownloadRequest,
        on_progress: ProgressCallback,
    ) -> Result<RegionRecord, RegionError> {
        self.download_region_cancellable(request, on_progress, self.cancel.child_token())
            .await
    }

    /// Download a region with an explicit cancellation token.
    pub async fn download_region_cancellable(
        &self,
        request: DownloadRequest,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<RegionRecord, RegionError> {
        self.downloader.download(request, on_progress, cancel).await
    }

    /// Pre-download size estimate for a prospective region.
    pub fn estimate_region_size(&self, bounds: &GeoBounds, zoom_levels: &[u8]) -> u64 {
        self.downloader.estimate_size_bytes(bounds, zoom_levels)
    }

    /// All known offline regions.
    pub async fn get_downloaded_regions(&self) -> Vec<RegionRecord> {
        self.store.get_regions().await
    }

    /// Whether a downloaded region covers `bounds` at `zoom`.
    pub async fn is_region_available(&self, bounds: &GeoBounds, zoom: u8) -> bool {
        self.store.is_region_available(bounds, zoom).await
    }

    /// Delete a region, cascading to its stored rows.
    pub async fn delete_region(&self, id: &str) -> Result<(), StoreError> {
        self.store.delete_region(id).await
    }

    /// Record a region access for recency/frequency ranking.
    pub async fn log_region_access(&self, id: &str) {
        if let Err(error) = self.store.log_access(id).await {
            debug!(region = %id, %error, "access log append skipped");
        }
    }

    /// Regions ranked by access count.
    pub async fn most_accessed_regions(&self, limit: usize) -> Vec<RegionRecord> {
        self.store.most_accessed(limit).await
    }

    /// Regions ranked by access recency.
    pub async fn recently_accessed_regions(&self, limit: usize) -> Vec<RegionRecord> {
        self.store.recently_accessed(limit).await
    }

    // ── maintenance and stats ────────────────────────────────────────────

    /// Aggregated cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        let coordinator = self.coordinator.stats();
        let cache = self.cache.stats().await;
        CacheStats {
            requests: coordinator.requests,
            hits: coordinator.hits,
            hit_rate: coordinator.hit_rate,
            by_type: coordinator.by_type,
            disk_size_bytes: cache.disk_size_bytes,
            memory_entries: cache.memory_entries,
            queue_depth: self.coordinator.prefetch_queue_depth() + self.fetcher.queue_depth(),
        }
    }

    /// Drop every cached entry of one data type.
    pub async fn clear_type(&self, data_type: DataType) {
        self.coordinator.clear_type(data_type).await;
    }

    /// Drop everything from the cache tiers (the region store keeps its
    /// regions; they have their own lifecycle).
    pub async fn clear_all(&self) {
        self.coordinator.clear_all().await;
    }

    /// Whether the network layer is currently in offline mode.
    pub fn is_offline(&self) -> bool {
        self.fetcher.is_offline()
    }

    /// Total network calls issued since startup (test/diagnostic hook).
    pub fn network_calls(&self) -> u64 {
        self.fetcher.network_calls()
    }

    /// Stop workers, drain background tasks, and shut down the decode pool.
    pub async fn shutdown(mut self) {
        info!("shutting down map data engine");
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            let _ = worker.await;
        }
        self.supervisor.shutdown().await;
        self.decode_pool.shutdown();
        info!("map data engine shutdown complete");
    }

    fn start_sweep_worker(
        cache: Arc<TileCache>,
        store: Arc<RegionStore>,
        interval: std::time::Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup stays
            // cheap.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                let swept = cache.sweep_expired().await;
                let (trimmed, freed) = cache.enforce_disk_budget().await;
                if swept > 0 || trimmed > 0 {
                    debug!(swept, trimmed, freed, "cache maintenance pass");
                }
                match store.clear_expired().await {
                    Ok(expired) if !expired.is_empty() => {
                        info!(count = expired.len(), "expired offline regions removed");
                    }
                    Ok(_) => {}
                    Err(error) => warn!(%error, "region expiry sweep failed"),
                }
            }
        })
    }
}
