//! Offline region downloads.
//!
//! A region download partitions a bounding box into sub-tiles small enough
//! to keep individual fetches manageable, then drives the coordinator's
//! fetch-and-cache path for every `(zoom level × sub-tile × data type)`
//! triple, reporting a monotonically increasing progress fraction. A single
//! failed sub-task is logged and skipped; it never aborts the region.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::coord::{tiles_in_bounds, CoordError, GeoBounds};
use crate::coordinator::{CacheCoordinator, TileDownloadOutcome};
use crate::fetch::Priority;
use crate::store::{RegionRecord, RegionStatus, RegionStore, StoreError};
use crate::types::DataType;

/// Errors surfaced by region downloads.
///
/// This is the one operation whose failures reach the UI layer as a
/// structured error instead of degrading silently.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("invalid download request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Area selector for a download: explicit bounds or center plus radius.
#[derive(Debug, Clone, Copy)]
pub enum RegionArea {
    Bounds(GeoBounds),
    Center { lat: f64, lon: f64, radius_km: f64 },
}

impl RegionArea {
    fn resolve(&self) -> Result<GeoBounds, CoordError> {
        match self {
            RegionArea::Bounds(bounds) => Ok(*bounds),
            RegionArea::Center {
                lat,
                lon,
                radius_km,
            } => GeoBounds::from_center(*lat, *lon, *radius_km),
        }
    }
}

/// A region download request.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub name: String,
    pub area: RegionArea,
    pub zoom_levels: Vec<u8>,
    pub data_types: Vec<DataType>,
}

/// Progress observer, called with a fraction in `0.0..=1.0`.
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Downloader configuration.
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Target sub-tile edge length in kilometres.
    pub subtile_km: f64,
    /// Cap on tile fetches per sub-tile and zoom level.
    pub max_tiles_per_subtile: usize,
    /// Region lifetime before the expiry sweep removes it.
    pub region_ttl: Duration,
    /// Heuristic bytes-per-tile used by [`RegionDownloader::estimate_size_bytes`].
    pub estimate_bytes_per_tile: u64,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            subtile_km: 4.0,
            max_tiles_per_subtile: 16,
            region_ttl: Duration::from_secs(30 * 24 * 3600),
            estimate_bytes_per_tile: 24 * 1024,
        }
    }
}

/// Drives bulk downloads through the coordinator and persists the region
/// record.
pub struct RegionDownloader {
    coordinator: Arc<CacheCoordinator>,
    store: Arc<RegionStore>,
    config: DownloaderConfig,
    clock: SharedClock,
}

impl RegionDownloader {
    pub fn new(
        coordinator: Arc<CacheCoordinator>,
        store: Arc<RegionStore>,
        config: DownloaderConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            coordinator,
            store,
            config,
            clock,
        }
    }

    /// Crude pre-download size estimate.
    ///
    /// A heuristic, not a correctness guarantee: callers wanting a hard
    /// cap are expected to reject oversized requests before invoking
    /// [`RegionDownloader::download`]; the downloader itself never enforces
    /// a cap.
    pub fn estimate_size_bytes(&self, bounds: &GeoBounds, zoom_levels: &[u8]) -> u64 {
        let mut tiles = 0u64;
        for &zoom in zoom_levels {
            if let Ok(covering) = tiles_in_bounds(bounds, zoom) {
                tiles += covering.len() as u64;
            }
        }
        tiles * self.config.estimate_bytes_per_tile
    }

    /// Execute a download.
    ///
    /// Progress is reported as `completed_tasks / total_tasks` and never
    /// decreases. Cancellation finishes the current sub-task, persists the
    /// record with `Cancelled` status, and returns it.
    ///
    /// # Errors
    ///
    /// Fails on an invalid request (empty name, zoom list, or data-type
    /// list; unresolvable area) or when the region record cannot be
    /// persisted. Individual sub-task failures are skipped, not errors.
    pub async fn download(
        &self,
        request: DownloadRequest,
        on_progress: ProgressCallback,
        cancel: CancellationToken,
    ) -> Result<RegionRecord, RegionError> {
        if request.name.trim().is_empty() {
            return Err(RegionError::InvalidRequest("empty region name".into()));
        }
        if request.zoom_levels.is_empty() {
            return Err(RegionError::InvalidRequest("no zoom levels".into()));
        }
        if request.data_types.is_empty() {
            return Err(RegionError::InvalidRequest("no data types".into()));
        }

        let bounds = request.area.resolve()?;
        let now = self.clock.now_unix();
        let mut record = RegionRecord::new(
            request.name.clone(),
            bounds,
            request.zoom_levels.iter().copied(),
            now,
            now + self.config.region_ttl.as_secs() as i64,
        );
        self.store.register_region(record.clone()).await?;

        record.status = RegionStatus::Downloading;
        self.store.update_region(record.clone()).await?;

        let subtiles = bounds.split(self.config.subtile_km);
        let total_tasks =
            (request.zoom_levels.len() * subtiles.len() * request.data_types.len()).max(1);
        info!(
            region = %record.id,
            name = %record.name,
            subtiles = subtiles.len(),
            total_tasks,
            "starting region download"
        );

        let mut completed = 0usize;
        let mut last_progress = 0.0f64;
        let mut report = |completed: usize, last: &mut f64| {
            let fraction = (completed as f64 / total_tasks as f64).min(1.0);
            if fraction > *last {
                *last = fraction;
            }
            on_progress(*last);
        };

        for &zoom in &request.zoom_levels {
            for subtile in &subtiles {
                for &data_type in &request.data_types {
                    if cancel.is_cancelled() {
                        info!(region = %record.id, "region download cancelled");
                        record.status = RegionStatus::Cancelled;
                        record.size_bytes = self.store.region_size_bytes(&record).await;
                        self.store.update_region(record.clone()).await?;
                        return Ok(record);
                    }

                    self.run_subtask(data_type, subtile, zoom).await;
                    completed += 1;
                    report(completed, &mut last_progress);
                }
            }
        }

        record.status = RegionStatus::Downloaded;
        record.size_bytes = self.store.region_size_bytes(&record).await;
        self.store.update_region(record.clone()).await?;
        info!(
            region = %record.id,
            size_bytes = record.size_bytes,
            "region download complete"
        );
        Ok(record)
    }

    /// One `(data type × sub-tile × zoom)` unit of work. Failures are
    /// logged and swallowed so the region keeps downloading.
    async fn run_subtask(&self, data_type: DataType, subtile: &GeoBounds, zoom: u8) {
        match data_type {
            DataType::Tile => {
                let tiles = match tiles_in_bounds(subtile, zoom) {
                    Ok(tiles) => tiles,
                    Err(error) => {
                        warn!(%error, zoom, "sub-tile enumeration failed, skipping");
                        return;
                    }
                };
                for coord in tiles.into_iter().take(self.config.max_tiles_per_subtile) {
                    match self
                        .coordinator
                        .download_tile_to_store(coord, Priority::PREFETCH)
                        .await
                    {
                        TileDownloadOutcome::Stored(bytes) => {
                            debug!(%coord, bytes, "tile stored for region");
                        }
                        TileDownloadOutcome::AlreadyStored => {}
                        TileDownloadOutcome::Skipped => {
                            warn!(%coord, "tile skipped during region download");
                        }
                    }
                }
            }
            _ => {
                if self
                    .coordinator
                    .download_geometry_to_store(data_type, subtile, zoom)
                    .await
                    .is_none()
                {
                    warn!(%data_type, zoom, "geometry sub-task skipped during region download");
                }
            }
        }
    }
}
