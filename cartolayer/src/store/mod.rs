//! Structured persistent store for tiles, geometry layers, offline regions,
//! and the region access log.
//!
//! The store exclusively owns all on-disk state. Layout under the store
//! root:
//!
//! ```text
//! tiles/{source}/{z}/{x}/{y}.bin      raw tile payloads
//! geometry/{type}/{zoom}/{key}.json   geometry layers keyed by rounded bounds
//! regions.json                        region-record table
//! access_log.json                     append-only access log
//! ```
//!
//! All table mutations funnel through one `tokio::sync::Mutex`, so writes
//! are never interleaved. Read errors are absorbed: a failing disk returns
//! "not found" and callers degrade to a network fetch.

mod records;

pub use records::{AccessLogEntry, RegionRecord, RegionStatus};

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::clock::SharedClock;
use crate::coord::{tiles_in_bounds, GeoBounds, TileCoord};
use crate::types::{DataType, GeometrySet};

/// Errors surfaced by store mutations.
///
/// Reads never produce these; they degrade to `None`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("region not found: {0}")]
    RegionNotFound(String),

    #[error("background task failed: {0}")]
    Background(String),
}

#[derive(Default)]
struct Tables {
    regions: HashMap<String, RegionRecord>,
    access_log: Vec<AccessLogEntry>,
}

/// Persistent region store.
pub struct RegionStore {
    root: PathBuf,
    tables: Mutex<Tables>,
    clock: SharedClock,
}

impl RegionStore {
    /// Open (creating if needed) a store rooted at `root`, loading any
    /// existing tables. Corrupt table files are replaced with empty tables
    /// rather than failing the open.
    pub fn open(root: PathBuf, clock: SharedClock) -> Result<Self, StoreError> {
        std::fs::create_dir_all(root.join("tiles"))?;
        std::fs::create_dir_all(root.join("geometry"))?;

        let regions: HashMap<String, RegionRecord> =
            load_table(&root.join("regions.json")).unwrap_or_default();
        let access_log: Vec<AccessLogEntry> =
            load_table(&root.join("access_log.json")).unwrap_or_default();

        Ok(Self {
            root,
            tables: Mutex::new(Tables {
                regions,
                access_log,
            }),
            clock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ── tile rows ────────────────────────────────────────────────────────

    fn tile_path(&self, coord: TileCoord, source: &str) -> PathBuf {
        self.root
            .join("tiles")
            .join(source)
            .join(coord.zoom.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.bin", coord.y))
    }

    /// Upsert a tile payload.
    pub async fn put_tile(
        &self,
        coord: TileCoord,
        source: &str,
        bytes: Vec<u8>,
    ) -> Result<(), StoreError> {
        let path = self.tile_path(coord, source);
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, bytes)
        })
        .await
        .map_err(|e| StoreError::Background(e.to_string()))??;
        Ok(())
    }

    /// Read a tile payload; storage errors degrade to `None`.
    pub async fn get_tile(&self, coord: TileCoord, source: &str) -> Option<Vec<u8>> {
        let path = self.tile_path(coord, source);
        tokio::task::spawn_blocking(move || match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "tile read failed, treating as miss");
                None
            }
        })
        .await
        .unwrap_or(None)
    }

    pub async fn has_tile(&self, coord: TileCoord, source: &str) -> bool {
        let path = self.tile_path(coord, source);
        tokio::task::spawn_blocking(move || path.exists())
            .await
            .unwrap_or(false)
    }

    // ── geometry rows ────────────────────────────────────────────────────

    fn geometry_path(&self, data_type: DataType, zoom: u8, bounds: &GeoBounds) -> PathBuf {
        self.root
            .join("geometry")
            .join(data_type.as_str())
            .join(zoom.to_string())
            .join(format!("{}.json", bounds.key()))
    }

    /// Upsert a geometry layer payload keyed by rounded bounds and zoom.
    pub async fn put_geometry(
        &self,
        data_type: DataType,
        zoom: u8,
        bounds: &GeoBounds,
        set: &GeometrySet,
    ) -> Result<(), StoreError> {
        let path = self.geometry_path(data_type, zoom, bounds);
        let bytes = serde_json::to_vec(set)?;
        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, bytes)
        })
        .await
        .map_err(|e| StoreError::Background(e.to_string()))??;
        Ok(())
    }

    /// Read a geometry layer payload.
    ///
    /// Identical viewport requests collide deterministically because the key
    /// is built from rounded bounds. Unreadable or malformed rows are
    /// reported as missing.
    pub async fn get_geometry(
        &self,
        data_type: DataType,
        zoom: u8,
        bounds: &GeoBounds,
    ) -> Option<GeometrySet> {
        let path = self.geometry_path(data_type, zoom, bounds);
        tokio::task::spawn_blocking(move || {
            let bytes = std::fs::read(&path).ok()?;
            match serde_json::from_slice(&bytes) {
                Ok(set) => Some(set),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "malformed geometry row, treating as miss");
                    None
                }
            }
        })
        .await
        .unwrap_or(None)
    }

    // ── region records ───────────────────────────────────────────────────

    /// Insert or replace a region record.
    pub async fn register_region(&self, record: RegionRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.regions.insert(record.id.clone(), record);
        self.persist(&tables).await
    }

    /// Update an existing record (same as register; kept for intent).
    pub async fn update_region(&self, record: RegionRecord) -> Result<(), StoreError> {
        self.register_region(record).await
    }

    /// All region records, unordered.
    pub async fn get_regions(&self) -> Vec<RegionRecord> {
        self.tables.lock().await.regions.values().cloned().collect()
    }

    pub async fn get_region(&self, id: &str) -> Option<RegionRecord> {
        self.tables.lock().await.regions.get(id).cloned()
    }

    /// Whether some downloaded region fully covers `bounds` at `zoom`.
    pub async fn is_region_available(&self, bounds: &GeoBounds, zoom: u8) -> bool {
        self.tables
            .lock()
            .await
            .regions
            .values()
            .any(|r| r.covers(bounds, zoom))
    }

    /// Delete a region and cascade to every tile, geometry, and access-log
    /// row falling inside its bounds × zoom levels.
    pub async fn delete_region(&self, id: &str) -> Result<(), StoreError> {
        let record = {
            let mut tables = self.tables.lock().await;
            let record = tables
                .regions
                .remove(id)
                .ok_or_else(|| StoreError::RegionNotFound(id.to_string()))?;
            tables.access_log.retain(|e| e.region_id != id);
            self.persist(&tables).await?;
            record
        };

        self.delete_region_rows(&record).await;
        Ok(())
    }

    /// Append an access-log row for a region.
    pub async fn log_access(&self, region_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.regions.contains_key(region_id) {
            return Err(StoreError::RegionNotFound(region_id.to_string()));
        }
        tables.access_log.push(AccessLogEntry {
            region_id: region_id.to_string(),
            timestamp: self.clock.now_unix(),
        });
        self.persist(&tables).await
    }

    /// Regions ranked by total access count, most first.
    pub async fn most_accessed(&self, limit: usize) -> Vec<RegionRecord> {
        let tables = self.tables.lock().await;
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for entry in &tables.access_log {
            *counts.entry(entry.region_id.as_str()).or_insert(0) += 1;
        }
        let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
            .into_iter()
            .take(limit)
            .filter_map(|(id, _)| tables.regions.get(id).cloned())
            .collect()
    }

    /// Regions ranked by most recent access, newest first.
    pub async fn recently_accessed(&self, limit: usize) -> Vec<RegionRecord> {
        let tables = self.tables.lock().await;
        let mut latest: HashMap<&str, i64> = HashMap::new();
        for entry in &tables.access_log {
            let slot = latest.entry(entry.region_id.as_str()).or_insert(i64::MIN);
            *slot = (*slot).max(entry.timestamp);
        }
        let mut ranked: Vec<(&str, i64)> = latest.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
            .into_iter()
            .take(limit)
            .filter_map(|(id, _)| tables.regions.get(id).cloned())
            .collect()
    }

    /// Delete every region whose `expires_at` has passed, with the same
    /// cascade as [`RegionStore::delete_region`]. Returns deleted ids.
    pub async fn clear_expired(&self) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now_unix();
        let expired: Vec<String> = {
            let tables = self.tables.lock().await;
            tables
                .regions
                .values()
                .filter(|r| r.expires_at < now)
                .map(|r| r.id.clone())
                .collect()
        };
        for id in &expired {
            debug!(region = %id, "expiring region");
            self.delete_region(id).await?;
        }
        Ok(expired)
    }

    /// Sum the stored payload bytes belonging to a region.
    pub async fn region_size_bytes(&self, record: &RegionRecord) -> u64 {
        let root = self.root.clone();
        let bounds = record.bounds;
        let zooms: Vec<u8> = record.zoom_levels.iter().copied().collect();
        tokio::task::spawn_blocking(move || {
            let mut total = 0u64;
            for_each_region_row(&root, &bounds, &zooms, |path| {
                if let Ok(meta) = std::fs::metadata(path) {
                    total += meta.len();
                }
            });
            total
        })
        .await
        .unwrap_or(0)
    }

    async fn delete_region_rows(&self, record: &RegionRecord) {
        let root = self.root.clone();
        let bounds = record.bounds;
        let zooms: Vec<u8> = record.zoom_levels.iter().copied().collect();
        let result = tokio::task::spawn_blocking(move || {
            let mut removed = 0usize;
            for_each_region_row(&root, &bounds, &zooms, |path| {
                if std::fs::remove_file(path).is_ok() {
                    removed += 1;
                }
            });
            removed
        })
        .await;
        match result {
            Ok(removed) => debug!(region = %record.id, removed, "cascade delete complete"),
            Err(e) => warn!(region = %record.id, error = %e, "cascade delete task failed"),
        }
    }

    async fn persist(&self, tables: &Tables) -> Result<(), StoreError> {
        write_table(&self.root.join("regions.json"), &tables.regions)?;
        write_table(&self.root.join("access_log.json"), &tables.access_log)?;
        Ok(())
    }
}

/// Visit every stored row (tile or geometry file) inside `bounds` at the
/// given zoom levels.
fn for_each_region_row(
    root: &Path,
    bounds: &GeoBounds,
    zooms: &[u8],
    mut visit: impl FnMut(&Path),
) {
    // Tile rows: every source directory is checked against the region's
    // covering tile set at each zoom level.
    let tiles_root = root.join("tiles");
    if let Ok(sources) = std::fs::read_dir(&tiles_root) {
        for source in sources.flatten() {
            for &zoom in zooms {
                let Ok(tiles) = tiles_in_bounds(bounds, zoom) else {
                    continue;
                };
                for tile in tiles {
                    let path = source
                        .path()
                        .join(tile.zoom.to_string())
                        .join(tile.x.to_string())
                        .join(format!("{}.bin", tile.y));
                    if path.exists() {
                        visit(&path);
                    }
                }
            }
        }
    }

    // Geometry rows: parse each row's bounds key and test containment.
    let geometry_root = root.join("geometry");
    for data_type in DataType::ALL {
        for &zoom in zooms {
            let dir = geometry_root.join(data_type.as_str()).join(zoom.to_string());
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                if let Some(row_bounds) = GeoBounds::from_key(stem) {
                    if bounds.contains(&row_bounds) || bounds.intersection_area(&row_bounds) > 0.0 {
                        visit(&path);
                    }
                }
            }
        }
    }
}

fn load_table<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(table) => Some(table),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt table file, starting empty");
            None
        }
    }
}

/// Atomic table write: temp file then rename.
fn write_table<T: Serialize>(path: &Path, table: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(table)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
