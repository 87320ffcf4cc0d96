//! Engine configuration.
//!
//! `EngineConfig` combines the per-component configurations into one
//! surface so all tiers are configured consistently, with builder-style
//! setters for the knobs callers usually touch.

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::TileCacheConfig;
use crate::coordinator::CoordinatorConfig;
use crate::decode::StyleSheet;
use crate::fetch::FetcherConfig;
use crate::region::DownloaderConfig;

/// Interval for the periodic maintenance sweep (expiry + disk budget).
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

/// Top-level configuration for [`MapDataEngine`](super::MapDataEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root for the region store's structured tables and rows.
    pub store_root: PathBuf,
    /// Tiered payload cache settings (disk root, budgets, TTL).
    pub cache: TileCacheConfig,
    /// Coordinator settings (bucket budgets, throttle, prefetch pacing).
    pub coordinator: CoordinatorConfig,
    /// Network fetcher settings (endpoints, retries, concurrency).
    pub fetcher: FetcherConfig,
    /// Region downloader settings.
    pub downloader: DownloaderConfig,
    /// Decode pool size; `None` sizes it to available cores − 1.
    pub decode_workers: Option<usize>,
    /// Maintenance sweep interval.
    pub sweep_interval: Duration,
    /// Style rules for vector tile rasterization.
    pub style: StyleSheet,
}

impl EngineConfig {
    /// Configuration rooted at a data directory: the payload cache lives
    /// under `<root>/cache`, the region store under `<root>/store`.
    pub fn new(data_root: PathBuf) -> Self {
        Self {
            store_root: data_root.join("store"),
            cache: TileCacheConfig {
                disk_root: data_root.join("cache"),
                ..TileCacheConfig::default()
            },
            coordinator: CoordinatorConfig::default(),
            fetcher: FetcherConfig::default(),
            downloader: DownloaderConfig::default(),
            decode_workers: None,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            style: StyleSheet::basic(),
        }
    }

    /// Configuration rooted at the platform cache directory.
    pub fn with_default_root() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("cartolayer");
        Self::new(root)
    }

    /// Set the disk cache byte budget.
    pub fn with_disk_budget(mut self, max_bytes: u64) -> Self {
        self.cache.disk_max_bytes = max_bytes;
        self
    }

    /// Set the memory tier entry budget.
    pub fn with_memory_items(mut self, max_items: u64) -> Self {
        self.cache.memory_max_items = max_items;
        self
    }

    /// Set the shared cache TTL (payload cache and bucket cache).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache.ttl = ttl;
        self.coordinator.ttl = ttl;
        self
    }

    /// Replace the fetcher configuration.
    pub fn with_fetcher(mut self, fetcher: FetcherConfig) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Set the coordinator's global inter-fetch throttle.
    pub fn with_min_fetch_interval(mut self, interval: Duration) -> Self {
        self.coordinator.min_fetch_interval = interval;
        self
    }

    /// Set the maintenance sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Replace the rasterization style.
    pub fn with_style(mut self, style: StyleSheet) -> Self {
        self.style = style;
        self
    }
}
