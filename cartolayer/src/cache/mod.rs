//! Tiered payload cache: in-memory LRU over a disk-backed store.
//!
//! The memory tier is a volatile projection and may be dropped at any time
//! without data loss; the disk tier owns the persisted files. Both tiers
//! share one absolute TTL measured from entry creation.

mod disk;
mod key;
mod memory;
mod tiered;

pub use disk::{DiskCache, Sidecar};
pub use key::CacheKey;
pub use memory::{MemoryCache, StoredEntry};
pub use tiered::TileCache;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Default TTL for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

/// Default process-wide memory tier budget, in entries.
pub const DEFAULT_MEMORY_MAX_ITEMS: u64 = 100;

/// Default disk tier budget, in payload bytes.
pub const DEFAULT_DISK_MAX_BYTES: u64 = 200 * 1024 * 1024;

/// Default bound on concurrent blocking disk operations.
pub const DEFAULT_MAX_CONCURRENT_IO: usize = 32;

/// Errors from cache operations.
///
/// Lookup paths never surface these; a failing read degrades to a miss.
/// Writes report them so callers can log and move on.
#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O failure writing an entry.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload or sidecar (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The cache is shutting down and rejects new work.
    #[error("cache is shutting down")]
    ShuttingDown,

    /// A background blocking task failed to complete.
    #[error("background task failed: {0}")]
    Background(String),
}

/// Configuration for [`TileCache`].
#[derive(Debug, Clone)]
pub struct TileCacheConfig {
    /// Root directory for the disk tier.
    pub disk_root: PathBuf,
    /// Disk budget in payload bytes.
    pub disk_max_bytes: u64,
    /// Memory tier budget in entries.
    pub memory_max_items: u64,
    /// Absolute TTL from entry creation.
    pub ttl: Duration,
    /// Bound on concurrent blocking disk operations.
    pub max_concurrent_io: usize,
}

impl Default for TileCacheConfig {
    fn default() -> Self {
        Self {
            disk_root: std::env::temp_dir().join("cartolayer-cache"),
            disk_max_bytes: DEFAULT_DISK_MAX_BYTES,
            memory_max_items: DEFAULT_MEMORY_MAX_ITEMS,
            ttl: DEFAULT_TTL,
            max_concurrent_io: DEFAULT_MAX_CONCURRENT_IO,
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default)]
pub struct TileCacheStats {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub memory_entries: u64,
    pub disk_entries: u64,
    pub disk_size_bytes: u64,
    pub disk_max_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = TileCacheConfig::default();
        assert_eq!(config.disk_max_bytes, 200 * 1024 * 1024);
        assert_eq!(config.memory_max_items, 100);
        assert_eq!(config.ttl, Duration::from_secs(7 * 24 * 3600));
    }

    #[test]
    fn cache_error_display() {
        let err = CacheError::ShuttingDown;
        assert_eq!(err.to_string(), "cache is shutting down");

        let io: CacheError =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(io.to_string().contains("I/O error"));
    }
}
