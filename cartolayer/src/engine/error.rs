//! Engine lifecycle errors.

use thiserror::Error;

use crate::cache::CacheError;
use crate::fetch::FetchError;
use crate::store::StoreError;

/// Errors that can occur while starting or tearing down the engine.
///
/// Once running, only region downloads and deletions surface errors; every
/// other operation degrades to miss/fallback behavior.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failed to open the tiered payload cache.
    #[error("failed to open payload cache: {0}")]
    Cache(#[from] CacheError),

    /// Failed to open the region store.
    #[error("failed to open region store: {0}")]
    Store(#[from] StoreError),

    /// Failed to construct the HTTP client.
    #[error("failed to create HTTP client: {0}")]
    Http(#[from] FetchError),
}
