//! Network fetching: rate limiting, retries, offline detection, fallback.

mod client;
mod fallback;
mod fetcher;
mod gate;
mod pacer;
pub mod testing;

pub use client::{AsyncHttpClient, BoxFuture, ReqwestClient};
pub use fallback::{fallback_tile, FALLBACK_TILE_SIZE};
pub use fetcher::{FetchedTile, FetcherConfig, TileFetcher, TileSource};
pub use gate::{GatePermit, Priority, PriorityGate};
pub use pacer::HostPacer;

use thiserror::Error;

/// Errors from network fetching.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Non-2xx HTTP response.
    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// Connection-level failure (DNS, TCP, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// A newer request for the same tile replaced this pending completion.
    #[error("request superseded by a newer request for the same tile")]
    Superseded,

    /// The fetcher is in offline mode and the request type has no fallback.
    #[error("network is offline")]
    Offline,

    /// The response payload failed to decode.
    #[error("decode error: {0}")]
    Decode(String),

    /// The request URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether a retry with backoff is worthwhile.
    ///
    /// HTTP 429 and 5xx responses and transport-level failures are
    /// transient; everything else is terminal.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::HttpStatus { status, .. } => {
                *status == 429 || (500..=599).contains(status)
            }
            FetchError::Transport(_) => true,
            FetchError::Superseded
            | FetchError::Offline
            | FetchError::Decode(_)
            | FetchError::InvalidUrl(_) => false,
        }
    }
}
