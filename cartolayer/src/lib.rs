//! Cartolayer - client-side geospatial data caching and delivery.
//!
//! This library fetches, caches, persists, and evicts map data (raster and
//! vector tiles, building/road/water/POI geometry) across zoom
//! granularities, supports fully offline regions, and shields the network
//! from redundant or excessive requests.
//!
//! # Architecture
//!
//! - [`cache`] - tiered memory/disk payload cache with absolute TTLs and
//!   size-bound eviction
//! - [`store`] - structured persistent store for tiles, geometry layers,
//!   offline-region records, and the access log
//! - [`coordinator`] - zoom-bucketed request routing with a debounced,
//!   priority-ordered prefetch queue
//! - [`fetch`] - rate-limited network fetcher with bounded concurrency,
//!   offline detection, and fallback tile synthesis
//! - [`decode`] - parallel vector tile decoding and rasterization
//! - [`zoom`] - continuous-zoom classification into rendering tiers
//! - [`region`] - offline region downloads with progress and cancellation
//! - [`engine`] - the dependency-injected service facade tying it together
//!
//! # Example
//!
//! ```ignore
//! use cartolayer::engine::{EngineConfig, MapDataEngine};
//! use cartolayer::coord::TileCoord;
//!
//! let engine = MapDataEngine::start(EngineConfig::with_default_root())?;
//! let tile = engine.tile_image(TileCoord::new(13, 1310, 3166)).await;
//! engine.shutdown().await;
//! ```

pub mod cache;
pub mod clock;
pub mod coord;
pub mod coordinator;
pub mod decode;
pub mod engine;
pub mod fetch;
pub mod logging;
pub mod region;
pub mod store;
pub mod tasks;
pub mod types;
pub mod zoom;

pub use engine::{CacheStats, EngineConfig, EngineError, MapDataEngine};
pub use types::{DataType, Payload};
