//! Vector tile decoding and rasterization.
//!
//! Raw vector payloads (optionally gzip-wrapped JSON geometry layers) are
//! decoded into [`GeometrySet`] values and rasterized onto a fixed 256×256
//! canvas according to a [`StyleSheet`].

mod pool;
mod raster;
mod style;

pub use pool::DecodePool;
pub use raster::rasterize;
pub use style::{StyleKind, StyleLayer, StyleSheet};

use std::io::Read;

use thiserror::Error;

/// Logical edge length of the tile canvas.
pub const TILE_CANVAS_SIZE: u32 = 256;

/// Errors from decoding or rasterizing a tile payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Gzip envelope could not be decompressed.
    #[error("gzip decompression failed: {0}")]
    Gzip(std::io::Error),

    /// Payload is not valid geometry JSON.
    #[error("geometry parse failed: {0}")]
    Parse(#[from] serde_json::Error),

    /// Rasterization failed.
    #[error("rasterization failed: {0}")]
    Raster(String),
}

/// Decode raw payload bytes into geometry layers.
///
/// Gzip-wrapped payloads are detected by magic bytes and decompressed
/// transparently.
pub fn decode_geometry(bytes: &[u8]) -> Result<crate::types::GeometrySet, DecodeError> {
    if bytes.starts_with(&[0x1F, 0x8B]) {
        let mut decoder = flate2::read::GzDecoder::new(bytes);
        let mut inflated = Vec::new();
        decoder
            .read_to_end(&mut inflated)
            .map_err(DecodeError::Gzip)?;
        Ok(serde_json::from_slice(&inflated)?)
    } else {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Decode a raw payload and rasterize it in one step.
pub fn decode_and_rasterize(bytes: &[u8], style: &StyleSheet) -> Result<Vec<u8>, DecodeError> {
    let set = decode_geometry(bytes)?;
    rasterize(&set, style)
}
