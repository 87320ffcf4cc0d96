//! Geographic coordinate types and conversions.
//!
//! Provides conversions between geographic coordinates (latitude/longitude)
//! and Web Mercator tile coordinates, plus the bounding-box type used to key
//! cached map data.

mod bounds;
mod tile;

pub use bounds::{GeoBounds, BOUNDS_KEY_PRECISION, KM_PER_DEGREE};
pub use tile::{tiles_in_bounds, TileCoord, MAX_ZOOM};

use thiserror::Error;

/// Maximum latitude representable in Web Mercator.
pub const MAX_LAT: f64 = 85.05112878;
/// Minimum latitude representable in Web Mercator.
pub const MIN_LAT: f64 = -85.05112878;
/// Minimum longitude.
pub const MIN_LON: f64 = -180.0;
/// Maximum longitude.
pub const MAX_LON: f64 = 180.0;

/// Errors from coordinate validation and conversion.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoordError {
    /// Latitude outside the Web Mercator range.
    #[error("invalid latitude: {0}")]
    InvalidLatitude(f64),

    /// Longitude outside [-180, 180].
    #[error("invalid longitude: {0}")]
    InvalidLongitude(f64),

    /// Zoom level beyond the supported maximum.
    #[error("invalid zoom level: {0}")]
    InvalidZoom(u8),

    /// Bounding box with inverted or zero extent.
    #[error("degenerate bounds: south {min_lat} / north {max_lat}, west {min_lon} / east {max_lon}")]
    DegenerateBounds {
        min_lat: f64,
        max_lat: f64,
        min_lon: f64,
        max_lon: f64,
    },
}
