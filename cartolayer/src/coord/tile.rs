//! Web Mercator tile coordinates.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{CoordError, GeoBounds, MAX_LAT, MIN_LAT, MIN_LON};

/// Maximum supported zoom level.
pub const MAX_ZOOM: u8 = 19;

/// A tile address in the standard XYZ grid.
///
/// - `x` increases eastward (0 to 2^zoom - 1)
/// - `y` increases southward (0 to 2^zoom - 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    /// Convert a geographic point to the tile containing it.
    ///
    /// # Errors
    ///
    /// Returns `CoordError` when the point is outside the Web Mercator range
    /// or the zoom exceeds [`MAX_ZOOM`].
    pub fn from_lat_lon(lat: f64, lon: f64, zoom: u8) -> Result<Self, CoordError> {
        if !(MIN_LAT..=MAX_LAT).contains(&lat) {
            return Err(CoordError::InvalidLatitude(lat));
        }
        if !(MIN_LON..=180.0).contains(&lon) {
            return Err(CoordError::InvalidLongitude(lon));
        }
        if zoom > MAX_ZOOM {
            return Err(CoordError::InvalidZoom(zoom));
        }

        let n = 2.0_f64.powi(zoom as i32);
        let max_index = (n as u32).saturating_sub(1);

        let x = (((lon + 180.0) / 360.0 * n) as u32).min(max_index);
        let lat_rad = lat * PI / 180.0;
        let y = ((((1.0 - lat_rad.tan().asinh() / PI) / 2.0) * n) as u32).min(max_index);

        Ok(Self { zoom, x, y })
    }

    /// Latitude/longitude of this tile's northwest corner.
    pub fn nw_corner(&self) -> (f64, f64) {
        let n = 2.0_f64.powi(self.zoom as i32);
        let lon = self.x as f64 / n * 360.0 - 180.0;
        let lat_rad = (PI * (1.0 - 2.0 * self.y as f64 / n)).sinh().atan();
        (lat_rad * 180.0 / PI, lon)
    }

    /// Geographic bounds covered by this tile.
    pub fn bounds(&self) -> GeoBounds {
        let (max_lat, min_lon) = self.nw_corner();
        let se = TileCoord::new(self.zoom, self.x + 1, self.y + 1);
        let (min_lat, max_lon) = se.nw_corner();
        GeoBounds {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    /// Path-style key `"{zoom}/{x}/{y}"` used for cache keys and file layout.
    pub fn path_key(&self) -> String {
        format!("{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "z{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Enumerate the tiles covering `bounds` at `zoom`, row-major from the
/// northwest corner.
///
/// # Errors
///
/// Propagates validation failures from the corner conversions.
pub fn tiles_in_bounds(bounds: &GeoBounds, zoom: u8) -> Result<Vec<TileCoord>, CoordError> {
    let nw = TileCoord::from_lat_lon(bounds.max_lat, bounds.min_lon, zoom)?;
    let se = TileCoord::from_lat_lon(bounds.min_lat, bounds.max_lon, zoom)?;

    let mut tiles = Vec::new();
    for y in nw.y..=se.y {
        for x in nw.x..=se.x {
            tiles.push(TileCoord::new(zoom, x, y));
        }
    }
    Ok(tiles)
}
