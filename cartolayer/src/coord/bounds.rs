//! Geographic bounding boxes and spatial cache keys.

use serde::{Deserialize, Serialize};

use super::{CoordError, MAX_LAT, MAX_LON, MIN_LAT, MIN_LON};

/// Kilometres per degree of latitude (flat-earth approximation).
pub const KM_PER_DEGREE: f64 = 111.32;

/// Decimal places kept when deriving a spatial cache key (~100 m at 3).
///
/// Rounding is intentional: near-identical viewports collapse onto the same
/// key, which raises the cache hit rate.
pub const BOUNDS_KEY_PRECISION: u32 = 3;

/// A geographic bounding box in degrees.
///
/// Invariant: `min_lat < max_lat` and `min_lon < max_lon`, enforced by
/// [`GeoBounds::new`]. Two bounds whose [`GeoBounds::key`] values match are
/// treated as cache-identical regardless of sub-rounding differences in the
/// raw coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    /// Southern edge.
    pub min_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl GeoBounds {
    /// Create a validated bounding box.
    ///
    /// # Errors
    ///
    /// Returns `CoordError` if an edge is outside the Web Mercator range or
    /// the box has inverted/zero extent.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self, CoordError> {
        for lat in [min_lat, max_lat] {
            if !(MIN_LAT..=MAX_LAT).contains(&lat) {
                return Err(CoordError::InvalidLatitude(lat));
            }
        }
        for lon in [min_lon, max_lon] {
            if !(MIN_LON..=MAX_LON).contains(&lon) {
                return Err(CoordError::InvalidLongitude(lon));
            }
        }
        if min_lat >= max_lat || min_lon >= max_lon {
            return Err(CoordError::DegenerateBounds {
                min_lat,
                max_lat,
                min_lon,
                max_lon,
            });
        }
        Ok(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    /// Build bounds from a center point and radius in kilometres.
    ///
    /// Uses the flat-earth approximation: one degree of latitude is
    /// [`KM_PER_DEGREE`] km, and the longitude span is corrected by
    /// `cos(latitude)`.
    pub fn from_center(lat: f64, lon: f64, radius_km: f64) -> Result<Self, CoordError> {
        let lat_delta = radius_km / KM_PER_DEGREE;
        let lon_delta = radius_km / (KM_PER_DEGREE * lat.to_radians().cos().max(1e-6));
        Self::new(
            (lat - lat_delta).max(MIN_LAT),
            (lon - lon_delta).max(MIN_LON),
            (lat + lat_delta).min(MAX_LAT),
            (lon + lon_delta).min(MAX_LON),
        )
    }

    /// Center point `(lat, lon)`.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lon + self.max_lon) / 2.0,
        )
    }

    /// Spatial cache key with edges rounded to [`BOUNDS_KEY_PRECISION`]
    /// decimal places, e.g. `"37.775:-122.419:37.785:-122.409"`.
    pub fn key(&self) -> String {
        format!(
            "{:.p$}:{:.p$}:{:.p$}:{:.p$}",
            self.min_lat,
            self.min_lon,
            self.max_lat,
            self.max_lon,
            p = BOUNDS_KEY_PRECISION as usize
        )
    }

    /// Parse a bounds value back out of a spatial key.
    ///
    /// Returns `None` for malformed keys; used by cascade deletion to decide
    /// whether a stored row falls inside a region.
    pub fn from_key(key: &str) -> Option<Self> {
        let mut parts = key.split(':');
        let min_lat = parts.next()?.parse().ok()?;
        let min_lon = parts.next()?.parse().ok()?;
        let max_lat = parts.next()?.parse().ok()?;
        let max_lon = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Self::new(min_lat, min_lon, max_lat, max_lon).ok()
    }

    /// Whether `other` lies entirely within these bounds.
    pub fn contains(&self, other: &GeoBounds) -> bool {
        self.min_lat <= other.min_lat
            && self.min_lon <= other.min_lon
            && self.max_lat >= other.max_lat
            && self.max_lon >= other.max_lon
    }

    /// Whether a point lies within these bounds.
    pub fn contains_point(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    /// Area in square degrees.
    pub fn area(&self) -> f64 {
        (self.max_lat - self.min_lat) * (self.max_lon - self.min_lon)
    }

    /// Overlap area with `other` in square degrees, 0.0 when disjoint.
    pub fn intersection_area(&self, other: &GeoBounds) -> f64 {
        let lat = (self.max_lat.min(other.max_lat) - self.min_lat.max(other.min_lat)).max(0.0);
        let lon = (self.max_lon.min(other.max_lon) - self.min_lon.max(other.min_lon)).max(0.0);
        lat * lon
    }

    /// Approximate north-south extent in kilometres.
    pub fn height_km(&self) -> f64 {
        (self.max_lat - self.min_lat) * KM_PER_DEGREE
    }

    /// Approximate east-west extent in kilometres at the center latitude.
    pub fn width_km(&self) -> f64 {
        let (lat, _) = self.center();
        (self.max_lon - self.min_lon) * KM_PER_DEGREE * lat.to_radians().cos()
    }

    /// Split into a grid of sub-boxes no larger than `max_side_km` per side.
    ///
    /// Used by the region downloader to keep individual fetches bounded.
    /// Always returns at least one element (the bounds itself when already
    /// small enough).
    pub fn split(&self, max_side_km: f64) -> Vec<GeoBounds> {
        let rows = (self.height_km() / max_side_km).ceil().max(1.0) as usize;
        let cols = (self.width_km() / max_side_km).ceil().max(1.0) as usize;

        let lat_step = (self.max_lat - self.min_lat) / rows as f64;
        let lon_step = (self.max_lon - self.min_lon) / cols as f64;

        let mut out = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                let min_lat = self.min_lat + lat_step * r as f64;
                let min_lon = self.min_lon + lon_step * c as f64;
                if let Ok(sub) =
                    GeoBounds::new(min_lat, min_lon, min_lat + lat_step, min_lon + lon_step)
                {
                    out.push(sub);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf_bounds() -> GeoBounds {
        GeoBounds::new(37.70, -122.52, 37.83, -122.35).unwrap()
    }

    #[test]
    fn new_rejects_inverted_bounds() {
        let result = GeoBounds::new(38.0, -122.0, 37.0, -121.0);
        assert!(matches!(result, Err(CoordError::DegenerateBounds { .. })));
    }

    #[test]
    fn new_rejects_out_of_range_latitude() {
        let result = GeoBounds::new(-90.0, -122.0, 37.0, -121.0);
        assert!(matches!(result, Err(CoordError::InvalidLatitude(_))));
    }

    #[test]
    fn key_rounds_to_three_decimals() {
        let bounds = GeoBounds::new(37.7749295, -122.4194155, 37.7849295, -122.4094155).unwrap();
        assert_eq!(bounds.key(), "37.775:-122.419:37.785:-122.409");
    }

    #[test]
    fn near_identical_viewports_share_a_key() {
        let a = GeoBounds::new(37.77491, -122.41940, 37.78492, -122.40940).unwrap();
        let b = GeoBounds::new(37.77493, -122.41942, 37.78490, -122.40938).unwrap();
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn key_roundtrips_through_from_key() {
        let bounds = sf_bounds();
        let parsed = GeoBounds::from_key(&bounds.key()).unwrap();
        assert_eq!(parsed.key(), bounds.key());
    }

    #[test]
    fn from_key_rejects_malformed_input() {
        assert!(GeoBounds::from_key("not-a-key").is_none());
        assert!(GeoBounds::from_key("1.0:2.0:3.0").is_none());
        assert!(GeoBounds::from_key("1.0:2.0:3.0:4.0:5.0").is_none());
    }

    #[test]
    fn from_center_uses_flat_earth_approximation() {
        let bounds = GeoBounds::from_center(37.7749, -122.4194, 2.0).unwrap();

        let expected_lat_delta = 2.0 / KM_PER_DEGREE;
        assert!((bounds.max_lat - 37.7749 - expected_lat_delta).abs() < 1e-9);

        // Longitude delta widens with latitude.
        let lon_delta = bounds.max_lon - (-122.4194);
        assert!(lon_delta > expected_lat_delta);
    }

    #[test]
    fn containment() {
        let outer = sf_bounds();
        let inner = GeoBounds::new(37.75, -122.45, 37.78, -122.40).unwrap();
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(outer.contains_point(37.7749, -122.4194));
        assert!(!outer.contains_point(40.0, -122.4194));
    }

    #[test]
    fn intersection_area_is_zero_for_disjoint_boxes() {
        let a = GeoBounds::new(10.0, 10.0, 11.0, 11.0).unwrap();
        let b = GeoBounds::new(20.0, 20.0, 21.0, 21.0).unwrap();
        assert_eq!(a.intersection_area(&b), 0.0);
    }

    #[test]
    fn intersection_area_of_contained_box_is_its_area() {
        let outer = sf_bounds();
        let inner = GeoBounds::new(37.75, -122.45, 37.78, -122.40).unwrap();
        assert!((outer.intersection_area(&inner) - inner.area()).abs() < 1e-12);
    }

    #[test]
    fn split_small_box_returns_single_cell() {
        let bounds = GeoBounds::from_center(37.7749, -122.4194, 1.0).unwrap();
        let parts = bounds.split(4.0);
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn split_covers_parent_bounds() {
        let bounds = GeoBounds::from_center(37.7749, -122.4194, 10.0).unwrap();
        let parts = bounds.split(4.0);
        assert!(parts.len() > 1);

        for sub in &parts {
            assert!(bounds.contains(sub) || bounds.intersection_area(sub) > 0.0);
        }

        // The grid tiles the parent area without gaps.
        let total: f64 = parts.iter().map(|b| b.area()).sum();
        assert!((total - bounds.area()).abs() < 1e-9);
    }

    #[test]
    fn split_two_km_radius_into_four_subtiles() {
        // A 2 km radius region is ~4 km on a side; a 2 km grid gives 4 cells.
        let bounds = GeoBounds::from_center(37.7749, -122.4194, 2.0).unwrap();
        let parts = bounds.split(2.1);
        assert_eq!(parts.len(), 4);
    }
}
