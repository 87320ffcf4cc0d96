//! Composite cache keys.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::coord::{GeoBounds, TileCoord};
use crate::types::DataType;
use crate::zoom::ZoomBucket;

/// Composite key identifying a cached payload.
///
/// A key combines the data type, a spatial component, and the zoom bucket.
/// The spatial component is either a rounded bounds key (see
/// [`GeoBounds::key`]) or a `z/x/y` tile path; rounding collapses
/// near-identical viewports onto the same key, so two requests with matching
/// keys are cache-identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    data_type: DataType,
    spatial: String,
    bucket: ZoomBucket,
}

impl CacheKey {
    /// Key for a bounds-addressed payload at a continuous zoom.
    pub fn for_bounds(data_type: DataType, bounds: &GeoBounds, zoom: f64) -> Self {
        Self {
            data_type,
            spatial: bounds.key(),
            bucket: ZoomBucket::for_zoom(zoom),
        }
    }

    /// Key for a tile-addressed payload; the bucket derives from the tile's
    /// own zoom.
    pub fn for_tile(data_type: DataType, coord: TileCoord) -> Self {
        Self {
            data_type,
            spatial: coord.path_key(),
            bucket: ZoomBucket::for_zoom(coord.zoom as f64),
        }
    }

    /// Key with a caller-supplied spatial component.
    pub fn for_spatial(data_type: DataType, spatial: impl Into<String>, zoom: f64) -> Self {
        Self {
            data_type,
            spatial: spatial.into(),
            bucket: ZoomBucket::for_zoom(zoom),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn spatial(&self) -> &str {
        &self.spatial
    }

    pub fn bucket(&self) -> ZoomBucket {
        self.bucket
    }

    /// Canonical string form, `"{type}:{spatial}#b{bucket}"`.
    pub fn composite(&self) -> String {
        format!("{}:{}#b{}", self.data_type, self.spatial, self.bucket)
    }

    /// Filename stem for the disk tier: SHA-256 of the composite key.
    pub fn file_stem(&self) -> String {
        let digest = Sha256::digest(self.composite().as_bytes());
        let mut stem = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(stem, "{byte:02x}");
        }
        stem
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_keys_with_rounding_collision_are_equal() {
        let a = GeoBounds::new(37.77491, -122.41940, 37.78492, -122.40940).unwrap();
        let b = GeoBounds::new(37.77493, -122.41942, 37.78490, -122.40938).unwrap();

        let key_a = CacheKey::for_bounds(DataType::Building, &a, 14.2);
        let key_b = CacheKey::for_bounds(DataType::Building, &b, 14.7);

        assert_eq!(key_a, key_b);
        assert_eq!(key_a.file_stem(), key_b.file_stem());
    }

    #[test]
    fn different_types_never_collide() {
        let bounds = GeoBounds::new(37.77, -122.42, 37.78, -122.41).unwrap();
        let buildings = CacheKey::for_bounds(DataType::Building, &bounds, 14.0);
        let roads = CacheKey::for_bounds(DataType::Road, &bounds, 14.0);
        assert_ne!(buildings, roads);
    }

    #[test]
    fn different_buckets_never_collide() {
        let bounds = GeoBounds::new(37.77, -122.42, 37.78, -122.41).unwrap();
        let near = CacheKey::for_bounds(DataType::Road, &bounds, 16.0);
        let far = CacheKey::for_bounds(DataType::Road, &bounds, 8.0);
        assert_ne!(near, far);
    }

    #[test]
    fn tile_key_uses_path_form() {
        let key = CacheKey::for_tile(DataType::Tile, TileCoord::new(10, 5, 5));
        assert_eq!(key.spatial(), "10/5/5");
        assert_eq!(key.composite(), "tile:10/5/5#b2");
    }

    #[test]
    fn file_stem_is_hex_sha256() {
        let key = CacheKey::for_tile(DataType::Tile, TileCoord::new(10, 5, 5));
        let stem = key.file_stem();
        assert_eq!(stem.len(), 64);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
