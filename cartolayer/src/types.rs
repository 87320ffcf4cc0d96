//! Core data model shared across the cache tiers.
//!
//! Cached payloads carry a closed tag ([`Payload`]) instead of opaque dynamic
//! values, so each cache tier handles every shape exhaustively at compile
//! time.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kinds of map data the engine caches and delivers.
///
/// Stable lowercase names are used in cache keys, on-disk paths, and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Raster or vector map tiles addressed by (z, x, y).
    Tile,
    /// Building footprint geometry.
    Building,
    /// Road network geometry.
    Road,
    /// Water body geometry.
    Water,
    /// Points of interest.
    Poi,
}

impl DataType {
    /// All data types, in stats/display order.
    pub const ALL: [DataType; 5] = [
        DataType::Tile,
        DataType::Building,
        DataType::Road,
        DataType::Water,
        DataType::Poi,
    ];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Tile => "tile",
            DataType::Building => "building",
            DataType::Road => "road",
            DataType::Water => "water",
            DataType::Poi => "poi",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tile" => Ok(DataType::Tile),
            "building" => Ok(DataType::Building),
            "road" => Ok(DataType::Road),
            "water" => Ok(DataType::Water),
            "poi" => Ok(DataType::Poi),
            other => Err(format!("unknown data type: {other}")),
        }
    }
}

/// Geometry kind of a single feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureKind {
    Point,
    Line,
    Polygon,
}

/// One geometric feature within a layer.
///
/// Coordinates are `(x, y)` pairs in whatever space the producing layer uses:
/// degrees for stored geometry, 256-unit tile-local coordinates for payloads
/// headed to the rasterizer. Points carry a single one-element ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub kind: FeatureKind,
    /// Outer ring first; holes follow for polygons.
    pub rings: Vec<Vec<(f64, f64)>>,
    /// Opaque source attributes, passed through untouched.
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A named group of features, e.g. `"buildings"` or `"roads"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryLayer {
    pub name: String,
    pub features: Vec<Feature>,
}

/// Structured geometry payload: the decoded form of a vector data response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometrySet {
    pub layers: Vec<GeometryLayer>,
}

impl GeometrySet {
    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(|l| l.features.is_empty())
    }

    /// Find a layer by name.
    pub fn layer(&self, name: &str) -> Option<&GeometryLayer> {
        self.layers.iter().find(|l| l.name == name)
    }
}

/// On-disk encoding tag for a payload, stored in the sidecar metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Bytes,
    Raster,
    Geometry,
}

/// A cacheable payload.
///
/// The closed set of shapes lets every cache tier match exhaustively instead
/// of inspecting dynamic values at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opaque bytes (undecoded vector tiles, protocol blobs).
    Bytes(Vec<u8>),
    /// An encoded raster image (PNG/JPEG tile).
    Raster(Vec<u8>),
    /// Structured geometry layers.
    Geometry(GeometrySet),
}

impl Payload {
    /// Encoding tag for sidecar metadata.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Bytes(_) => PayloadKind::Bytes,
            Payload::Raster(_) => PayloadKind::Raster,
            Payload::Geometry(_) => PayloadKind::Geometry,
        }
    }

    /// Serialized size in bytes, as counted against the disk budget.
    pub fn size_bytes(&self) -> u64 {
        match self {
            Payload::Bytes(b) | Payload::Raster(b) => b.len() as u64,
            Payload::Geometry(set) => serde_json::to_vec(set).map(|v| v.len()).unwrap_or(0) as u64,
        }
    }

    /// Serialize for disk storage. Byte payloads are stored verbatim,
    /// geometry as JSON.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Payload::Bytes(b) | Payload::Raster(b) => Ok(b.clone()),
            Payload::Geometry(set) => serde_json::to_vec(set),
        }
    }

    /// Reconstruct a payload from disk bytes and its sidecar tag.
    pub fn decode(kind: PayloadKind, bytes: Vec<u8>) -> Result<Self, serde_json::Error> {
        match kind {
            PayloadKind::Bytes => Ok(Payload::Bytes(bytes)),
            PayloadKind::Raster => Ok(Payload::Raster(bytes)),
            PayloadKind::Geometry => Ok(Payload::Geometry(serde_json::from_slice(&bytes)?)),
        }
    }

    /// Raw bytes for byte-shaped payloads, `None` for geometry.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Bytes(b) | Payload::Raster(b) => Some(b),
            Payload::Geometry(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_type_names_roundtrip() {
        for dt in DataType::ALL {
            assert_eq!(dt.as_str().parse::<DataType>().unwrap(), dt);
        }
    }

    #[test]
    fn data_type_rejects_unknown_name() {
        assert!("terrain".parse::<DataType>().is_err());
    }

    #[test]
    fn payload_kind_tags() {
        assert_eq!(Payload::Bytes(vec![1]).kind(), PayloadKind::Bytes);
        assert_eq!(Payload::Raster(vec![1]).kind(), PayloadKind::Raster);
        assert_eq!(
            Payload::Geometry(GeometrySet::default()).kind(),
            PayloadKind::Geometry
        );
    }

    #[test]
    fn bytes_payload_encodes_verbatim() {
        let payload = Payload::Bytes(vec![0xFF, 0xD8, 0xFF]);
        let encoded = payload.encode().unwrap();
        assert_eq!(encoded, vec![0xFF, 0xD8, 0xFF]);

        let decoded = Payload::decode(PayloadKind::Bytes, encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn geometry_payload_roundtrips_through_json() {
        let set = GeometrySet {
            layers: vec![GeometryLayer {
                name: "roads".into(),
                features: vec![Feature {
                    kind: FeatureKind::Line,
                    rings: vec![vec![(0.0, 0.0), (10.0, 20.0)]],
                    properties: serde_json::Map::new(),
                }],
            }],
        };
        let payload = Payload::Geometry(set.clone());

        let encoded = payload.encode().unwrap();
        let decoded = Payload::decode(PayloadKind::Geometry, encoded).unwrap();

        match decoded {
            Payload::Geometry(decoded_set) => assert_eq!(decoded_set, set),
            other => panic!("expected geometry, got {:?}", other.kind()),
        }
    }

    #[test]
    fn decode_rejects_malformed_geometry() {
        let result = Payload::decode(PayloadKind::Geometry, b"not json".to_vec());
        assert!(result.is_err());
    }

    #[test]
    fn size_counts_serialized_bytes() {
        let payload = Payload::Raster(vec![0u8; 1000]);
        assert_eq!(payload.size_bytes(), 1000);

        let geometry = Payload::Geometry(GeometrySet::default());
        assert_eq!(geometry.size_bytes(), geometry.encode().unwrap().len() as u64);
    }

    #[test]
    fn geometry_set_layer_lookup() {
        let set = GeometrySet {
            layers: vec![GeometryLayer {
                name: "buildings".into(),
                features: Vec::new(),
            }],
        };
        assert!(set.layer("buildings").is_some());
        assert!(set.layer("roads").is_none());
        assert!(set.is_empty());
    }
}
