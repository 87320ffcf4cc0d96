//! Region and access-log record types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::coord::GeoBounds;

/// Lifecycle state of an offline region download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionStatus {
    Pending,
    Downloading,
    Downloaded,
    Cancelled,
    Error,
}

/// A named, bounded, multi-zoom-level offline download unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub id: String,
    pub name: String,
    pub bounds: GeoBounds,
    pub zoom_levels: BTreeSet<u8>,
    /// Unix seconds when the download started.
    pub downloaded_at: i64,
    /// Unix seconds after which the expiry sweep removes the region.
    pub expires_at: i64,
    /// Total stored payload bytes, updated as the download progresses.
    pub size_bytes: u64,
    pub status: RegionStatus,
}

impl RegionRecord {
    /// Create a pending record with a deterministic id derived from the
    /// name, rounded bounds, and creation time.
    pub fn new(
        name: impl Into<String>,
        bounds: GeoBounds,
        zoom_levels: impl IntoIterator<Item = u8>,
        created_at: i64,
        expires_at: i64,
    ) -> Self {
        let name = name.into();
        let digest = Sha256::digest(format!("{name}|{}|{created_at}", bounds.key()).as_bytes());
        let mut id = String::with_capacity(12);
        for byte in digest.iter().take(6) {
            use std::fmt::Write;
            let _ = write!(id, "{byte:02x}");
        }
        Self {
            id,
            name,
            bounds,
            zoom_levels: zoom_levels.into_iter().collect(),
            downloaded_at: created_at,
            expires_at,
            size_bytes: 0,
            status: RegionStatus::Pending,
        }
    }

    /// Whether this region makes `bounds` available offline at `zoom`.
    pub fn covers(&self, bounds: &GeoBounds, zoom: u8) -> bool {
        self.status == RegionStatus::Downloaded
            && self.zoom_levels.contains(&zoom)
            && self.bounds.contains(bounds)
    }
}

/// One row of the append-only region access log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessLogEntry {
    pub region_id: String,
    /// Unix seconds.
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> GeoBounds {
        GeoBounds::new(37.70, -122.52, 37.83, -122.35).unwrap()
    }

    #[test]
    fn new_record_is_pending_with_stable_id() {
        let a = RegionRecord::new("sf", bounds(), [13, 14], 1000, 2000);
        let b = RegionRecord::new("sf", bounds(), [13, 14], 1000, 2000);
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 12);
        assert_eq!(a.status, RegionStatus::Pending);
        assert_eq!(a.size_bytes, 0);
    }

    #[test]
    fn different_names_get_different_ids() {
        let a = RegionRecord::new("sf", bounds(), [13], 1000, 2000);
        let b = RegionRecord::new("oakland", bounds(), [13], 1000, 2000);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn covers_requires_downloaded_status() {
        let inner = GeoBounds::new(37.75, -122.45, 37.78, -122.40).unwrap();
        let mut record = RegionRecord::new("sf", bounds(), [13, 14], 1000, 2000);

        assert!(!record.covers(&inner, 13));
        record.status = RegionStatus::Downloaded;
        assert!(record.covers(&inner, 13));
        assert!(!record.covers(&inner, 12), "zoom not in set");

        let outside = GeoBounds::new(40.0, -80.0, 41.0, -79.0).unwrap();
        assert!(!record.covers(&outside, 13));
    }

    #[test]
    fn record_serde_roundtrip() {
        let mut record = RegionRecord::new("sf", bounds(), [13, 14], 1000, 2000);
        record.status = RegionStatus::Downloaded;
        record.size_bytes = 4096;

        let json = serde_json::to_string(&record).unwrap();
        let parsed: RegionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        assert!(json.contains("\"downloaded\""));
    }
}
