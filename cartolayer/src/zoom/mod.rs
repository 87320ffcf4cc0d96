//! Zoom classification and per-level rendering parameters.
//!
//! Two distinct discretizations of the continuous zoom value exist and must
//! not be conflated:
//!
//! - [`ZoomBucket`] (0-5) groups cache entries and is used only for cache
//!   partitioning.
//! - [`ZoomLevel`] (1-5) drives rendering-feature decisions (what to show,
//!   how much detail, whether to preload the next tier).
//!
//! Level transitions are edge-triggered: [`ZoomLevelManager`] notifies its
//! observer only when the discrete level changes, never on every continuous
//! zoom delta.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::DataType;

/// Coarse 0-5 grouping of continuous zoom used for cache partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoomBucket(pub u8);

impl ZoomBucket {
    /// Classify a continuous zoom value into its bucket.
    ///
    /// Thresholds: `<6 → 0`, `<9 → 1`, `<12 → 2`, `<15 → 3`, `<18 → 4`,
    /// else 5.
    pub fn for_zoom(zoom: f64) -> Self {
        let bucket = if zoom < 6.0 {
            0
        } else if zoom < 9.0 {
            1
        } else if zoom < 12.0 {
            2
        } else if zoom < 15.0 {
            3
        } else if zoom < 18.0 {
            4
        } else {
            5
        };
        ZoomBucket(bucket)
    }
}

impl fmt::Display for ZoomBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// App-facing rendering tier derived from continuous zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ZoomLevel {
    L1 = 1,
    L2 = 2,
    L3 = 3,
    L4 = 4,
    L5 = 5,
}

impl ZoomLevel {
    /// Classify a continuous zoom value into a rendering tier.
    ///
    /// Boundaries: `≤7 → 1`, `≤10 → 2`, `≤13 → 3`, `≤18 → 4`, else 5.
    pub fn classify(zoom: f64) -> Self {
        if zoom <= 7.0 {
            ZoomLevel::L1
        } else if zoom <= 10.0 {
            ZoomLevel::L2
        } else if zoom <= 13.0 {
            ZoomLevel::L3
        } else if zoom <= 18.0 {
            ZoomLevel::L4
        } else {
            ZoomLevel::L5
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// The next finer tier, saturating at [`ZoomLevel::L5`].
    pub fn next(&self) -> Self {
        match self {
            ZoomLevel::L1 => ZoomLevel::L2,
            ZoomLevel::L2 => ZoomLevel::L3,
            ZoomLevel::L3 => ZoomLevel::L4,
            ZoomLevel::L4 | ZoomLevel::L5 => ZoomLevel::L5,
        }
    }

    /// Data types worth requesting when rendering at this tier.
    pub fn relevant_data_types(&self) -> &'static [DataType] {
        match self {
            ZoomLevel::L1 => &[DataType::Tile, DataType::Water],
            ZoomLevel::L2 => &[DataType::Tile, DataType::Water, DataType::Road],
            ZoomLevel::L3 => &[DataType::Tile, DataType::Water, DataType::Road],
            ZoomLevel::L4 => &[
                DataType::Tile,
                DataType::Water,
                DataType::Road,
                DataType::Building,
            ],
            ZoomLevel::L5 => &[
                DataType::Tile,
                DataType::Water,
                DataType::Road,
                DataType::Building,
                DataType::Poi,
            ],
        }
    }

    /// Default camera tilt for this tier when not in explicit 2D mode.
    pub fn default_tilt(&self) -> f64 {
        match self {
            ZoomLevel::L1 => 0.0,
            ZoomLevel::L2 => 0.2,
            ZoomLevel::L3 => 0.4,
            ZoomLevel::L4 => 0.7,
            ZoomLevel::L5 => 0.8,
        }
    }
}

impl fmt::Display for ZoomLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Geometry detail resolution for a rendering tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Low,
    Medium,
    High,
}

/// Maximum camera tilt, clamped everywhere a tilt value is accepted.
pub const MAX_TILT: f64 = 0.8;

/// Feature flags and parameters the renderer derives from a zoom tier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParameters {
    pub show_buildings: bool,
    pub show_roads: bool,
    pub show_water: bool,
    pub show_parks: bool,
    pub show_pois: bool,
    pub render_3d: bool,
    pub detail_level: DetailLevel,
    /// Whether the next tier's data should be warmed in the background.
    pub preload_next_zoom: bool,
    pub tilt: f64,
}

impl RenderParameters {
    /// Parameters for a tier.
    ///
    /// In 2D mode buildings stay flat, tilt is zero, and 3D rendering is
    /// disabled regardless of tier.
    pub fn for_level(level: ZoomLevel, is_2d: bool) -> Self {
        let base = match level {
            ZoomLevel::L1 => Self {
                show_buildings: false,
                show_roads: false,
                show_water: true,
                show_parks: false,
                show_pois: false,
                render_3d: false,
                detail_level: DetailLevel::Low,
                preload_next_zoom: false,
                tilt: level.default_tilt(),
            },
            ZoomLevel::L2 => Self {
                show_buildings: false,
                show_roads: true,
                show_water: true,
                show_parks: true,
                show_pois: false,
                render_3d: false,
                detail_level: DetailLevel::Low,
                preload_next_zoom: true,
                tilt: level.default_tilt(),
            },
            ZoomLevel::L3 => Self {
                show_buildings: false,
                show_roads: true,
                show_water: true,
                show_parks: true,
                show_pois: false,
                render_3d: false,
                detail_level: DetailLevel::Medium,
                preload_next_zoom: true,
                tilt: level.default_tilt(),
            },
            ZoomLevel::L4 => Self {
                show_buildings: true,
                show_roads: true,
                show_water: true,
                show_parks: true,
                show_pois: false,
                render_3d: true,
                detail_level: DetailLevel::Medium,
                preload_next_zoom: true,
                tilt: level.default_tilt(),
            },
            ZoomLevel::L5 => Self {
                show_buildings: true,
                show_roads: true,
                show_water: true,
                show_parks: true,
                show_pois: true,
                render_3d: true,
                detail_level: DetailLevel::High,
                preload_next_zoom: false,
                tilt: level.default_tilt(),
            },
        };

        if is_2d {
            Self {
                render_3d: false,
                tilt: 0.0,
                ..base
            }
        } else {
            base
        }
    }
}

/// Callback invoked when the discrete zoom level changes.
pub type LevelChangeCallback = Box<dyn Fn(ZoomLevel) + Send + Sync>;

/// Tracks continuous zoom and fires edge-triggered level transitions.
pub struct ZoomLevelManager {
    zoom: f64,
    level: ZoomLevel,
    is_2d: bool,
    tilt_override: Option<f64>,
    on_level_change: Option<LevelChangeCallback>,
}

impl ZoomLevelManager {
    /// Create a manager at the given starting zoom.
    pub fn new(initial_zoom: f64) -> Self {
        Self {
            zoom: initial_zoom,
            level: ZoomLevel::classify(initial_zoom),
            is_2d: false,
            tilt_override: None,
            on_level_change: None,
        }
    }

    /// Register the observer notified on level transitions.
    pub fn on_level_change(&mut self, callback: LevelChangeCallback) {
        self.on_level_change = Some(callback);
    }

    /// Update the continuous zoom.
    ///
    /// Returns the new level when the discrete tier changed, `None`
    /// otherwise. The registered callback fires only on change.
    pub fn set_zoom(&mut self, zoom: f64) -> Option<ZoomLevel> {
        self.zoom = zoom;
        let level = ZoomLevel::classify(zoom);
        if level == self.level {
            return None;
        }
        self.level = level;
        if let Some(cb) = &self.on_level_change {
            cb(level);
        }
        Some(level)
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn level(&self) -> ZoomLevel {
        self.level
    }

    /// Switch between 2D and tilted rendering modes.
    pub fn set_2d_mode(&mut self, is_2d: bool) {
        self.is_2d = is_2d;
    }

    /// Override the tilt, clamped to `0.0..=`[`MAX_TILT`].
    pub fn set_tilt(&mut self, tilt: f64) {
        self.tilt_override = Some(tilt.clamp(0.0, MAX_TILT));
    }

    /// Clear any tilt override, returning to per-level defaults.
    pub fn reset_tilt(&mut self) {
        self.tilt_override = None;
    }

    /// Rendering parameters for the current level, honoring 2D mode and any
    /// tilt override.
    pub fn parameters(&self) -> RenderParameters {
        let mut params = RenderParameters::for_level(self.level, self.is_2d);
        if let Some(tilt) = self.tilt_override {
            if !self.is_2d {
                params.tilt = tilt;
            }
        }
        params
    }

    /// Data types to warm for the next tier, empty when the current tier
    /// does not preload.
    pub fn preload_data_types(&self) -> &'static [DataType] {
        if self.parameters().preload_next_zoom {
            self.level.next().relevant_data_types()
        } else {
            &[]
        }
    }
}

impl fmt::Debug for ZoomLevelManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZoomLevelManager")
            .field("zoom", &self.zoom)
            .field("level", &self.level)
            .field("is_2d", &self.is_2d)
            .field("tilt_override", &self.tilt_override)
            .finish()
    }
}
