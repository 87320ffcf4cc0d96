//! Common types and utilities shared across CLI commands.

use std::path::PathBuf;

use clap::ValueEnum;
use tracing::debug;

use cartolayer::engine::{EngineConfig, MapDataEngine};
use cartolayer::types::DataType;

use crate::error::CliError;

/// Map data type selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum DataTypeArg {
    /// Raster/vector map tiles
    Tile,
    /// Building footprint geometry
    Building,
    /// Road network geometry
    Road,
    /// Water body geometry
    Water,
    /// Points of interest
    Poi,
}

impl From<DataTypeArg> for DataType {
    fn from(arg: DataTypeArg) -> Self {
        match arg {
            DataTypeArg::Tile => DataType::Tile,
            DataTypeArg::Building => DataType::Building,
            DataTypeArg::Road => DataType::Road,
            DataTypeArg::Water => DataType::Water,
            DataTypeArg::Poi => DataType::Poi,
        }
    }
}

/// Resolve the data directory: CLI argument, then the platform cache dir.
pub fn data_root(cli_dir: Option<PathBuf>) -> PathBuf {
    cli_dir.unwrap_or_else(|| {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("cartolayer")
    })
}

/// Start the engine rooted at the resolved data directory.
pub async fn start_engine(cli_dir: Option<PathBuf>) -> Result<MapDataEngine, CliError> {
    let root = data_root(cli_dir);
    debug!(root = %root.display(), "starting engine");
    let engine = MapDataEngine::start(EngineConfig::new(root))?;
    Ok(engine)
}

/// Human-readable byte size for display.
pub fn format_size(bytes: u64) -> String {
    const GB: u64 = 1024 * 1024 * 1024;
    const MB: u64 = 1024 * 1024;
    const KB: u64 = 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_size_picks_unit() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024 / 2), "1.5 GB");
    }

    #[test]
    fn data_root_prefers_cli_argument() {
        let root = data_root(Some(PathBuf::from("/tmp/custom")));
        assert_eq!(root, PathBuf::from("/tmp/custom"));
    }
}
