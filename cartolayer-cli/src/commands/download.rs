//! Download command - fetch a region for offline use.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use cartolayer::coord::GeoBounds;
use cartolayer::region::{DownloadRequest, ProgressCallback, RegionArea};
use cartolayer::store::RegionStatus;
use cartolayer::types::DataType;

use super::common::{format_size, start_engine, DataTypeArg};
use crate::error::CliError;

/// Hard cap on the pre-download size estimate, overridable with --force.
const DEFAULT_MAX_BYTES: u64 = 200 * 1024 * 1024;

/// Arguments for the download command.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// Name for the downloaded region
    #[arg(long)]
    pub name: String,

    /// Center latitude (used with --lon and --radius-km)
    #[arg(long, allow_negative_numbers = true)]
    pub lat: Option<f64>,

    /// Center longitude (used with --lat and --radius-km)
    #[arg(long, allow_negative_numbers = true)]
    pub lon: Option<f64>,

    /// Radius around the center in kilometres
    #[arg(long)]
    pub radius_km: Option<f64>,

    /// Southern edge of an explicit bounding box
    #[arg(long, allow_negative_numbers = true)]
    pub min_lat: Option<f64>,

    /// Western edge of an explicit bounding box
    #[arg(long, allow_negative_numbers = true)]
    pub min_lon: Option<f64>,

    /// Northern edge of an explicit bounding box
    #[arg(long, allow_negative_numbers = true)]
    pub max_lat: Option<f64>,

    /// Eastern edge of an explicit bounding box
    #[arg(long, allow_negative_numbers = true)]
    pub max_lon: Option<f64>,

    /// Zoom levels to download, comma-separated
    #[arg(long, value_delimiter = ',', default_value = "13,14")]
    pub zoom: Vec<u8>,

    /// Data types to download, comma-separated (default: all)
    #[arg(long, value_delimiter = ',', value_enum)]
    pub types: Vec<DataTypeArg>,

    /// Download even when the size estimate exceeds the safety cap
    #[arg(long)]
    pub force: bool,
}

impl DownloadArgs {
    /// Resolve the area selector: center+radius or an explicit box.
    fn area(&self) -> Result<RegionArea, CliError> {
        match (self.lat, self.lon, self.radius_km) {
            (Some(lat), Some(lon), Some(radius_km)) => {
                return Ok(RegionArea::Center {
                    lat,
                    lon,
                    radius_km,
                });
            }
            (None, None, None) => {}
            _ => {
                return Err(CliError::Config(
                    "Center selection requires all of --lat, --lon, and --radius-km".to_string(),
                ));
            }
        }

        match (self.min_lat, self.min_lon, self.max_lat, self.max_lon) {
            (Some(min_lat), Some(min_lon), Some(max_lat), Some(max_lon)) => {
                let bounds = GeoBounds::new(min_lat, min_lon, max_lat, max_lon)
                    .map_err(|e| CliError::Config(format!("Invalid bounding box: {}", e)))?;
                Ok(RegionArea::Bounds(bounds))
            }
            _ => Err(CliError::Config(
                "Select an area with --lat/--lon/--radius-km or \
                 --min-lat/--min-lon/--max-lat/--max-lon"
                    .to_string(),
            )),
        }
    }

    fn data_types(&self) -> Vec<DataType> {
        if self.types.is_empty() {
            DataType::ALL.to_vec()
        } else {
            self.types.iter().map(|&t| DataType::from(t)).collect()
        }
    }
}

/// Run the download command.
pub async fn run(data_dir: Option<PathBuf>, args: DownloadArgs) -> Result<(), CliError> {
    if args.zoom.is_empty() {
        return Err(CliError::Config(
            "At least one zoom level is required".to_string(),
        ));
    }

    let area = args.area()?;
    let bounds = match area {
        RegionArea::Bounds(bounds) => bounds,
        RegionArea::Center {
            lat,
            lon,
            radius_km,
        } => GeoBounds::from_center(lat, lon, radius_km)
            .map_err(|e| CliError::Config(format!("Invalid center selection: {}", e)))?,
    };

    let engine = start_engine(data_dir).await?;

    let estimate = engine.estimate_region_size(&bounds, &args.zoom);
    if estimate > DEFAULT_MAX_BYTES && !args.force {
        engine.shutdown().await;
        return Err(CliError::Config(format!(
            "Estimated download size {} exceeds the {} cap. \
             Reduce the area or zoom levels, or pass --force.",
            format_size(estimate),
            format_size(DEFAULT_MAX_BYTES),
        )));
    }

    println!("Downloading region '{}'", args.name);
    println!(
        "  Area:      {:.4},{:.4} to {:.4},{:.4}",
        bounds.min_lat, bounds.min_lon, bounds.max_lat, bounds.max_lon
    );
    println!(
        "  Zoom:      {}",
        args.zoom
            .iter()
            .map(|z| z.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  Estimate:  ~{}", format_size(estimate));
    println!();
    println!("Press Ctrl+C to cancel");
    println!();

    // Ctrl+C cancels the download; the partial region is recorded as
    // cancelled rather than silently discarded.
    let cancel = CancellationToken::new();
    let cancel_handle = cancel.clone();
    ctrlc::set_handler(move || {
        println!();
        println!("Cancelling download...");
        cancel_handle.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let bar = ProgressBar::new(1000);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {percent:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let bar_handle = bar.clone();
    let on_progress: ProgressCallback = Arc::new(move |fraction: f64| {
        bar_handle.set_position((fraction * 1000.0).round() as u64);
    });

    let request = DownloadRequest {
        name: args.name.clone(),
        area,
        zoom_levels: args.zoom.clone(),
        data_types: args.data_types(),
    };

    let result = engine
        .download_region_cancellable(request, on_progress, cancel)
        .await;
    bar.finish_and_clear();

    let record = match result {
        Ok(record) => record,
        Err(e) => {
            engine.shutdown().await;
            return Err(e.into());
        }
    };

    match record.status {
        RegionStatus::Downloaded => {
            println!(
                "{} Region '{}' downloaded ({}, id {})",
                style("✓").green(),
                record.name,
                format_size(record.size_bytes),
                record.id
            );
        }
        RegionStatus::Cancelled => {
            println!(
                "{} Download cancelled ({} stored before cancellation)",
                style("✗").yellow(),
                format_size(record.size_bytes)
            );
        }
        status => {
            println!("Download finished with status {:?}", status);
        }
    }

    engine.shutdown().await;
    Ok(())
}
