//! Region management CLI commands.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Subcommand;
use console::style;

use cartolayer::store::{RegionRecord, RegionStatus};

use super::common::{format_size, start_engine};
use crate::error::CliError;

/// Region action subcommands.
#[derive(Debug, Subcommand)]
pub enum RegionsAction {
    /// List downloaded regions
    List,
    /// Delete a region and all of its stored data
    Delete {
        /// Region id (see `regions list`)
        id: String,
    },
}

/// Run a regions subcommand.
pub async fn run(data_dir: Option<PathBuf>, action: RegionsAction) -> Result<(), CliError> {
    let engine = start_engine(data_dir).await?;

    let result = match action {
        RegionsAction::List => {
            let regions = engine.get_downloaded_regions().await;
            print_regions(&regions);
            Ok(())
        }
        RegionsAction::Delete { id } => match engine.delete_region(&id).await {
            Ok(()) => {
                println!("Deleted region {}", id);
                Ok(())
            }
            Err(e) => Err(CliError::Store(e)),
        },
    };

    engine.shutdown().await;
    result
}

fn print_regions(regions: &[RegionRecord]) {
    if regions.is_empty() {
        println!("No regions downloaded.");
        return;
    }

    println!(
        "{:<14} {:<20} {:<12} {:<12} {:>10}  {}",
        "ID", "NAME", "STATUS", "ZOOM", "SIZE", "EXPIRES"
    );
    for region in regions {
        let zooms = region
            .zoom_levels
            .iter()
            .map(|z| z.to_string())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<14} {:<20} {:<12} {:<12} {:>10}  {}",
            region.id,
            region.name,
            status_label(region.status),
            zooms,
            format_size(region.size_bytes),
            expiry_label(region.expires_at),
        );
    }
}

fn status_label(status: RegionStatus) -> String {
    match status {
        RegionStatus::Downloaded => style("downloaded").green().to_string(),
        RegionStatus::Downloading => style("downloading").cyan().to_string(),
        RegionStatus::Pending => "pending".to_string(),
        RegionStatus::Cancelled => style("cancelled").yellow().to_string(),
        RegionStatus::Error => style("error").red().to_string(),
    }
}

/// Days until the expiry sweep removes the region.
fn expiry_label(expires_at: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let remaining = expires_at - now;
    if remaining <= 0 {
        "expired".to_string()
    } else {
        format!("in {}d", remaining / 86_400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_label_marks_past_timestamps() {
        assert_eq!(expiry_label(0), "expired");
    }
}
