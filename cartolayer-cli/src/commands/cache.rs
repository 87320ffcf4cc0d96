//! Cache management CLI commands.

use std::path::PathBuf;

use clap::Subcommand;

use cartolayer::types::DataType;

use super::common::{data_root, format_size, start_engine, DataTypeArg};
use crate::error::CliError;

/// Cache action subcommands.
#[derive(Debug, Subcommand)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Clear cached data, either everything or one data type
    Clear {
        /// Only clear entries of this data type
        #[arg(long, value_enum)]
        data_type: Option<DataTypeArg>,
    },
}

/// Run a cache subcommand.
pub async fn run(data_dir: Option<PathBuf>, action: CacheAction) -> Result<(), CliError> {
    let root = data_root(data_dir.clone());
    let engine = start_engine(data_dir).await?;

    match action {
        CacheAction::Stats => {
            let stats = engine.cache_stats().await;
            println!("Cache: {}", root.display());
            println!("  Requests:    {}", stats.requests);
            println!("  Hits:        {}", stats.hits);
            println!("  Hit rate:    {:.1}%", stats.hit_rate * 100.0);
            println!("  Disk size:   {}", format_size(stats.disk_size_bytes));
            println!("  Memory:      {} entries", stats.memory_entries);
            println!("  Queue depth: {}", stats.queue_depth);
            if !stats.by_type.is_empty() {
                println!("  By type:");
                for data_type in DataType::ALL {
                    if let Some(t) = stats.by_type.get(&data_type) {
                        println!(
                            "    {:<10} {} requests, {} hits",
                            data_type, t.requests, t.hits
                        );
                    }
                }
            }
        }
        CacheAction::Clear { data_type } => match data_type {
            Some(arg) => {
                let data_type = DataType::from(arg);
                engine.clear_type(data_type).await;
                println!("Cleared cached {} data", data_type);
            }
            None => {
                engine.clear_all().await;
                println!("Cleared all cached data at {}", root.display());
            }
        },
    }

    engine.shutdown().await;
    Ok(())
}
