//! Cartolayer CLI - offline region downloads and cache maintenance.
//!
//! This binary provides a command-line interface to the Cartolayer library.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::{cache, download, regions};

#[derive(Debug, Parser)]
#[command(
    name = "cartolayer",
    version,
    about = "Offline map region downloads and cache maintenance"
)]
struct Cli {
    /// Data directory for the cache and region store (defaults to the
    /// platform cache directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a region for offline use
    Download(download::DownloadArgs),

    /// List and delete offline regions
    Regions {
        #[command(subcommand)]
        action: regions::RegionsAction,
    },

    /// Cache statistics and maintenance
    Cache {
        #[command(subcommand)]
        action: cache::CacheAction,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Install the tracing subscriber before any command touches the engine.
    let _logging = match cartolayer::logging::init_console() {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: failed to initialize logging: {}", e);
            None
        }
    };

    let result = match cli.command {
        Commands::Download(args) => download::run(cli.data_dir, args).await,
        Commands::Regions { action } => regions::run(cli.data_dir, action).await,
        Commands::Cache { action } => cache::run(cli.data_dir, action).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
