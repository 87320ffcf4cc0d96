//! CLI error types.

use std::error::Error;
use std::fmt;

use cartolayer::engine::EngineError;
use cartolayer::region::RegionError;
use cartolayer::store::StoreError;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug)]
pub enum CliError {
    /// Invalid arguments or configuration.
    Config(String),
    /// Engine startup or teardown failed.
    Engine(EngineError),
    /// A region download failed.
    Download(RegionError),
    /// A region store operation failed.
    Store(StoreError),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::Engine(e) => write!(f, "engine error: {}", e),
            CliError::Download(e) => write!(f, "download failed: {}", e),
            CliError::Store(e) => write!(f, "store error: {}", e),
        }
    }
}

impl Error for CliError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CliError::Config(_) => None,
            CliError::Engine(e) => Some(e),
            CliError::Download(e) => Some(e),
            CliError::Store(e) => Some(e),
        }
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        CliError::Engine(e)
    }
}

impl From<RegionError> for CliError {
    fn from(e: RegionError) -> Self {
        CliError::Download(e)
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Store(e)
    }
}
