//! Logging infrastructure.
//!
//! Structured logging with console output and optional file output:
//! - console lines use compact single-line format with local timestamps
//! - file output (when a log directory is given) is ANSI-free
//! - configurable via the `RUST_LOG` environment variable

use std::fs;
use std::io;
use std::path::Path;

use time::macros::format_description;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::LocalTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Guard that must be kept alive for the duration of logging.
///
/// Dropping it flushes and closes the file writer.
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

/// Initialize console-only logging.
///
/// Safe to call once per process; returns an error string when a global
/// subscriber is already installed.
pub fn init_console() -> Result<LoggingGuard, String> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let timer = LocalTime::new(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_timer(timer)
                .with_ansi(true),
        )
        .try_init()
        .map_err(|e| e.to_string())?;

    Ok(LoggingGuard { _file_guard: None })
}

/// Initialize logging with console output plus a log file.
///
/// The log file is truncated at session start.
///
/// # Errors
///
/// Fails if the log directory cannot be created, the file cannot be
/// truncated, or a global subscriber is already installed.
pub fn init_with_file(log_dir: &Path, log_file: &str) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(log_dir)?;
    fs::write(log_dir.join(log_file), "")?;

    let file_appender = tracing_appender::rolling::never(log_dir, log_file);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let timer = LocalTime::new(format_description!(
        "[hour]:[minute]:[second].[subsecond digits:3]"
    ));
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking_file)
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_timer(timer)
                .with_ansi(true),
        )
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: Some(file_guard),
    })
}

/// Default log file name.
pub fn default_log_file() -> &'static str {
    "cartolayer.log"
}
