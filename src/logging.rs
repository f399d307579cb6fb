//! Structured logging with tracing.
//!
//! Every event goes to the console and is appended to a log file. `HOARD_LOG`
//! overrides the configured level with a full `EnvFilter` directive.

use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{BackupError, Result};

pub const LOG_ENV: &str = "HOARD_LOG";

/// Install the global subscriber. Keep the returned guard alive for the life
/// of the process or buffered file output is lost.
pub fn init_logging(log_file: &Path, level: &str) -> Result<WorkerGuard> {
    let level = parse_log_level(level)?;
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let dir = match log_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let file_name = log_file
        .file_name()
        .ok_or_else(|| BackupError::config(format!("invalid log_file: {}", log_file.display())))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let console = fmt::layer().with_target(false);
    let file = fmt::layer().with_writer(writer).with_ansi(false).with_target(true);

    Registry::default()
        .with(filter)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| BackupError::config(format!("logging already initialized: {}", e)))?;

    Ok(guard)
}

/// Parse a log level name
pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(BackupError::config(format!(
            "invalid log level '{}': use trace, debug, info, warn or error",
            level
        ))),
    }
}
