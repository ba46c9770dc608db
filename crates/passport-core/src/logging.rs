//! Tracing subscriber setup.
//!
//! Logs go to stderr by default so stdout stays free for command output.
//! When `[logging].file` is set, a non-blocking file writer is used and the
//! returned guard must be held until exit to flush buffered lines.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Environment variable that overrides `[logging].filter`.
pub const LOG_ENV: &str = "PASSPORT_LOG";

/// Builds the filter from PASSPORT_LOG, falling back to the config directive.
///
/// # Errors
/// Returns an error if neither source holds a valid filter directive.
pub fn build_filter(config: &Config) -> Result<EnvFilter> {
    if let Ok(directive) = std::env::var(LOG_ENV) {
        return EnvFilter::try_new(&directive)
            .with_context(|| format!("invalid {LOG_ENV} filter '{directive}'"));
    }
    EnvFilter::try_new(&config.logging.filter)
        .with_context(|| format!("invalid log filter '{}'", config.logging.filter))
}

/// Installs the global subscriber.
///
/// Returns a guard when logging to a file. Calling this twice is harmless;
/// the second subscriber is ignored.
///
/// # Errors
/// Returns an error if the filter is invalid or the log file cannot be opened.
pub fn init(config: &Config, home: &Path) -> Result<Option<WorkerGuard>> {
    let filter = build_filter(config)?;

    let Some(path) = config.log_file_path(home) else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
        return Ok(None);
    };

    let dir = path.parent().unwrap_or(home);
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("log path has no file name: {}", path.display()))?;

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    Ok(Some(guard))
}
