//! # Logging Setup
//!
//! Installs the global `tracing` subscriber:
//! - an `EnvFilter` read from `RUST_LOG`, falling back to the configured level;
//! - a human-readable console layer with targets and ANSI colours;
//! - a JSON layer written to a daily rotating file through a non-blocking
//!   appender.
//!
//! Records emitted through the `log` facade are forwarded into tracing by the
//! subscriber's log bridge, so library code can keep using `log` macros.

use std::path::Path;

use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Failures while installing the subscriber.
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("cannot create log directory {path}: {source}")]
    LogDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid log filter {filter:?}: {reason}")]
    Filter { filter: String, reason: String },

    #[error("a global subscriber is already installed: {0}")]
    AlreadySet(String),
}

/// Maps a configured level name to a tracing filter directive.
///
/// Accepts the daemon's historical names (`verbose`, `notice`, `warning`) next
/// to the standard ones. Unknown names fall back to `info`.
pub fn map_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "verbose" | "notice" | "info" => "info",
        "warning" | "warn" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// # Init Tracing
///
/// Installs the subscriber and returns the guard that flushes the file
/// appender. The caller must hold the guard for the life of the process.
///
/// `basename` names the log files (`<basename>.YYYY-MM-DD`).
pub fn init_tracing(log_dir: &Path, level: &str, basename: &str) -> Result<WorkerGuard, LoggerError> {
    std::fs::create_dir_all(log_dir).map_err(|source| LoggerError::LogDir {
        path: log_dir.display().to_string(),
        source,
    })?;

    let file_appender = rolling::daily(log_dir, basename);
    let (file_writer, guard) = non_blocking(file_appender);

    let directive = map_level(level);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .map_err(|e| LoggerError::Filter {
            filter: directive.to_string(),
            reason: e.to_string(),
        })?;

    let console_layer = fmt::layer().with_target(true).with_ansi(true);
    let file_layer = fmt::layer().with_ansi(false).with_writer(file_writer).json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggerError::AlreadySet(e.to_string()))?;

    tracing::info!("Logging initialized with level: {}", directive);
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn historical_level_names_are_mapped() {
        assert_eq!(map_level("debug"), "debug");
        assert_eq!(map_level("verbose"), "info");
        assert_eq!(map_level("NOTICE"), "info");
        assert_eq!(map_level("warning"), "warn");
        assert_eq!(map_level("error"), "error");
        assert_eq!(map_level("loud"), "info");
    }

    #[test]
    fn unwritable_log_dir_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain-file");
        std::fs::write(&file, b"x").unwrap();
        let err = init_tracing(&file.join("logs"), "info", "trackd").unwrap_err();
        assert!(matches!(err, LoggerError::LogDir { .. }));
    }
}
