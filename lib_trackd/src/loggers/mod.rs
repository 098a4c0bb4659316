//! # Loggers Module
//!
//! Tracing subscriber setup shared by the daemon binaries.

/// Console plus daily rotating JSON file logging.
pub mod setup;

pub use setup::{init_tracing, map_level, LoggerError};
