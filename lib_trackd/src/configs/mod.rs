//! # Configuration Modules
//!
//! This module turns the JSON configuration file (merged with command line
//! overrides) into the immutable [`Settings`] value that every other part of
//! the daemon receives at startup.

/// Raw file/CLI configuration, validation, and the resulting `Settings`.
pub mod settings;

pub use settings::{
    parse_sink_servers, ConfigError, Credentials, HandlerKind, OpConfig, OpSettings, Settings,
    SinkEndpoint, SinkKind, TrackdConfig,
};
