//! # lib_trackd
//!
//! Core of the trackd beacon ingestion daemon. Transports hand raw requests to
//! [`auth`], authenticated events go through the [`core`] dispatcher into
//! per-worker pools, and each worker delivers them to the backends described
//! in [`connections`].

pub mod auth;
pub mod configs;
pub mod connections;
pub mod core;
#[cfg(feature = "loggers")]
pub mod loggers;

pub use auth::{Authenticator, ReplyCode, TrackQuery};
pub use configs::{Settings, TrackdConfig};
pub use crate::core::{Dispatcher, Event, EventPool, RequestCounters};
