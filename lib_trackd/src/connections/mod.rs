//! # Connections Module
//!
//! Everything a worker needs to talk to its backend stores: the
//! [`SinkAdapter`] seam, the failover [`SinkClientSet`], the
//! [`SinkRegistry`] that builds sets from settings, and the two bundled
//! drivers (PostgreSQL and Redis).

/// Adapter trait, per-node error marks and the failover walk.
pub mod sink;
/// Sink-kind to adapter factory mapping.
pub mod registry;

/// PostgreSQL upsert sink.
#[cfg(feature = "connections")]
pub mod db_postgres;

/// Redis counter and snapshot sink.
#[cfg(feature = "connections")]
pub mod cache_redis;

pub use registry::{SinkFactory, SinkRegistry};
pub use sink::{DispatchOutcome, SinkAdapter, SinkClientSet, SinkError, SinkNode};
