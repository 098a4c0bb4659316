//! # Core Engine Module
//!
//! The path an authenticated event takes inside the daemon, and the process
//! machinery around it.
//!
//! ## Core Components:
//!
//! - **`event`**: the owned tracking record moved between stages.
//! - **`pool`**: one bounded multi-producer, single-consumer ring per worker.
//!   Producers never block: a contended or full pool hands the event back.
//! - **`dispatcher`**: lock-free round robin over the worker pools, with the
//!   wake channel that tells a worker one event is waiting.
//! - **`worker`**: the per-thread loop that pops events and runs the sink
//!   failover for their opcode.
//! - **`drain`**: waits for the pools to empty at shutdown, then stops the
//!   workers.
//! - **`counters`**: today/total request counters and the midnight reset.
//! - **`supervisor`**: the master process that keeps one worker process
//!   alive and forwards termination to it.
//! - **`status`**: the plain-text status report.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, unused_qualifications)]

/// The tracking event.
pub mod event;
/// Bounded per-worker event ring.
pub mod pool;
/// Round-robin hand-off from transports to workers.
pub mod dispatcher;
/// Worker threads and their dispatch loop.
pub mod worker;
/// Shutdown drain.
pub mod drain;
/// Request counters and the daily reset task.
pub mod counters;
/// Master process supervision.
pub mod supervisor;
/// Status endpoint report.
pub mod status;

// --- Public API Re-exports ---
pub use counters::{run_daily_reset, Clock, RequestCounters, SystemClock};
pub use dispatcher::Dispatcher;
pub use drain::{drain, wait_until_empty};
pub use event::Event;
pub use pool::{EventPool, PoolConsumer, PushError};
pub use status::{PoolUsage, StatusReport};
pub use supervisor::{
    remove_pidfile, run_master, write_pidfile, ReexecLauncher, SupervisorError, WorkerLauncher,
    WORKER_FLAG,
};
pub use worker::{WorkerError, WorkerRuntime, WorkerSet};
