//! # Beacon Tracking Daemon
//!
//! Accepts signed tracking beacons over UDP and HTTP on one port, validates
//! them, and fans them out to Redis and PostgreSQL through a pool of worker
//! threads.
//!
//! ## Process layout:
//! - **Master** (default): writes the pidfile and keeps one worker process
//!   alive, respawning it after any exit until asked to stop.
//! - **Worker** (`--worker`, started by the master): runs the listeners and
//!   the worker threads; on SIGTERM it stops the listeners, drains every
//!   pool and finalizes the sinks.
//! - **Standalone** (`--single-process`): a worker without a master.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use lib_trackd::connections::SinkRegistry;
use lib_trackd::loggers::init_tracing;

mod trackd_logic;
use trackd_logic::config::{self, Cli, Role};
use trackd_logic::{master, worker_process};

/// Loads `.env` and then the platform specific `.env.linux` / `.env.windows`.
fn load_dotenv() {
    let dotenv_os = if cfg!(target_os = "windows") {
        ".env.windows"
    } else {
        ".env.linux"
    };
    dotenvy::dotenv().ok();
    dotenvy::from_filename(dotenv_os).ok();
}

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    let settings = Arc::new(config::load_settings(&cli)?);

    let role = cli.role();
    let _guard = init_tracing(&settings.log_dir, &settings.log_level, role.log_basename())?;
    tracing::info!(
        "{:?} starting: {} op(s), {} secret(s), {} worker thread(s)",
        role,
        settings.ops.len(),
        settings.secrets.len(),
        settings.num_workers
    );

    match role {
        Role::Master => master::run(&settings).await,
        Role::Worker | Role::Standalone => {
            worker_process::run(settings, SinkRegistry::with_builtin()).await
        }
    }
}
