use std::time::Duration;

use anyhow::{Context, Result};
use lib_trackd::configs::Settings;
use lib_trackd::core::{remove_pidfile, run_master, write_pidfile, ReexecLauncher};
use tokio_util::sync::CancellationToken;

use crate::trackd_logic::signals::shutdown_signal;

/// Pause before a crashed worker is started again.
const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// # Master Process
///
/// Writes the pidfile, keeps one worker process running and forwards
/// termination to it.
pub async fn run(settings: &Settings) -> Result<()> {
    if let Some(pidfile) = &settings.pidfile {
        write_pidfile(pidfile)?;
    }

    let launcher = ReexecLauncher::from_current(std::env::args_os().skip(1))
        .context("cannot locate the daemon executable")?;
    let shutdown = CancellationToken::new();
    let signal_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    tracing::info!("master process {} supervising", std::process::id());
    let result = run_master(&launcher, shutdown, RESPAWN_DELAY).await;
    signal_task.abort();

    if let Some(pidfile) = &settings.pidfile {
        if let Err(e) = remove_pidfile(pidfile) {
            tracing::warn!("{}", e);
        }
    }

    let respawns = result.context("worker supervision failed")?;
    tracing::info!("master exiting after {} respawn(s)", respawns);
    Ok(())
}
