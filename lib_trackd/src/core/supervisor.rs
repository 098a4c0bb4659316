//! # Process Supervisor
//!
//! The master half of the master/worker pair. The master owns exactly one
//! worker process at a time: when it exits for any reason the master starts a
//! new one, and when the master itself is asked to stop it forwards SIGTERM to
//! the worker and waits for the worker's drain to finish.
//!
//! ## Core Design Principles:
//!
//! 1.  **Owned child handle**: the running worker is a `tokio::process::Child`
//!     held by the supervisor loop, not a pid in a global.
//! 2.  **Token driven**: shutdown arrives through a `CancellationToken`, so
//!     signal handling stays in the binary and the loop is testable.
//! 3.  **Pluggable launch**: a [`WorkerLauncher`] decides how a worker process
//!     is started. The daemon re-executes itself with `--worker`.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Flag that turns the daemon executable into a worker process.
pub const WORKER_FLAG: &str = "--worker";

/// Failures of the master process.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to launch worker process: {0}")]
    Spawn(#[source] io::Error),

    #[error("failed to wait for worker process: {0}")]
    Wait(#[source] io::Error),

    #[error("failed to signal worker process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    #[error("pidfile {path}: {source}")]
    Pidfile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Starts one worker process.
pub trait WorkerLauncher: Send + Sync {
    /// Spawns the worker and hands back its handle.
    fn launch(&self) -> io::Result<Child>;
}

/// # Re-exec Launcher
///
/// Runs the current executable again with the master's arguments plus
/// [`WORKER_FLAG`].
#[derive(Debug, Clone)]
pub struct ReexecLauncher {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ReexecLauncher {
    /// Builds a launcher from the master's own command line (program name
    /// excluded).
    pub fn from_current<I>(args: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = OsString>,
    {
        Ok(Self {
            program: std::env::current_exe()?,
            args: args.into_iter().collect(),
        })
    }
}

impl WorkerLauncher for ReexecLauncher {
    fn launch(&self) -> io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .arg(WORKER_FLAG)
            .stdin(Stdio::null())
            .spawn()
    }
}

/// Sends SIGTERM to the worker.
#[cfg(unix)]
fn terminate(child: &mut Child) -> Result<(), SupervisorError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        // already reaped
        return Ok(());
    };
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| SupervisorError::Signal {
        pid,
        reason: e.to_string(),
    })
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) -> Result<(), SupervisorError> {
    let pid = child.id().unwrap_or_default();
    child.start_kill().map_err(|e| SupervisorError::Signal {
        pid,
        reason: e.to_string(),
    })
}

fn describe_exit(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => format!("{status}"),
    }
}

/// # Run Master
///
/// Supervises workers until `shutdown` is cancelled. Returns how many times a
/// worker was respawned.
pub async fn run_master<L: WorkerLauncher>(
    launcher: &L,
    shutdown: CancellationToken,
    respawn_delay: Duration,
) -> Result<usize, SupervisorError> {
    let mut child = launcher.launch().map_err(SupervisorError::Spawn)?;
    log::info!("worker process {:?} started", child.id());
    let mut respawns = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                log::info!("stopping worker process {:?}", child.id());
                terminate(&mut child)?;
                let status = child.wait().await.map_err(SupervisorError::Wait)?;
                log::info!("worker process finished with {}", describe_exit(&status));
                return Ok(respawns);
            }
            status = child.wait() => {
                let status = status.map_err(SupervisorError::Wait)?;
                log::warn!("worker process exited unexpectedly with {}", describe_exit(&status));
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => return Ok(respawns),
            _ = tokio::time::sleep(respawn_delay) => {}
        }
        child = launcher.launch().map_err(SupervisorError::Spawn)?;
        respawns += 1;
        log::info!("worker process {:?} respawned ({} so far)", child.id(), respawns);
    }
}

/// Writes the current process id to `path`.
pub fn write_pidfile(path: &Path) -> Result<(), SupervisorError> {
    fs::write(path, format!("{}\n", std::process::id())).map_err(|source| {
        SupervisorError::Pidfile {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Removes the pidfile. A file that is already gone is not an error.
pub fn remove_pidfile(path: &Path) -> Result<(), SupervisorError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SupervisorError::Pidfile {
            path: path.to_path_buf(),
            source,
        }),
    }
}
