//! Master process behaviour against real child processes.
#![cfg(unix)]

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lib_trackd::core::{run_master, WorkerLauncher};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Launches `sh -c <script>` and counts launches.
struct ShellLauncher {
    script: &'static str,
    launches: AtomicUsize,
}

impl ShellLauncher {
    fn new(script: &'static str) -> Self {
        Self {
            script,
            launches: AtomicUsize::new(0),
        }
    }
}

impl WorkerLauncher for ShellLauncher {
    fn launch(&self) -> io::Result<Child> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Command::new("sh").arg("-c").arg(self.script).spawn()
    }
}

#[tokio::test]
async fn crashed_worker_is_respawned_until_shutdown() {
    let launcher = ShellLauncher::new("exit 3");
    let shutdown = CancellationToken::new();
    let canceller = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            shutdown.cancel();
        }
    });

    let respawns = tokio::time::timeout(
        Duration::from_secs(10),
        run_master(&launcher, shutdown, Duration::from_millis(50)),
    )
    .await
    .expect("master did not stop")
    .unwrap();
    canceller.await.unwrap();

    assert!(respawns >= 2, "only {respawns} respawn(s)");
    assert_eq!(launcher.launches.load(Ordering::SeqCst), respawns + 1);
}

#[tokio::test]
async fn shutdown_terminates_the_running_worker() {
    let launcher = ShellLauncher::new("exec sleep 30");
    let shutdown = CancellationToken::new();
    let canceller = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            shutdown.cancel();
        }
    });

    let respawns = tokio::time::timeout(
        Duration::from_secs(5),
        run_master(&launcher, shutdown, Duration::from_millis(50)),
    )
    .await
    .expect("worker survived SIGTERM")
    .unwrap();
    canceller.await.unwrap();

    assert_eq!(respawns, 0);
    assert_eq!(launcher.launches.load(Ordering::SeqCst), 1);
}
