use std::sync::Arc;

use anyhow::{Context, Result};
use lib_trackd::auth::Authenticator;
use lib_trackd::configs::Settings;
use lib_trackd::connections::SinkRegistry;
use lib_trackd::core::{drain, run_daily_reset, Dispatcher, RequestCounters, SystemClock, WorkerSet};
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;

use crate::trackd_logic::signals::shutdown_signal;
use crate::trackd_logic::state::AppState;
use crate::trackd_logic::{http, udp};

/// # Worker Process
///
/// Binds both listeners, starts the worker threads and serves until a
/// termination signal. Shutdown stops the transports first, then drains the
/// pools and stops the workers.
pub async fn run(settings: Arc<Settings>, registry: SinkRegistry) -> Result<()> {
    let addr = settings.listen_addr();
    let udp_socket = UdpSocket::bind(&addr)
        .await
        .with_context(|| format!("failed to bind UDP {addr}"))?;
    let tcp_listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind TCP {addr}"))?;

    let mut dispatcher = Dispatcher::new(settings.route_retry);
    let workers = WorkerSet::start(
        Arc::clone(&settings),
        Arc::new(registry),
        &mut dispatcher,
        CancellationToken::new(),
    )
    .await
    .context("failed to start workers")?;
    let dispatcher = Arc::new(dispatcher);

    let counters = RequestCounters::new();
    let state = AppState::new(
        Arc::clone(&dispatcher),
        Arc::clone(&counters),
        Authenticator::new(Arc::clone(&settings.secrets)),
        settings.udp_verify_salt,
    );

    let transports = CancellationToken::new();
    let udp_handle = tokio::spawn(udp::run(udp_socket, state.clone(), transports.clone()));
    let http_handle = tokio::spawn(http::run(
        tcp_listener,
        state,
        settings.http_timeout,
        transports.clone(),
    ));
    let reset_handle = tokio::spawn(run_daily_reset(counters, SystemClock, transports.clone()));
    tracing::info!(
        "worker process {} serving on {} with {} worker(s)",
        std::process::id(),
        addr,
        workers.len()
    );

    shutdown_signal().await;
    tracing::info!("stopping transports before draining");
    transports.cancel();

    let (udp_res, http_res, reset_res) = tokio::join!(udp_handle, http_handle, reset_handle);
    if let Err(e) = udp_res {
        tracing::error!("UDP task failed: {}", e);
    }
    match http_res {
        Ok(Err(e)) => tracing::error!("HTTP server error: {}", e),
        Err(e) => tracing::error!("HTTP task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if let Err(e) = reset_res {
        tracing::error!("counter reset task failed: {}", e);
    }

    drain(&dispatcher, workers, settings.drain_poll)
        .await
        .context("failed to stop workers")?;
    tracing::info!("Shutdown complete.");
    Ok(())
}
