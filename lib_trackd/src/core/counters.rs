//! # Request Counters
//!
//! Two process-wide counters bumped by every transport: requests seen today
//! and requests seen since start. A background task clears the daily counter
//! at each local midnight.
//!
//! The reset task does not sleep straight to midnight. It sleeps half of the
//! remaining time (at least one second) and re-reads the clock, which keeps it
//! accurate when the wall clock is adjusted while it waits.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, Local, TimeZone};
use tokio_util::sync::CancellationToken;

/// # Request Counters
///
/// Lock-free counters, shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct RequestCounters {
    today: AtomicU64,
    total: AtomicU64,
}

impl RequestCounters {
    /// Creates zeroed counters.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Counts one request.
    pub fn record(&self) {
        self.today.fetch_add(1, Ordering::Relaxed);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Requests since the last daily reset.
    pub fn today(&self) -> u64 {
        self.today.load(Ordering::Relaxed)
    }

    /// Requests since the process started. Never decreases.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Clears the daily counter and returns what it held.
    pub fn reset_today(&self) -> u64 {
        self.today.swap(0, Ordering::AcqRel)
    }
}

/// Source of local wall-clock time for the reset task.
pub trait Clock: Send + Sync + 'static {
    /// Current local time.
    fn now(&self) -> DateTime<Local>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// First instant of the local day after `now`.
pub fn next_local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    let mut day = now.date_naive();
    loop {
        day = day + Days::new(1);
        // A zone may skip midnight on a DST change; fall back to the next day.
        let midnight = day
            .and_hms_opt(0, 0, 0)
            .and_then(|naive| Local.from_local_datetime(&naive).earliest());
        if let Some(midnight) = midnight {
            return midnight;
        }
    }
}

/// # Run Daily Reset
///
/// Clears `today` once per local calendar day until `shutdown` fires.
pub async fn run_daily_reset<C: Clock>(
    counters: Arc<RequestCounters>,
    clock: C,
    shutdown: CancellationToken,
) {
    let mut next_reset = next_local_midnight(clock.now());
    log::debug!("Daily counter reset scheduled at {}", next_reset);

    loop {
        let now = clock.now();
        if now >= next_reset {
            let cleared = counters.reset_today();
            log::info!("Daily request counter reset ({} requests yesterday)", cleared);
            next_reset = next_local_midnight(now);
            continue;
        }

        let remaining = (next_reset - now).to_std().unwrap_or_default();
        let wait = (remaining / 2).max(Duration::from_secs(1));
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
