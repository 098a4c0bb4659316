use std::sync::Arc;
use std::time::Duration;

use lib_trackd::auth::Authenticator;
use lib_trackd::core::{Dispatcher, RequestCounters, StatusReport};
use tokio::time::Instant;

/// Everything the transports share: the dispatcher, the counters and the
/// authenticator. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub counters: Arc<RequestCounters>,
    pub authenticator: Authenticator,
    pub verify_udp: bool,
    started: Instant,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        counters: Arc<RequestCounters>,
        authenticator: Authenticator,
        verify_udp: bool,
    ) -> Self {
        Self {
            dispatcher,
            counters,
            authenticator,
            verify_udp,
            started: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn status(&self) -> StatusReport {
        StatusReport::collect(&self.counters, &self.dispatcher, self.uptime())
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
