//! # Status Report
//!
//! Plain-text snapshot served on `/_status`: request counters, per-worker
//! pool occupancy and uptime.

use std::fmt;
use std::time::Duration;

use crate::core::counters::RequestCounters;
use crate::core::dispatcher::Dispatcher;

/// Occupancy of one worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolUsage {
    pub size: usize,
    pub capacity: usize,
}

/// # Status Report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub today: u64,
    pub total: u64,
    pub pools: Vec<PoolUsage>,
    pub uptime: Duration,
}

impl StatusReport {
    /// Reads the live counters and pool sizes. Pool sizes are advisory.
    pub fn collect(counters: &RequestCounters, dispatcher: &Dispatcher, uptime: Duration) -> Self {
        Self {
            today: counters.today(),
            total: counters.total(),
            pools: dispatcher
                .pools()
                .map(|pool| PoolUsage {
                    size: pool.size(),
                    capacity: pool.capacity(),
                })
                .collect(),
            uptime,
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "req num: {}/{} (today/total)", self.today, self.total)?;

        let (mut size, mut capacity) = (0, 0);
        for (i, pool) in self.pools.iter().enumerate() {
            writeln!(f, "pool[{:02}]: {:6}/{:6} (cur/max)", i, pool.size, pool.capacity)?;
            size += pool.size;
            capacity += pool.capacity;
        }
        writeln!(f, "  ptotal: {:6}/{:6} (cur/max)", size, capacity)?;

        let up = self.uptime.as_secs();
        writeln!(
            f,
            "\nup: {}d, {}h, {}m, {}s",
            up / 86_400,
            up % 86_400 / 3_600,
            up % 3_600 / 60,
            up % 60
        )
    }
}
