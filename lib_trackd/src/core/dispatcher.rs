//! # Lock-Free Round-Robin Dispatcher
//!
//! The `Dispatcher` is the hand-off point between the transports and the
//! workers. Every authenticated event goes through [`Dispatcher::route`], which
//! picks the next worker, pushes the event into that worker's pool and wakes it.
//!
//! ## Core Design Principles:
//!
//! 1.  **Lock-free selection**: the index of the last chosen worker lives in a
//!     single `AtomicUsize`. A compare-and-swap loop moves it forward modulo the
//!     worker count, so any number of transport tasks can pick concurrently and
//!     the picks still form one strict rotation.
//!
//! 2.  **One wake per event**: each worker owns an unbounded channel of unit
//!     tokens. A successful push sends exactly one token, and the worker pops
//!     exactly one event per token.
//!
//! 3.  **Retry, never block**: a busy or full pool hands the event back and the
//!     dispatcher sleeps for a short fixed interval before trying the next
//!     worker. There is no upper bound on the number of retries: when every
//!     pool stays full, `route` keeps spinning until space frees up.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::core::event::Event;
use crate::core::pool::{EventPool, PushError};

/// # Worker Lane
///
/// The producer-side view of one worker: its pool and its wake channel.
struct Lane {
    pool: Arc<EventPool>,
    waker: mpsc::UnboundedSender<()>,
}

/// # Core Dispatcher
///
/// Shared by every transport task, usually behind an `Arc`.
pub struct Dispatcher {
    lanes: Vec<Lane>,
    /// Index of the last worker handed out. Starts "before" worker 0.
    last: AtomicUsize,
    retry_interval: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher with no workers yet.
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            lanes: Vec::new(),
            last: AtomicUsize::new(usize::MAX),
            retry_interval,
        }
    }

    /// # Add Worker
    ///
    /// Registers a worker pool and returns the receiving end of its wake
    /// channel. The worker must receive one token for every event it pops.
    pub fn add_worker(&mut self, pool: Arc<EventPool>) -> mpsc::UnboundedReceiver<()> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lanes.push(Lane { pool, waker: tx });
        log::debug!("Worker {} registered with the dispatcher", self.lanes.len() - 1);
        rx
    }

    /// Number of registered workers.
    pub fn worker_count(&self) -> usize {
        self.lanes.len()
    }

    /// Picks the next worker index in the rotation.
    pub fn pick(&self) -> Option<usize> {
        let n = self.lanes.len();
        if n == 0 {
            return None;
        }
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(last.wrapping_add(1) % n)
            })
            .unwrap_or_else(|current| current);
        Some(previous.wrapping_add(1) % n)
    }

    /// # Try Route
    ///
    /// One attempt: pick a worker, push, and wake it on success. A rejected
    /// event comes back inside the error.
    pub fn try_route(&self, event: Event) -> Result<usize, PushError> {
        let Some(index) = self.pick() else {
            return Err(PushError::Overload(event));
        };
        let lane = &self.lanes[index];
        lane.pool.push(event)?;
        if lane.waker.send(()).is_err() {
            log::warn!("Worker {} is gone; its pool will not be drained", index);
        }
        Ok(index)
    }

    /// # Route
    ///
    /// Keeps trying workers in rotation, sleeping `retry_interval` between
    /// rejected attempts, until a push succeeds. Returns the chosen worker, or
    /// `None` (dropping the event) when no worker is registered.
    pub async fn route(&self, mut event: Event) -> Option<usize> {
        if self.lanes.is_empty() {
            log::error!("No workers registered; dropping event for op {}", event.op());
            return None;
        }
        loop {
            match self.try_route(event) {
                Ok(index) => return Some(index),
                Err(rejected) => {
                    log::trace!("Dispatch rejected: {}", rejected);
                    event = rejected.into_event();
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// The worker pools in worker order.
    pub fn pools(&self) -> impl Iterator<Item = &Arc<EventPool>> + '_ {
        self.lanes.iter().map(|lane| &lane.pool)
    }

    /// Advisory total of queued events across every pool.
    pub fn total_size(&self) -> usize {
        self.pools().map(|pool| pool.size()).sum()
    }
}
