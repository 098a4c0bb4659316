//! # Sink Adapters and Failover
//!
//! A sink is a backend store that records processed events. Each worker owns
//! one [`SinkClientSet`] per configured opcode: the ordered list of backend
//! servers for that opcode, each wrapped in a [`SinkNode`].
//!
//! ## Failover
//!
//! [`SinkClientSet::dispatch`] walks the nodes round robin, starting after the
//! node that was used last:
//!
//! - a node that failed less than `cooldown` ago is skipped outright;
//! - a node whose cooldown has expired is reconnected first, and skipped again
//!   if that fails;
//! - otherwise the adapter processes the event. Success clears the node's
//!   error mark and ends the walk; any failure marks the node and moves on,
//!   including an event the adapter refuses.
//!
//! Every node is considered at most once per event. When none accepts it, the
//! event is dropped: delivery is best effort.
//!
//! Sets and nodes are never shared between workers, so none of this state is
//! synchronised.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

use crate::core::event::Event;

/// Errors reported by sink adapters.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The backend could not be reached or refused the session.
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    /// No live connection is held.
    #[error("not connected")]
    NotConnected,

    /// A command or query failed on an established connection.
    #[error("query failed: {0}")]
    Query(String),

    /// The event payload is unusable for this handler.
    #[error("bad payload: {0}")]
    Payload(String),

    /// No adapter is registered for a sink kind.
    #[error("no adapter registered for {0} sinks")]
    Unsupported(String),
}

impl SinkError {
    /// Whether the error says something about the backend rather than the event.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::NotConnected | Self::Query(_)
        )
    }
}

/// # Sink Adapter
///
/// One connection to one backend server.
#[async_trait]
pub trait SinkAdapter: Send {
    /// Endpoint description used in log lines.
    fn describe(&self) -> String;

    /// Opens the connection, dropping any previous one first.
    async fn connect(&mut self) -> Result<(), SinkError>;

    /// Records one event.
    async fn process(&mut self, event: &Event) -> Result<(), SinkError>;

    /// Releases the connection. Only called while shutting down.
    async fn finalize(&mut self);
}

/// # Sink Node
///
/// An adapter plus the time of its last failure.
pub struct SinkNode {
    adapter: Box<dyn SinkAdapter>,
    last_error: Option<Instant>,
}

impl SinkNode {
    /// Wraps an adapter that has not failed yet.
    pub fn new(adapter: Box<dyn SinkAdapter>) -> Self {
        Self {
            adapter,
            last_error: None,
        }
    }

    /// When the node last failed, if it is currently marked.
    pub fn last_error(&self) -> Option<Instant> {
        self.last_error
    }
}

impl fmt::Debug for SinkNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkNode")
            .field("adapter", &self.adapter.describe())
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Result of handing one event to a [`SinkClientSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The node at this index recorded the event.
    Delivered(usize),
    /// No node accepted the event.
    Exhausted,
}

/// # Sink Client Set
///
/// The failover group for one opcode on one worker.
#[derive(Debug)]
pub struct SinkClientSet {
    op: u8,
    nodes: Vec<SinkNode>,
    cursor: usize,
    cooldown: Duration,
}

impl SinkClientSet {
    /// Builds a set; the first dispatch starts at node 0.
    pub fn new(op: u8, nodes: Vec<SinkNode>, cooldown: Duration) -> Self {
        let cursor = nodes.len().saturating_sub(1);
        Self {
            op,
            nodes,
            cursor,
            cooldown,
        }
    }

    /// Opcode served by this set.
    pub fn op(&self) -> u8 {
        self.op
    }

    /// The nodes in failover order.
    pub fn nodes(&self) -> &[SinkNode] {
        &self.nodes
    }

    /// # Connect All
    ///
    /// Initial connection attempt for every node. A node that cannot connect
    /// is marked failed and will be retried lazily once its cooldown expires.
    /// Returns how many nodes connected.
    pub async fn connect_all(&mut self) -> usize {
        let mut connected = 0;
        for node in &mut self.nodes {
            match node.adapter.connect().await {
                Ok(()) => {
                    node.last_error = None;
                    connected += 1;
                }
                Err(e) => {
                    log::warn!("op {}: sink {} unavailable at startup: {}", self.op, node.adapter.describe(), e);
                    node.last_error = Some(Instant::now());
                }
            }
        }
        connected
    }

    /// # Dispatch
    ///
    /// Runs the failover walk for one event.
    pub async fn dispatch(&mut self, event: &Event) -> DispatchOutcome {
        let n = self.nodes.len();
        let mut attempts = 0;
        loop {
            attempts += 1;
            if attempts > n {
                break;
            }
            self.cursor = (self.cursor + 1) % n;
            let index = self.cursor;
            let node = &mut self.nodes[index];

            if let Some(failed_at) = node.last_error {
                if failed_at.elapsed() < self.cooldown {
                    log::trace!("op {}: sink {} cooling down, skipped", self.op, node.adapter.describe());
                    continue;
                }
                node.last_error = Some(Instant::now());
                if let Err(e) = node.adapter.connect().await {
                    log::warn!("op {}: reconnect to {} failed: {}", self.op, node.adapter.describe(), e);
                    continue;
                }
                log::info!("op {}: reconnected to {}", self.op, node.adapter.describe());
            }

            match node.adapter.process(event).await {
                Ok(()) => {
                    node.last_error = None;
                    return DispatchOutcome::Delivered(index);
                }
                Err(e) if e.is_connectivity() => {
                    node.last_error = Some(Instant::now());
                    log::warn!("op {}: sink {} failed: {}", self.op, node.adapter.describe(), e);
                }
                Err(e) => {
                    node.last_error = Some(Instant::now());
                    log::warn!(
                        "op {}: sink {} refused event for trk_id {}: {}",
                        self.op,
                        node.adapter.describe(),
                        event.trk_id(),
                        e
                    );
                }
            }
        }

        log::warn!(
            "op {}: no sink accepted the event for trk_id {}; dropped",
            self.op,
            event.trk_id()
        );
        DispatchOutcome::Exhausted
    }

    /// Finalizes every node.
    pub async fn finalize(&mut self) {
        for node in &mut self.nodes {
            node.adapter.finalize().await;
        }
    }
}
