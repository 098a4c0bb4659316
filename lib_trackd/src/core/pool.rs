//! # Event Pool
//!
//! A bounded circular buffer sitting between the transports (many producers)
//! and one worker thread (the only consumer).
//!
//! ## Core Design Principles:
//!
//! 1.  **Two cursors, one empty slot**: `head` is the next slot to write and
//!     `tail` the next slot to read. The buffer is empty when they are equal and
//!     full when advancing `head` would reach `tail`, so a pool of capacity `C`
//!     holds at most `C - 1` events. The pool is never resized.
//!
//! 2.  **Never block a producer**: the insert path is guarded by a mutex that is
//!     only ever *tried*. A contended push returns [`PushError::Busy`] and a full
//!     pool returns [`PushError::Overload`]; both hand the event back so the
//!     caller can try another pool.
//!
//! 3.  **Single consumer by construction**: `pop` lives on [`PoolConsumer`],
//!     which is handed out once and cannot be cloned. The read path therefore
//!     needs no insert lock.
//!
//! `size()` reads both cursors without coordinating with producers, so it is a
//! snapshot that may already be stale when it returns.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, TryLockError};

use thiserror::Error;

use crate::core::event::Event;

/// # Push Error
///
/// Why a push did not store the event. The event is returned untouched.
#[derive(Debug, Error)]
pub enum PushError {
    /// Another producer holds the insert path.
    #[error("pool insert path is busy")]
    Busy(Event),
    /// No free slot is left.
    #[error("pool is full")]
    Overload(Event),
}

impl PushError {
    /// Recovers the rejected event.
    pub fn into_event(self) -> Event {
        match self {
            Self::Busy(event) | Self::Overload(event) => event,
        }
    }
}

/// # Event Pool
///
/// Fixed-size ring of event slots shared between producers and one consumer.
pub struct EventPool {
    slots: Box<[Mutex<Option<Event>>]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    insert_lock: Mutex<()>,
    consumer_taken: AtomicBool,
}

impl EventPool {
    /// Creates a pool with `capacity` slots (at least two).
    pub fn new(capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(2);
        let slots = (0..capacity).map(|_| Mutex::new(None)).collect();
        Arc::new(Self {
            slots,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            insert_lock: Mutex::new(()),
            consumer_taken: AtomicBool::new(false),
        })
    }

    /// Hands out the consumer side. Only the first call gets one.
    pub fn consumer(self: &Arc<Self>) -> Option<PoolConsumer> {
        if self.consumer_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(PoolConsumer {
            pool: Arc::clone(self),
        })
    }

    /// Number of slots, including the one that always stays empty.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Advisory number of queued events.
    pub fn size(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + self.capacity() - tail) % self.capacity()
    }

    /// Whether the pool looked empty at the time of the call.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// # Push
    ///
    /// Stores `event` at `head` without ever waiting on another producer.
    pub fn push(&self, event: Event) -> Result<(), PushError> {
        let _guard = match self.insert_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(PushError::Busy(event)),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let head = self.head.load(Ordering::Relaxed);
        let next = self.advance(head);
        if next == self.tail.load(Ordering::Acquire) {
            return Err(PushError::Overload(event));
        }

        *self.slots[head]
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(event);
        self.head.store(next, Ordering::Release);
        Ok(())
    }

    fn advance(&self, index: usize) -> usize {
        (index + 1) % self.capacity()
    }
}

/// # Pool Consumer
///
/// The read side of an [`EventPool`]. Exactly one exists per pool.
pub struct PoolConsumer {
    pool: Arc<EventPool>,
}

impl PoolConsumer {
    /// Takes the oldest event, or `None` when the pool is empty. Never blocks.
    pub fn pop(&mut self) -> Option<Event> {
        let pool = &self.pool;
        let tail = pool.tail.load(Ordering::Relaxed);
        if tail == pool.head.load(Ordering::Acquire) {
            return None;
        }
        let event = pool.slots[tail]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        pool.tail.store(pool.advance(tail), Ordering::Release);
        event
    }

    /// The pool this consumer reads from.
    pub fn pool(&self) -> &Arc<EventPool> {
        &self.pool
    }
}
