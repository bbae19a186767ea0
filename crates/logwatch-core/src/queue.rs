//! Ordered, bounded distribution queue shared by every producer.

use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
};

use thiserror::Error;
use tokio::sync::Notify;

use crate::StreamEvent;

/// Default capacity in events.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Returned by [`EventQueue::push`] once the queue is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event queue is closed")]
pub struct QueueClosed;

struct Inner {
    events: VecDeque<StreamEvent>,
    closed: bool,
    enqueued: u64,
    dropped: u64,
}

/// Multi-producer, single-consumer FIFO with a drop-oldest overflow policy.
///
/// `push` never waits: when the queue is full the oldest buffered event is
/// discarded and counted. After `close`, pushes are rejected and the
/// consumer drains what is left before `recv` returns `None`.
pub struct EventQueue {
    inner: Mutex<Inner>,
    notify: Notify,
    capacity: usize,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                events: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
                enqueued: 0,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue an event.
    ///
    /// # Errors
    /// Returns [`QueueClosed`] after [`close`](Self::close).
    pub fn push(&self, event: impl Into<StreamEvent>) -> Result<(), QueueClosed> {
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(QueueClosed);
            }
            while inner.events.len() >= self.capacity {
                if inner.events.pop_front().is_some() {
                    inner.dropped += 1;
                } else {
                    break;
                }
            }
            inner.events.push_back(event.into());
            inner.enqueued += 1;
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Wait for the next event.
    ///
    /// Returns `None` once the queue is closed and fully drained.
    pub async fn recv(&self) -> Option<StreamEvent> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(event) = inner.events.pop_front() {
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Reject new events and wake the consumer so it can drain.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Events currently buffered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events accepted since creation.
    #[must_use]
    pub fn enqueued(&self) -> u64 {
        self.lock().enqueued
    }

    /// Events discarded by the overflow policy.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }
}
