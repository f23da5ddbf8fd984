//! Per-capability-set FIFO queue with standing wake-up signals.
//!
//! Every queue carries two [`Notify`] signals:
//!
//! - **ready**: fired on every `put`, so a listener blocked on "any of my
//!   queues has work" wakes up and re-checks;
//! - **topology**: fired by [`TaskQueue::reset`] when the set of queues a
//!   listener should watch has grown, so it rebuilds its wait-set.
//!
//! Waiters register by creating the `Notified` future *before* checking the
//! queue contents. Together with the single-threaded run-loop this makes a
//! lost wake-up impossible: nothing can be put between the check and the wait.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use super::CapabilitySet;

/// FIFO queue bound to one capability-set key.
pub struct TaskQueue<T> {
    key: CapabilitySet,
    items: Mutex<VecDeque<T>>,
    ready: Notify,
    topology: Notify,
    cancelled: AtomicBool,
}

impl<T> TaskQueue<T> {
    /// Create an empty queue for `key`.
    #[must_use]
    pub fn new(key: CapabilitySet) -> Self {
        Self {
            key,
            items: Mutex::new(VecDeque::new()),
            ready: Notify::new(),
            topology: Notify::new(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Capability-set key of this queue.
    #[must_use]
    pub const fn key(&self) -> &CapabilitySet {
        &self.key
    }

    /// Append an item and wake every listener waiting for work.
    pub fn put(&self, item: T) {
        self.items.lock().push_back(item);
        self.ready.notify_waiters();
    }

    /// Take the head item, if any.
    pub fn pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Items not yet claimed by any worker.
    pub fn size(&self) -> usize {
        self.items.lock().len()
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Future resolving on the next `put` (or `cancel`).
    pub fn ready(&self) -> Notified<'_> {
        self.ready.notified()
    }

    /// Future resolving on the next `reset` (or `cancel`).
    pub fn topology_changed(&self) -> Notified<'_> {
        self.topology.notified()
    }

    /// Signal that the set of queues around this one changed.
    pub fn reset(&self) {
        self.topology.notify_waiters();
    }

    /// Stop handing out work. Used only during teardown.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.ready.notify_waiters();
        self.topology.notify_waiters();
    }

    /// Whether [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Drop every queued item, returning how many were discarded.
    pub(crate) fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let dropped = items.len();
        items.clear();
        dropped
    }
}
