//! This module provides the blocking work queue feeding the background worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc;

/// An unbounded FIFO queue handing items over from any number of producer threads to a single consumer thread.
///
/// Producers never block on [`WorkQueue::enqueue()`], whereas the consumer blocks on [`WorkQueue::dequeue()`] until an item is available.
/// Items are delivered in insertion order, exactly once.
///
/// The queue owns both halves of an unbounded `mpsc` channel, so it can never be closed while alive: it just stops being drained
/// once its consumer is gone. A fresh queue should be used for every consumer lifetime.
///
/// # Example
/// ```
/// # use saver::queue::WorkQueue;
/// let queue = WorkQueue::new();
///
/// queue.enqueue("a");
/// queue.enqueue("b");
///
/// assert_eq!(queue.len(), 2);
/// assert_eq!(queue.dequeue(), "a");
/// assert_eq!(queue.dequeue(), "b");
/// assert!(queue.is_empty());
/// ```
#[derive(Debug)]
pub struct WorkQueue<T> {
    /// The sending part, shared by all producers.
    sender: mpsc::UnboundedSender<T>,
    /// The receiving part, only ever locked by the consumer.
    receiver: Mutex<mpsc::UnboundedReceiver<T>>,
    /// Number of enqueued items not dequeued yet.
    count: AtomicUsize,
}

impl<T> Default for WorkQueue<T> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WorkQueue<T> {
    /// Create a new empty queue.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();

        Self {
            sender,
            receiver: Mutex::new(receiver),
            count: AtomicUsize::new(0),
        }
    }

    /// Append `item` to the tail of the queue, waking the consumer up if it is waiting for one.
    ///
    /// This never blocks and always succeeds.
    pub fn enqueue(&self, item: T) {
        // count first so that a dequeued item is always accounted for
        self.count.fetch_add(1, Ordering::AcqRel);

        // the receiving part lives as long as `self`, sending cannot fail
        let _ = self.sender.send(item);
    }

    /// Remove and return the head of the queue, blocking the current thread while the queue is empty.
    ///
    /// # Panics
    /// This method panics if called within an asynchronous execution context, the consumer must be a dedicated thread.
    pub fn dequeue(&self) -> T {
        let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);

        match receiver.blocking_recv() {
            Some(item) => {
                self.count.fetch_sub(1, Ordering::AcqRel);
                item
            }
            None => unreachable!("the sending part is owned by the queue"),
        }
    }

    /// Remove and return the head of the queue if any, without blocking.
    pub fn try_dequeue(&self) -> Option<T> {
        let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);

        let item = receiver.try_recv().ok()?;
        self.count.fetch_sub(1, Ordering::AcqRel);

        Some(item)
    }

    /// Return the number of items currently in the queue.
    ///
    /// This is a snapshot: it may already be stale when returned if producers or the consumer are concurrently at work.
    #[inline]
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Return `true` if the queue is currently empty (see [`WorkQueue::len()`]).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return a lazy, never ending iterator over the items of the queue, blocking on each step while the queue is empty.
    ///
    /// The iterator never yields `None`: the consumer is expected to break out of it on its own terms.
    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        std::iter::repeat_with(|| self.dequeue())
    }

    /// Remove all items currently in the queue without blocking, returning how many were dropped.
    pub fn clear(&self) -> usize {
        std::iter::from_fn(|| self.try_dequeue()).count()
    }
}
