//! The closable concurrent FIFO ("CQ") underlying every handoff in the
//! simulator: customer-to-register, socket frames in both directions, and
//! (via [`crate::logging`]) statistics events.
//!
//! An unbounded, order-preserving queue whose blocking dequeue observes
//! `close()`, plus O(i) removal by index for the reshuffler — capabilities
//! a plain bounded ring buffer paired with a separate shutdown flag doesn't
//! give you in one piece.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, Notify};

use crate::error::DequeueError;

/// A FIFO queue that can be closed; once closed, it stays closed
/// (monotonic), every blocked waiter wakes and observes [`DequeueError::Closed`],
/// and all subsequent enqueues are rejected.
pub struct CloseableQueue<T> {
    items: Mutex<VecDeque<T>>,
    closed: AtomicBool,
    produced: Notify,
}

impl<T> Default for CloseableQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CloseableQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
            produced: Notify::new(),
        }
    }

    /// Push `value` onto the tail. Rejects with [`DequeueError::Closed`]
    /// if the queue has already been closed (the enum is reused here
    /// because "closed" is the only failure mode enqueue can have).
    pub async fn enqueue(&self, value: T) -> Result<(), DequeueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DequeueError::Closed);
        }
        let mut items = self.items.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(DequeueError::Closed);
        }
        items.push_back(value);
        drop(items);
        self.produced.notify_one();
        Ok(())
    }

    /// Block until an item is available or the queue is closed.
    pub async fn dequeue(&self) -> Result<T, DequeueError> {
        loop {
            {
                let mut items = self.items.lock().await;
                if let Some(value) = items.pop_front() {
                    return Ok(value);
                }
                if self.closed.load(Ordering::SeqCst) {
                    return Err(DequeueError::Closed);
                }
            }
            // Re-register for notification before re-checking, so a
            // concurrent enqueue/close between the unlock above and the
            // wait below isn't lost: `Notify` buffers one permit.
            let notified = self.produced.notified();
            {
                let items = self.items.lock().await;
                if !items.is_empty() || self.closed.load(Ordering::SeqCst) {
                    continue;
                }
            }
            notified.await;
        }
    }

    /// Non-blocking pop: [`DequeueError::Empty`] if nothing is queued yet
    /// (normal polling), [`DequeueError::Closed`] if closed and drained.
    pub fn dequeue_nonblock(&self) -> Result<T, DequeueError> {
        let mut items = self.items.blocking_lock();
        if let Some(value) = items.pop_front() {
            return Ok(value);
        }
        if self.closed.load(Ordering::SeqCst) {
            Err(DequeueError::Closed)
        } else {
            Err(DequeueError::Empty)
        }
    }

    /// Async non-blocking pop, for use inside other async tasks that must
    /// not call the blocking variant.
    pub async fn try_dequeue(&self) -> Result<T, DequeueError> {
        let mut items = self.items.lock().await;
        if let Some(value) = items.pop_front() {
            return Ok(value);
        }
        if self.closed.load(Ordering::SeqCst) {
            Err(DequeueError::Closed)
        } else {
            Err(DequeueError::Empty)
        }
    }

    /// Monotonic close: wakes every blocked waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.produced.notify_waiters();
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Exact snapshot size under the queue's own lock.
    pub async fn size(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Synchronous size, for call sites already holding no other lock
    /// (e.g. the register-poll task's tight sampling loop).
    pub fn size_blocking(&self) -> usize {
        self.items.blocking_lock().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    /// Remove and return the element at position `index` (0 = head).
    /// `O(index)`. Returns `None` if `index` is out of bounds.
    pub async fn remove_index(&self, index: usize) -> Option<T> {
        let mut items = self.items.lock().await;
        items.remove(index)
    }

    /// Removes every element for which `predicate` returns `true`, under
    /// one acquisition of the queue's lock — the reshuffler's (§4.4)
    /// "snapshot, Bernoulli-select, remove by index" sequence collapsed
    /// into a single critical section so a concurrent dequeue can never
    /// observe or act on a half-removed selection.
    pub async fn drain_where<F>(&self, mut predicate: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut items = self.items.lock().await;
        let mut removed = Vec::new();
        let mut i = 0;
        while i < items.len() {
            if predicate(&items[i]) {
                if let Some(value) = items.remove(i) {
                    removed.push(value);
                }
            } else {
                i += 1;
            }
        }
        removed
    }

    /// Snapshot-and-drain helper for the reshuffler (§4.4): returns a
    /// `Vec` of `(index, &T)`-eligible positions is awkward without
    /// `Clone`; instead callers that need to *inspect* entries before
    /// deciding which to remove should use [`Self::snapshot_ids`] when
    /// `T: Copy`.
    pub async fn snapshot_ids(&self) -> Vec<T>
    where
        T: Copy,
    {
        self.items.lock().await.iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order_preserved() {
        let q: CloseableQueue<i32> = CloseableQueue::new();
        q.enqueue(1).await.unwrap();
        q.enqueue(2).await.unwrap();
        q.enqueue(3).await.unwrap();
        assert_eq!(q.dequeue().await.unwrap(), 1);
        assert_eq!(q.dequeue().await.unwrap(), 2);
        assert_eq!(q.dequeue().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn nonblocking_dequeue_reports_empty_then_closed() {
        let q: CloseableQueue<i32> = CloseableQueue::new();
        assert_eq!(q.try_dequeue().await.unwrap_err(), DequeueError::Empty);
        q.close();
        assert_eq!(q.try_dequeue().await.unwrap_err(), DequeueError::Closed);
    }

    #[tokio::test]
    async fn enqueue_after_close_is_rejected() {
        let q: CloseableQueue<i32> = CloseableQueue::new();
        q.close();
        assert_eq!(q.enqueue(1).await.unwrap_err(), DequeueError::Closed);
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_close() {
        let q = Arc::new(CloseableQueue::<i32>::new());
        let waiter = q.clone();
        let handle = tokio::spawn(async move { waiter.dequeue().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.close();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dequeue did not wake on close")
            .unwrap();
        assert_eq!(result.unwrap_err(), DequeueError::Closed);
    }

    #[tokio::test]
    async fn blocked_dequeue_wakes_on_enqueue() {
        let q = Arc::new(CloseableQueue::<i32>::new());
        let waiter = q.clone();
        let handle = tokio::spawn(async move { waiter.dequeue().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.enqueue(42).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("dequeue did not wake on enqueue")
            .unwrap();
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn remove_index_shifts_subsequent_indices() {
        let q: CloseableQueue<i32> = CloseableQueue::new();
        for v in [10, 20, 30, 40] {
            q.enqueue(v).await.unwrap();
        }
        assert_eq!(q.remove_index(1).await, Some(20));
        assert_eq!(q.size().await, 3);
        // Index 1 now refers to what was index 2 (30).
        assert_eq!(q.remove_index(1).await, Some(30));
        assert_eq!(q.dequeue().await.unwrap(), 10);
        assert_eq!(q.dequeue().await.unwrap(), 40);
    }

    #[tokio::test]
    async fn drain_where_removes_matching_and_preserves_remaining_order() {
        let q: CloseableQueue<i32> = CloseableQueue::new();
        for v in [1, 2, 3, 4, 5] {
            q.enqueue(v).await.unwrap();
        }
        let removed = q.drain_where(|v| v % 2 == 0).await;
        assert_eq!(removed, vec![2, 4]);
        assert_eq!(q.dequeue().await.unwrap(), 1);
        assert_eq!(q.dequeue().await.unwrap(), 3);
        assert_eq!(q.dequeue().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn size_is_exact_snapshot() {
        let q: CloseableQueue<i32> = CloseableQueue::new();
        assert_eq!(q.size().await, 0);
        q.enqueue(1).await.unwrap();
        q.enqueue(2).await.unwrap();
        assert_eq!(q.size().await, 2);
    }
}
