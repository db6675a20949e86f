//! Bounded single-consumer queue that drops its oldest item when full.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::Notify;

pub(crate) struct DropOldestQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl<T> DropOldestQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue without blocking. Returns `true` if an older item was dropped
    /// to make room.
    pub(crate) fn push(&self, item: T) -> bool {
        let overflowed = {
            let mut items = self.lock();
            let overflowed = items.len() >= self.capacity;
            if overflowed {
                items.pop_front();
            }
            items.push_back(item);
            overflowed
        };

        if overflowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        overflowed
    }

    /// Next item, waiting if empty. `None` once closed and drained.
    pub(crate) async fn pop(&self) -> Option<T> {
        loop {
            if let Some(item) = self.lock().pop_front() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting waits; the consumer drains what is left and finishes.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_overflow_drops_oldest() {
        let queue = DropOldestQueue::new(2);

        assert!(!queue.push(1));
        assert!(!queue.push(2));
        assert!(queue.push(3));

        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop().await, Some(2));
        assert_eq!(queue.pop().await, Some(3));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = std::sync::Arc::new(DropOldestQueue::new(8));
        queue.push("a");

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = queue.pop().await {
                    seen.push(item);
                }
                seen
            })
        };

        tokio::task::yield_now().await;
        queue.push("b");
        queue.close();

        assert_eq!(consumer.await.unwrap(), vec!["a", "b"]);
    }
}
