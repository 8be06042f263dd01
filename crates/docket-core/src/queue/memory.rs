//! In-memory work queue.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use super::QueueItem;

/// FIFO hand-off between producers and the single worker of a queue.
///
/// Design:
/// - `enqueue` never blocks (the queue is bounded by memory only).
/// - Many producers, exactly one consumer. Nothing stops a second consumer from
///   calling `dequeue_with_timeout`, but the worker protocol assumes it never does.
/// - The lock is never held across an await; waiting goes through `Notify`.
pub struct WorkQueue<T> {
    items: Mutex<VecDeque<QueueItem<T>>>,
    notify: Notify,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueueItem<T>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, item: T) {
        self.push(QueueItem::Item(item));
    }

    /// Ask the consumer to stop once it reaches this point of the queue.
    pub fn enqueue_poison(&self) {
        self.push(QueueItem::Poison);
    }

    fn push(&self, item: QueueItem<T>) {
        self.lock().push_back(item);
        // Notify outside the lock; a stored permit wakes the next waiter.
        self.notify.notify_one();
    }

    /// Wait up to `timeout` for the next item. `None` means the wait timed out.
    pub async fn dequeue_with_timeout(&self, timeout: Duration) -> Option<QueueItem<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.lock().pop_front() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                // Last look: an item may have landed right at the deadline.
                return self.lock().pop_front();
            }
        }
    }

    /// Remove the first item matching `pred`. Returns whether one was removed.
    pub fn remove(&self, pred: impl Fn(&T) -> bool) -> bool {
        let mut items = self.lock();
        let position = items.iter().position(|entry| match entry {
            QueueItem::Item(item) => pred(item),
            QueueItem::Poison => false,
        });
        match position {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl<T: Clone> WorkQueue<T> {
    /// Pending items in queue order (poison excluded).
    pub fn snapshot(&self) -> Vec<T> {
        self.lock()
            .iter()
            .filter_map(|entry| match entry {
                QueueItem::Item(item) => Some(item.clone()),
                QueueItem::Poison => None,
            })
            .collect()
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn items_come_out_in_fifo_order() {
        let queue = WorkQueue::new();
        queue.enqueue("a");
        queue.enqueue("b");

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.dequeue_with_timeout(timeout).await, Some(QueueItem::Item("a")));
        assert_eq!(queue.dequeue_with_timeout(timeout).await, Some(QueueItem::Item("b")));
    }

    #[tokio::test(start_paused = true)]
    async fn dequeue_times_out_on_empty_queue() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let start = Instant::now();

        let item = queue.dequeue_with_timeout(Duration::from_secs(60)).await;

        assert_eq!(item, None);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn poison_is_delivered_after_pending_items() {
        let queue = WorkQueue::new();
        queue.enqueue(1);
        queue.enqueue_poison();

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.dequeue_with_timeout(timeout).await, Some(QueueItem::Item(1)));
        assert_eq!(queue.dequeue_with_timeout(timeout).await, Some(QueueItem::Poison));
    }

    #[tokio::test]
    async fn enqueue_wakes_a_waiting_consumer() {
        let queue = Arc::new(WorkQueue::new());

        let consumer = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.dequeue_with_timeout(Duration::from_secs(5)).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(7);

        assert_eq!(consumer.await.unwrap(), Some(QueueItem::Item(7)));
    }

    #[test]
    fn remove_takes_out_only_the_first_match() {
        let queue = WorkQueue::new();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(2);

        assert!(queue.remove(|item| *item == 2));
        assert!(!queue.remove(|item| *item == 3));
        assert_eq!(queue.snapshot(), vec![1, 2]);
    }
}
