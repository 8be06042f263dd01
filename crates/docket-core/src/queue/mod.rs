//! Work queue: the blocking hand-off between producers and one worker.

mod memory;

pub use memory::WorkQueue;

/// What a consumer gets out of a `WorkQueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueItem<T> {
    Item(T),
    /// Sentinel telling the consumer to stop instead of dispatching work.
    Poison,
}

impl<T> QueueItem<T> {
    pub fn is_poison(&self) -> bool {
        matches!(self, QueueItem::Poison)
    }
}
