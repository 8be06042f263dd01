//! TaskSupplier port - what the worker needs from whoever holds the task records.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{TaskId, TaskRecord};
use crate::error::TaskError;
use crate::queue::QueueItem;

/// Pull side and reporting side of the task registry.
///
/// Reports for unknown ids are logged and dropped, never raised.
#[async_trait]
pub trait TaskSupplier: Send + Sync {
    /// Next task, already moved to RUNNING. `None` when nothing arrived in time.
    async fn next_task(&self, timeout: Duration) -> Option<QueueItem<TaskRecord>>;

    fn progress(&self, id: &TaskId, rate: f64);

    fn result(&self, id: &TaskId, value: Value);

    fn error(&self, id: &TaskId, cause: &TaskError);

    fn cancel(&self, id: &TaskId, requeue: bool);
}
