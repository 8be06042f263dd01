//! Batch dispatch: the worker loop keyed by batch id.
//!
//! The repository record carries the batch state:
//! QUEUED -> RUNNING -> SUCCESS | FAILURE | CANCELLED, and back to QUEUED when
//! a cancellation asks for a requeue. A requeued batch is not put back on the
//! in-memory queue; `requeue_database_batches` picks it up on the next start.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::{error, info, warn};

use super::batch_runner::BatchSearchRunner;
use super::cancel::{CancelToken, CancellationChannel};
use super::worker_loop::{Outcome, WorkSource, WorkerExit, WorkerHandle, WorkerLoop, WorkerState};
use crate::config::WorkerConfig;
use crate::domain::{BatchId, BatchSearch, BatchState, Project, User};
use crate::error::{RepositoryError, SearchError, SearchFailure, TaskError};
use crate::ports::{BatchSearchRepository, Clock, IdGenerator, Indexer, SystemClock, UlidGenerator};
use crate::queue::{QueueItem, WorkQueue};
use crate::search::BatchSettings;
use crate::typed::Executable;

/// `WorkSource` over a queue of batch ids.
pub struct BatchSource {
    repository: Arc<dyn BatchSearchRepository>,
    indexer: Arc<dyn Indexer>,
    settings: BatchSettings,
    queue: WorkQueue<BatchId>,
}

impl BatchSource {
    pub fn new(
        repository: Arc<dyn BatchSearchRepository>,
        indexer: Arc<dyn Indexer>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            repository,
            indexer,
            settings,
            queue: WorkQueue::new(),
        }
    }

    pub fn queue(&self) -> &WorkQueue<BatchId> {
        &self.queue
    }

    async fn record(&self, id: &BatchId, state: BatchState) {
        if let Err(err) = self.repository.set_state(id, state).await {
            error!(batch_id = %id, ?state, error = %err, "failed to record batch state");
        }
    }

    async fn record_failure(&self, id: &BatchId, failure: &SearchFailure) {
        if let Err(err) = self.repository.set_error(id, failure).await {
            error!(batch_id = %id, error = %err, "failed to record batch failure");
        }
    }
}

#[async_trait]
impl WorkSource for BatchSource {
    type Item = BatchId;

    async fn pull(&self, timeout: Duration) -> Option<QueueItem<BatchId>> {
        self.queue.dequeue_with_timeout(timeout).await
    }

    fn item_id(&self, id: &BatchId) -> String {
        id.to_string()
    }

    async fn prepare(&self, id: &BatchId, cancel: CancelToken) -> Result<Option<Box<dyn Executable>>, TaskError> {
        let batch = match self.repository.get(id).await {
            Ok(batch) => batch,
            Err(RepositoryError::NotFound(_)) => {
                warn!(batch_id = %id, "batch search not found, not executed");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        if batch.state != BatchState::Queued {
            warn!(batch_id = %id, state = ?batch.state, "batch search not run because it is not queued");
            return Ok(None);
        }

        self.repository.set_state(id, BatchState::Running).await?;
        let runner = BatchSearchRunner::new(
            Arc::clone(&self.indexer),
            Arc::clone(&self.repository),
            self.settings.clone(),
            batch,
        )
        .with_cancel(cancel);
        Ok(Some(Box::new(runner)))
    }

    async fn complete(&self, id: BatchId, outcome: Outcome) {
        match outcome {
            Outcome::Done(matched) => {
                info!(batch_id = %id, %matched, "batch search succeeded");
                self.record(&id, BatchState::Success).await;
            }
            Outcome::Cancelled { requeue: true } => {
                info!(batch_id = %id, "batch search cancelled, reset to queued");
                if let Err(err) = self.repository.reset(&id).await {
                    error!(batch_id = %id, error = %err, "failed to reset batch search");
                }
            }
            Outcome::Cancelled { requeue: false } => {
                info!(batch_id = %id, "batch search cancelled");
                self.record(&id, BatchState::Cancelled).await;
            }
            Outcome::Failed(TaskError::Search(failure)) => {
                error!(batch_id = %id, query = ?failure.query, error = %failure, "batch search failed");
                self.record_failure(&id, &failure).await;
            }
            Outcome::Failed(TaskError::Repository(err)) => {
                self.record_failure(&id, &SearchFailure::new(SearchError::Repository(err)))
                    .await;
            }
            Outcome::Failed(err) => {
                self.record_failure(&id, &SearchFailure::new(SearchError::Internal(err.to_string())))
                    .await;
            }
        }
    }
}

/// What `BatchSearchLoop::drain_and_shutdown` saw.
#[derive(Debug, Clone, Serialize)]
pub struct BatchShutdownReport {
    pub worker: WorkerExit,
    /// Batch ids never reached.
    pub pending: usize,
}

/// Owns the batch queue and the single worker that drains it.
pub struct BatchSearchLoop {
    source: Arc<BatchSource>,
    channel: Arc<CancellationChannel>,
    state: watch::Receiver<WorkerState>,
    worker: Mutex<WorkerHandle>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl BatchSearchLoop {
    /// Spawn the worker on the current tokio runtime.
    pub fn start(
        repository: Arc<dyn BatchSearchRepository>,
        indexer: Arc<dyn Indexer>,
        settings: BatchSettings,
        config: &WorkerConfig,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ids = Arc::new(UlidGenerator::new(Arc::clone(&clock)));
        Self::start_with_ports(repository, indexer, settings, config, clock, ids)
    }

    pub fn start_with_ports(
        repository: Arc<dyn BatchSearchRepository>,
        indexer: Arc<dyn Indexer>,
        settings: BatchSettings,
        config: &WorkerConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let source = Arc::new(BatchSource::new(repository, indexer, settings));
        let channel = Arc::new(CancellationChannel::new());
        let handle = WorkerLoop::new("batches", Arc::clone(&source), Arc::clone(&channel))
            .with_poll_timeout(config.poll_timeout())
            .spawn();
        Self {
            source,
            channel,
            state: handle.subscribe(),
            worker: Mutex::new(handle),
            clock,
            ids,
        }
    }

    /// A QUEUED batch under a fresh id, created now.
    pub fn new_batch<I, S>(
        &self,
        projects: Vec<Project>,
        name: impl Into<String>,
        queries: I,
        owner: User,
    ) -> BatchSearch
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        BatchSearch::new(
            self.ids.generate_batch_id(),
            projects,
            name,
            queries,
            owner,
            self.clock.now(),
        )
    }

    /// Re-enqueue every batch the repository holds as QUEUED.
    pub async fn requeue_database_batches(&self) -> Result<usize, RepositoryError> {
        let ids = self.source.repository.queued_ids().await?;
        info!(count = ids.len(), "found queued batch searches in repository");
        let count = ids.len();
        for id in ids {
            self.source.queue.enqueue(id);
        }
        Ok(count)
    }

    /// Persist `batch` as QUEUED and enqueue it.
    pub async fn submit(&self, batch: BatchSearch) -> Result<BatchId, RepositoryError> {
        let id = batch.id.clone();
        self.source
            .repository
            .save(batch.with_state(BatchState::Queued))
            .await?;
        self.enqueue(id.clone());
        Ok(id)
    }

    pub fn enqueue(&self, id: BatchId) {
        self.source.queue.enqueue(id);
    }

    pub fn enqueue_poison(&self) {
        self.source.queue.enqueue_poison();
    }

    /// Ask the running batch `id` to stop. False when it is not the one
    /// running. A batch already RUNNING in the repository is always reachable:
    /// the worker points the channel at it before marking it.
    pub fn cancel(&self, id: &BatchId, requeue: bool) -> bool {
        self.channel.request_cancellation(Some(id.as_str()), requeue)
    }

    pub fn pending(&self) -> usize {
        self.source.queue.len()
    }

    pub fn worker_state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// For the embedding process's signal handler: stop after the current
    /// batch, which is cancelled and reset to QUEUED for the next start.
    pub fn terminate(&self) {
        info!("terminating batch worker");
        self.enqueue_poison();
        self.channel.request_cancellation(None, true);
    }

    pub async fn drain_and_shutdown(&self, timeout: Duration) -> BatchShutdownReport {
        self.enqueue_poison();
        let worker = self.worker.lock().await.shutdown(timeout).await;
        let report = BatchShutdownReport {
            worker,
            pending: self.pending(),
        };
        info!(?report, "batch loop shut down");
        report
    }
}
