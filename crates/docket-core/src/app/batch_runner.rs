//! BatchSearchRunner - runs every query of one batch search.
//!
//! Per query, in insertion order:
//! 1. cancellation and deadline checks
//! 2. structured query built from the batch (filters + text clause)
//! 3. scrolled read, accumulated up to the batch-wide result cap
//! 4. matches saved once for the query, progress reported
//! 5. throttle pause before the next query
//!
//! Earlier queries' results stay saved when a later one fails.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info};

use super::cancel::CancelToken;
use crate::domain::{BatchId, BatchSearch, Document, TaskType};
use crate::error::{EngineError, SearchError, SearchFailure, TaskError};
use crate::ports::{BatchSearchRepository, Indexer, Scroll, ScrollSettings};
use crate::search::{BatchSettings, build_query};
use crate::typed::{Executable, FactoryRegistry, Progress};

/// Task type under which stored batch searches can run as general tasks.
pub const BATCH_SEARCH_TASK: &str = "batch_search";
/// Argument naming the stored batch to run.
pub const BATCH_ID_ARGUMENT: &str = "batchId";

pub struct BatchSearchRunner {
    indexer: Arc<dyn Indexer>,
    repository: Arc<dyn BatchSearchRepository>,
    settings: BatchSettings,
    batch: BatchSearch,
    progress: Progress,
    cancel: CancelToken,
}

impl BatchSearchRunner {
    pub fn new(
        indexer: Arc<dyn Indexer>,
        repository: Arc<dyn BatchSearchRepository>,
        settings: BatchSettings,
        batch: BatchSearch,
    ) -> Self {
        Self {
            indexer,
            repository,
            settings,
            batch,
            progress: Progress::noop(),
            cancel: CancelToken::never(),
        }
    }

    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn batch(&self) -> &BatchSearch {
        &self.batch
    }

    /// Run the batch. Returns the number of matched documents (capped).
    pub async fn run(&self) -> Result<usize, TaskError> {
        let scroll = ScrollSettings {
            size: self.settings.page_size().map_err(SearchFailure::from)?,
            keep_alive: self.settings.keep_alive().map_err(SearchFailure::from)?,
        };
        let started = Instant::now();
        let max_time = self.settings.max_time();
        let throttle = self.settings.throttle();
        let total = self.batch.queries.len();
        let mut matched = 0;
        info!(batch_id = %self.batch.id, queries = total, "batch search started");

        for (index, query) in self.batch.queries.iter().enumerate() {
            self.cancel.check()?;
            if let Some(max_time) = max_time {
                let elapsed = started.elapsed();
                if elapsed >= max_time {
                    return Err(failure(
                        query,
                        SearchError::DeadlineExceeded {
                            elapsed_secs: elapsed.as_secs(),
                        },
                    ));
                }
            }

            let documents = self.run_query(query, scroll, matched).await?;
            if !documents.is_empty() {
                self.repository
                    .save_results(&self.batch.id, query, &documents)
                    .await
                    .map_err(|e| failure(query, e.into()))?;
            }
            matched += documents.len();
            self.progress.report((index + 1) as f64 / total as f64);
            debug!(batch_id = %self.batch.id, query, hits = documents.len(), matched, "query done");

            if index + 1 < total && !throttle.is_zero() {
                self.pause(throttle, started, max_time).await?;
            }
        }

        info!(batch_id = %self.batch.id, matched, "batch search finished");
        Ok(matched)
    }

    async fn run_query(&self, query: &str, scroll: ScrollSettings, matched: usize) -> Result<Vec<Document>, TaskError> {
        let structured = build_query(&self.batch, query).map_err(|e| failure(query, e))?;
        let room = self.settings.max_results.saturating_sub(matched);
        let mut documents = Vec::new();
        if room == 0 {
            debug!(batch_id = %self.batch.id, query, "result cap reached, query skipped");
            return Ok(documents);
        }

        let mut cursor = self
            .indexer
            .search(&self.batch.projects, &structured, scroll)
            .await
            .map_err(|e| failure(query, e.into()))?;
        let read = self.read_pages(query, cursor.as_mut(), &mut documents, room).await;
        cursor.clear().await;
        read.map(|()| documents)
    }

    async fn read_pages(
        &self,
        query: &str,
        cursor: &mut dyn Scroll,
        documents: &mut Vec<Document>,
        room: usize,
    ) -> Result<(), TaskError> {
        while documents.len() < room {
            self.cancel.check()?;
            let page = cursor.next_page().await.map_err(|e| failure(query, e.into()))?;
            if page.is_empty() {
                break;
            }
            let take = room - documents.len();
            documents.extend(page.into_iter().take(take));
        }
        Ok(())
    }

    /// Sleep `throttle`, cut short at the deadline and on cancellation.
    async fn pause(&self, throttle: Duration, started: Instant, max_time: Option<Duration>) -> Result<(), TaskError> {
        let wait = match max_time {
            Some(max_time) => throttle.min(max_time.saturating_sub(started.elapsed())),
            None => throttle,
        };
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            request = self.cancel.cancelled() => Err(TaskError::Cancelled { requeue: request.requeue }),
        }
    }
}

fn failure(query: &str, cause: SearchError) -> TaskError {
    TaskError::Search(SearchFailure::on_query(query, cause))
}

#[async_trait]
impl Executable for BatchSearchRunner {
    async fn call(self: Box<Self>) -> Result<Value, TaskError> {
        self.run().await.map(Value::from)
    }

    fn is_cancellable(&self) -> bool {
        true
    }
}

/// A batch stored in the repository, loaded when the task runs.
struct StoredBatchSearch {
    batch_id: BatchId,
    indexer: Arc<dyn Indexer>,
    repository: Arc<dyn BatchSearchRepository>,
    settings: BatchSettings,
    progress: Progress,
    cancel: CancelToken,
}

#[async_trait]
impl Executable for StoredBatchSearch {
    async fn call(self: Box<Self>) -> Result<Value, TaskError> {
        let batch = self.repository.get(&self.batch_id).await?;
        BatchSearchRunner::new(self.indexer, self.repository, self.settings, batch)
            .with_progress(self.progress)
            .with_cancel(self.cancel)
            .run()
            .await
            .map(Value::from)
    }

    fn is_cancellable(&self) -> bool {
        true
    }
}

/// Register `batch_search` as a general task type taking a `batchId` argument.
pub fn register_batch_search(
    factories: &mut FactoryRegistry,
    indexer: Arc<dyn Indexer>,
    repository: Arc<dyn BatchSearchRepository>,
    settings: BatchSettings,
) -> Result<(), EngineError> {
    factories.register_fn(BATCH_SEARCH_TASK, move |arguments, ctx| {
        let batch_id = arguments
            .get(BATCH_ID_ARGUMENT)
            .and_then(Value::as_str)
            .ok_or_else(|| TaskError::InvalidArguments {
                task_type: TaskType::new(BATCH_SEARCH_TASK),
                reason: format!("missing string argument {BATCH_ID_ARGUMENT}"),
            })?;
        Ok(Box::new(StoredBatchSearch {
            batch_id: BatchId::new(batch_id),
            indexer: Arc::clone(&indexer),
            repository: Arc::clone(&repository),
            settings: settings.clone(),
            progress: ctx.progress,
            cancel: ctx.cancel,
        }) as Box<dyn Executable>)
    })
}
