//! InMemoryBatchRepository - in-memory `BatchSearchRepository`.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::domain::{BatchId, BatchSearch, BatchState, Document, SearchResult};
use crate::error::{RepositoryError, SearchFailure};
use crate::ports::{BatchSearchRepository, Clock, SystemClock};

#[derive(Debug, Default)]
struct Tables {
    batches: Vec<BatchSearch>,
    results: Vec<SearchResult>,
    /// `(batch, query, documents)` for every `save_results` call.
    save_calls: Vec<(BatchId, String, usize)>,
    fail_saves: Option<String>,
}

/// Batches and result rows kept in insertion order. Run timestamps come
/// from the clock.
pub struct InMemoryBatchRepository {
    tables: RwLock<Tables>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBatchRepository {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            clock,
        }
    }

    /// Every `save_results` call so far as `(batch, query, document count)`.
    pub fn save_calls(&self) -> Vec<(BatchId, String, usize)> {
        self.read().save_calls.clone()
    }

    /// Make `save_results` fail with `Unavailable(reason)` until cleared.
    pub fn fail_saves(&self, reason: Option<&str>) {
        self.write().fail_saves = reason.map(str::to_string);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update<F>(&self, id: &BatchId, apply: F) -> Result<(), RepositoryError>
    where
        F: FnOnce(&mut BatchSearch),
    {
        let mut tables = self.write();
        let batch = tables
            .batches
            .iter_mut()
            .find(|b| &b.id == id)
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))?;
        apply(batch);
        Ok(())
    }
}

impl Default for InMemoryBatchRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchSearchRepository for InMemoryBatchRepository {
    async fn get(&self, id: &BatchId) -> Result<BatchSearch, RepositoryError> {
        self.read()
            .batches
            .iter()
            .find(|b| &b.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.clone()))
    }

    async fn save(&self, batch: BatchSearch) -> Result<(), RepositoryError> {
        let mut tables = self.write();
        match tables.batches.iter_mut().find(|b| b.id == batch.id) {
            Some(existing) => *existing = batch,
            None => tables.batches.push(batch),
        }
        Ok(())
    }

    async fn save_results(
        &self,
        id: &BatchId,
        query: &str,
        documents: &[Document],
    ) -> Result<(), RepositoryError> {
        let mut tables = self.write();
        if let Some(reason) = &tables.fail_saves {
            return Err(RepositoryError::Unavailable(reason.clone()));
        }
        if !tables.batches.iter().any(|b| &b.id == id) {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        tables.save_calls.push((id.clone(), query.to_string(), documents.len()));

        let mut added = 0;
        for document in documents {
            let exists = tables
                .results
                .iter()
                .any(|r| &r.batch_id == id && r.query == query && r.document_id == document.id);
            if !exists {
                tables.results.push(SearchResult::new(id.clone(), query, document));
                added += 1;
            }
        }
        if let Some(batch) = tables.batches.iter_mut().find(|b| &b.id == id) {
            batch.nb_results += added;
        }
        Ok(())
    }

    async fn set_state(&self, id: &BatchId, state: BatchState) -> Result<(), RepositoryError> {
        let now = self.clock.now();
        self.update(id, |batch| {
            batch.state = state;
            match state {
                BatchState::Running => batch.run_started_at = Some(now),
                BatchState::Success | BatchState::Failure | BatchState::Cancelled => {
                    batch.run_finished_at = Some(now)
                }
                BatchState::Queued => {}
            }
        })
    }

    async fn set_error(&self, id: &BatchId, failure: &SearchFailure) -> Result<(), RepositoryError> {
        let now = self.clock.now();
        self.update(id, |batch| {
            batch.state = BatchState::Failure;
            batch.error_message = Some(failure.cause.to_string());
            batch.error_query = failure.query.clone();
            batch.run_finished_at = Some(now);
        })
    }

    async fn queued_ids(&self) -> Result<Vec<BatchId>, RepositoryError> {
        let tables = self.read();
        let mut queued: Vec<&BatchSearch> = tables
            .batches
            .iter()
            .filter(|b| b.state == BatchState::Queued)
            .collect();
        queued.sort_by_key(|b| b.created_at);
        Ok(queued.into_iter().map(|b| b.id.clone()).collect())
    }

    async fn reset(&self, id: &BatchId) -> Result<(), RepositoryError> {
        self.update(id, |batch| {
            batch.state = BatchState::Queued;
            batch.run_started_at = None;
            batch.run_finished_at = None;
        })
    }

    async fn results(&self, id: &BatchId) -> Result<Vec<SearchResult>, RepositoryError> {
        let tables = self.read();
        if !tables.batches.iter().any(|b| &b.id == id) {
            return Err(RepositoryError::NotFound(id.clone()));
        }
        Ok(tables.results.iter().filter(|r| &r.batch_id == id).cloned().collect())
    }

    async fn delete(&self, id: &BatchId) -> Result<bool, RepositoryError> {
        let mut tables = self.write();
        let before = tables.batches.len();
        tables.batches.retain(|b| &b.id != id);
        tables.results.retain(|r| &r.batch_id != id);
        Ok(tables.batches.len() != before)
    }
}
