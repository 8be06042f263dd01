//! BatchSearchRepository port - persisted batch searches and their result rows.
//!
//! # Implementations
//! - **InMemoryBatchRepository** (`impls::memory_repository`)

use async_trait::async_trait;

use crate::domain::{BatchId, BatchSearch, BatchState, Document, SearchResult};
use crate::error::{RepositoryError, SearchFailure};

/// Source of truth for batch searches.
///
/// The dispatch loop drives `state` through `set_state` / `set_error` /
/// `reset`; the runner only appends result rows.
#[async_trait]
pub trait BatchSearchRepository: Send + Sync {
    async fn get(&self, id: &BatchId) -> Result<BatchSearch, RepositoryError>;

    async fn save(&self, batch: BatchSearch) -> Result<(), RepositoryError>;

    /// Append one row per document for `query`. Rows already present for the
    /// same `(batch, query, document)` are kept once.
    async fn save_results(
        &self,
        id: &BatchId,
        query: &str,
        documents: &[Document],
    ) -> Result<(), RepositoryError>;

    async fn set_state(&self, id: &BatchId, state: BatchState) -> Result<(), RepositoryError>;

    /// Record the failure (message and failing query) and move to FAILURE.
    async fn set_error(&self, id: &BatchId, failure: &SearchFailure) -> Result<(), RepositoryError>;

    /// Ids of the batches waiting to run, oldest first.
    async fn queued_ids(&self) -> Result<Vec<BatchId>, RepositoryError>;

    /// Back to QUEUED so startup recovery picks it up again.
    async fn reset(&self, id: &BatchId) -> Result<(), RepositoryError>;

    async fn results(&self, id: &BatchId) -> Result<Vec<SearchResult>, RepositoryError>;

    /// Delete the batch and its results. Returns false if it did not exist.
    async fn delete(&self, id: &BatchId) -> Result<bool, RepositoryError>;
}
