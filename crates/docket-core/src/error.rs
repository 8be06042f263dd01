//! Error taxonomy for the engine.
//!
//! - `EngineError`: rejected registry / manager operations (the caller sees these).
//! - `TaskError`: how a unit of work ends when it does not return a value.
//! - `SearchError` / `SearchFailure`: batch-search failures, persisted on the batch record.
//! - `RepositoryError`, `IndexError`: failures reported by the external collaborators.

use thiserror::Error;

use crate::domain::{BatchId, TaskId, TaskType};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task {0} already exists")]
    DuplicateTask(TaskId),

    #[error("task {0} is running and cannot be removed")]
    TaskRunning(TaskId),

    #[error("factory for task type '{0}' is already registered")]
    AlreadyRegistered(TaskType),

    #[error("missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error("task arguments must serialize to a JSON object: {0}")]
    InvalidArguments(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<figment::Error> for EngineError {
    fn from(err: figment::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Why a unit of work did not produce a result.
///
/// `Cancelled` is control flow, not a failure: the worker turns it into a
/// cancellation of the record instead of an error.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("no factory registered for task type {0}")]
    UnknownTaskType(TaskType),

    #[error("invalid arguments for {task_type}: {reason}")]
    InvalidArguments { task_type: TaskType, reason: String },

    #[error("task cancelled (requeue={requeue})")]
    Cancelled { requeue: bool },

    #[error(transparent)]
    Search(#[from] SearchFailure),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("Failed to parse query [{query}]: {detail}")]
    QueryParse { query: String, detail: String },

    #[error("{0}")]
    ScrollConfiguration(String),

    #[error("Batch timed out after {elapsed_secs}s")]
    DeadlineExceeded { elapsed_secs: u64 },

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Any other way the run ended (panic, unknown failure).
    #[error("{0}")]
    Internal(String),
}

/// A `SearchError` together with the query that was running when it happened.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{cause}")]
pub struct SearchFailure {
    pub query: Option<String>,
    #[source]
    pub cause: SearchError,
}

impl SearchFailure {
    pub fn new(cause: SearchError) -> Self {
        Self { query: None, cause }
    }

    pub fn on_query(query: impl Into<String>, cause: SearchError) -> Self {
        Self {
            query: Some(query.into()),
            cause,
        }
    }
}

impl From<SearchError> for SearchFailure {
    fn from(cause: SearchError) -> Self {
        SearchFailure::new(cause)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("batch search not found: {0}")]
    NotFound(BatchId),

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("{0}")]
    InvalidScroll(String),

    #[error("failed to parse query: {0}")]
    QueryParse(String),

    #[error("index unavailable: {0}")]
    Unavailable(String),
}
