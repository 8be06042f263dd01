//! Domain model (ids, task records, batch searches, documents).

pub mod batch;
pub mod document;
pub mod ids;
pub mod task;

pub use batch::{BatchSearch, BatchState, QuerySet, SearchResult};
pub use document::Document;
pub use ids::{BatchId, DocumentId, Project, TaskId, User};
pub use task::{TaskArguments, TaskRecord, TaskState, TaskType};
