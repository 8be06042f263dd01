//! Indexer port - the full-text index, seen as a capability.
//!
//! # Implementations
//! - **MemoryIndex** (`impls::memory_index`): evaluates `Query` over documents held in memory

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{Document, DocumentId, Project};
use crate::error::IndexError;
use crate::search::Query;

/// Page size and keep-alive of one scrolled read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollSettings {
    pub size: usize,
    pub keep_alive: Duration,
}

/// Indexer runs queries over one or more projects.
///
/// A search opens a scroll; the caller pulls pages until an empty one comes
/// back and then clears the scroll.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn search(
        &self,
        projects: &[Project],
        query: &Query,
        scroll: ScrollSettings,
    ) -> Result<Box<dyn Scroll>, IndexError>;

    /// Fetch one document, leaving out `excluded_fields` (e.g. `content`).
    async fn fetch(
        &self,
        project: &Project,
        id: &DocumentId,
        excluded_fields: &[&str],
    ) -> Result<Option<Document>, IndexError>;
}

/// Cursor over the hits of one search.
#[async_trait]
pub trait Scroll: Send {
    /// Next page of hits; empty once exhausted.
    async fn next_page(&mut self) -> Result<Vec<Document>, IndexError>;

    /// Release the cursor on the index side.
    async fn clear(self: Box<Self>);
}
