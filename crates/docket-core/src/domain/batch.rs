//! Batch search aggregate and its result rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::document::Document;
use super::ids::{BatchId, DocumentId, Project, User};

/// Persisted state of a batch search.
///
/// - Queued -> Running -> Success | Failure
/// - Running -> Cancelled, or Running -> Queued when cancelled with requeue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchState {
    Queued,
    Running,
    Success,
    Failure,
    Cancelled,
}

/// Ordered set of query strings: duplicates collapse, first insertion wins the
/// position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct QuerySet {
    queries: Vec<String>,
}

impl QuerySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the query was already present.
    pub fn insert(&mut self, query: impl Into<String>) -> bool {
        let query = query.into();
        if self.queries.contains(&query) {
            return false;
        }
        self.queries.push(query);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.queries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn contains(&self, query: &str) -> bool {
        self.queries.iter().any(|q| q == query)
    }
}

impl<S: Into<String>> FromIterator<S> for QuerySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = QuerySet::new();
        for query in iter {
            set.insert(query);
        }
        set
    }
}

impl From<Vec<String>> for QuerySet {
    fn from(queries: Vec<String>) -> Self {
        queries.into_iter().collect()
    }
}

impl From<QuerySet> for Vec<String> {
    fn from(set: QuerySet) -> Self {
        set.queries
    }
}

/// A batch of text queries run against one or more index projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSearch {
    pub id: BatchId,
    pub owner: User,
    pub name: String,
    pub description: String,
    pub projects: Vec<Project>,
    pub queries: QuerySet,
    /// Content-type allow-list; empty means no filter.
    pub file_types: Vec<String>,
    /// Path-prefix allow-list; empty means no filter.
    pub paths: Vec<String>,
    pub fuzziness: u32,
    pub phrase_matches: bool,
    pub slop: u32,
    /// Structured query body with a `<query>` placeholder.
    pub query_template: Option<String>,
    pub state: BatchState,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub run_started_at: Option<DateTime<Utc>>,
    pub run_finished_at: Option<DateTime<Utc>>,
    pub nb_results: usize,
    pub error_message: Option<String>,
    pub error_query: Option<String>,
}

impl BatchSearch {
    /// A QUEUED batch. Id and creation time come from the caller's ports, see
    /// `BatchSearchLoop::new_batch`.
    pub fn new<I, S>(
        id: BatchId,
        projects: Vec<Project>,
        name: impl Into<String>,
        queries: I,
        owner: User,
        now: DateTime<Utc>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            owner,
            name: name.into(),
            description: String::new(),
            projects,
            queries: queries.into_iter().collect(),
            file_types: Vec::new(),
            paths: Vec::new(),
            fuzziness: 0,
            phrase_matches: false,
            slop: 0,
            query_template: None,
            state: BatchState::Queued,
            published: false,
            created_at: now,
            run_started_at: None,
            run_finished_at: None,
            nb_results: 0,
            error_message: None,
            error_query: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_file_types<S: Into<String>>(mut self, file_types: impl IntoIterator<Item = S>) -> Self {
        self.file_types = file_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_paths<S: Into<String>>(mut self, paths: impl IntoIterator<Item = S>) -> Self {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_fuzziness(mut self, fuzziness: u32) -> Self {
        self.fuzziness = fuzziness;
        self
    }

    pub fn with_phrase_matches(mut self, slop: u32) -> Self {
        self.phrase_matches = true;
        self.slop = slop;
        self
    }

    pub fn with_query_template(mut self, template: impl Into<String>) -> Self {
        self.query_template = Some(template.into());
        self
    }

    pub fn with_state(mut self, state: BatchState) -> Self {
        self.state = state;
        self
    }
}

/// One matched document for one query of one batch.
///
/// Unique on `(batch_id, query, document_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub batch_id: BatchId,
    pub query: String,
    pub document_id: DocumentId,
    pub root_id: DocumentId,
    pub project: Project,
    pub path: String,
    pub content_type: String,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SearchResult {
    pub fn new(batch_id: BatchId, query: impl Into<String>, document: &Document) -> Self {
        Self {
            batch_id,
            query: query.into(),
            document_id: document.id.clone(),
            root_id: document.root_id.clone(),
            project: document.project.clone(),
            path: document.path.clone(),
            content_type: document.content_type.clone(),
            metadata: document.metadata.clone(),
        }
    }
}
