//! MemoryIndex - in-memory `Indexer` for tests and the CLI demo.
//!
//! Evaluates the structured query directly against stored documents:
//! term/terms/prefix on keyword fields, tokenized matching on `content`,
//! fuzzy terms, sloppy phrases and the free-text syntax.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{Document, DocumentId, Project};
use crate::error::IndexError;
use crate::ports::{Indexer, Scroll, ScrollSettings};
use crate::search::analysis::{fuzzy_matches, phrase_matches, tokenize};
use crate::search::{Query, TextQuery, query_string};

#[derive(Debug, Default)]
struct ScrollStats {
    searches: AtomicUsize,
    pages: AtomicUsize,
    cleared: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    documents: RwLock<Vec<Document>>,
    stats: Arc<ScrollStats>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let index = Self::new();
        index.add_all(documents);
        index
    }

    pub fn add(&self, document: Document) {
        self.add_all([document]);
    }

    pub fn add_all(&self, documents: impl IntoIterator<Item = Document>) {
        let mut stored = self.documents.write().unwrap_or_else(|e| e.into_inner());
        stored.extend(documents);
    }

    pub fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `search` calls that opened a scroll.
    pub fn searches(&self) -> usize {
        self.stats.searches.load(Ordering::SeqCst)
    }

    /// Number of `next_page` calls over all scrolls.
    pub fn page_requests(&self) -> usize {
        self.stats.pages.load(Ordering::SeqCst)
    }

    pub fn cleared_scrolls(&self) -> usize {
        self.stats.cleared.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Indexer for MemoryIndex {
    async fn search(
        &self,
        projects: &[Project],
        query: &Query,
        scroll: ScrollSettings,
    ) -> Result<Box<dyn Scroll>, IndexError> {
        if scroll.size == 0 {
            return Err(IndexError::InvalidScroll(
                "[size] cannot be [0] in a scroll context".to_string(),
            ));
        }
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        let mut hits = VecDeque::new();
        for document in documents.iter().filter(|d| projects.contains(&d.project)) {
            if matches(query, document)? {
                hits.push_back(document.clone());
            }
        }
        self.stats.searches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryScroll {
            hits,
            size: scroll.size,
            stats: Arc::clone(&self.stats),
        }))
    }

    async fn fetch(
        &self,
        project: &Project,
        id: &DocumentId,
        excluded_fields: &[&str],
    ) -> Result<Option<Document>, IndexError> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        let found = documents
            .iter()
            .find(|d| &d.project == project && &d.id == id)
            .cloned()
            .map(|mut document| {
                for field in excluded_fields {
                    match *field {
                        "content" => document.content.clear(),
                        "metadata" => document.metadata.clear(),
                        _ => {}
                    }
                }
                document
            });
        Ok(found)
    }
}

struct MemoryScroll {
    hits: VecDeque<Document>,
    size: usize,
    stats: Arc<ScrollStats>,
}

#[async_trait]
impl Scroll for MemoryScroll {
    async fn next_page(&mut self) -> Result<Vec<Document>, IndexError> {
        self.stats.pages.fetch_add(1, Ordering::SeqCst);
        let take = self.size.min(self.hits.len());
        Ok(self.hits.drain(..take).collect())
    }

    async fn clear(self: Box<Self>) {
        self.stats.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

fn matches(query: &Query, document: &Document) -> Result<bool, IndexError> {
    Ok(match query {
        Query::MatchAll => true,
        Query::Bool(b) => {
            for q in b.must.iter().chain(&b.filter) {
                if !matches(q, document)? {
                    return Ok(false);
                }
            }
            for q in &b.must_not {
                if matches(q, document)? {
                    return Ok(false);
                }
            }
            if b.should.is_empty() || !b.must.is_empty() || !b.filter.is_empty() {
                true
            } else {
                let mut any = false;
                for q in &b.should {
                    if matches(q, document)? {
                        any = true;
                        break;
                    }
                }
                any
            }
        }
        Query::Term { field, value } => term_matches(document, field, value),
        Query::Terms { field, values } => values.iter().any(|v| term_matches(document, field, v)),
        Query::Prefix { field, value } => {
            keyword(document, field).is_some_and(|k| k.starts_with(value.as_str()))
        }
        Query::Match { field, text } => {
            let tokens = tokenize(&keyword(document, field).unwrap_or_default());
            tokenize(text).iter().any(|t| tokens.contains(t))
        }
        Query::MatchPhrase { field, text, slop } => {
            let tokens = tokenize(&keyword(document, field).unwrap_or_default());
            phrase_matches(&tokens, &tokenize(text), *slop)
        }
        Query::QueryString {
            query,
            fuzziness,
            default_field,
        } => {
            let parsed = query_string::parse(query)
                .map_err(|detail| IndexError::QueryParse(format!("[{query}]: {detail}")))?;
            let field = default_field.as_deref().unwrap_or("content");
            let tokens = tokenize(&keyword(document, field).unwrap_or_default());
            text_matches(&parsed, &tokens, *fuzziness)
        }
    })
}

fn text_matches(query: &TextQuery, tokens: &[String], default_fuzziness: u32) -> bool {
    match query {
        TextQuery::All => true,
        TextQuery::Term { text, fuzziness } => {
            let terms = tokenize(text);
            match terms.as_slice() {
                [] => false,
                [term] => {
                    let fuzziness = fuzziness.unwrap_or(default_fuzziness);
                    tokens.iter().any(|t| fuzzy_matches(t, term, fuzziness))
                }
                // "e-mail" style words behave like a phrase
                _ => phrase_matches(tokens, &terms, 0),
            }
        }
        TextQuery::Prefix(prefix) => {
            let prefix = prefix.to_lowercase();
            tokens.iter().any(|t| t.starts_with(&prefix))
        }
        TextQuery::Phrase { text, slop } => phrase_matches(tokens, &tokenize(text), *slop),
        TextQuery::And(all) => all.iter().all(|q| text_matches(q, tokens, default_fuzziness)),
        TextQuery::Or(any) => any.iter().any(|q| text_matches(q, tokens, default_fuzziness)),
        TextQuery::Not(inner) => !text_matches(inner, tokens, default_fuzziness),
    }
}

fn term_matches(document: &Document, field: &str, value: &Value) -> bool {
    match (field, value) {
        ("deleted", Value::Bool(b)) => document.deleted == *b,
        ("content", Value::String(s)) => tokenize(&document.content).contains(&s.to_lowercase()),
        (_, Value::String(s)) => keyword(document, field).is_some_and(|k| k == *s),
        (_, other) => document.metadata.get(field) == Some(other),
    }
}

fn keyword(document: &Document, field: &str) -> Option<String> {
    match field {
        "type" => Some("Document".to_string()),
        "id" | "_id" => Some(document.id.to_string()),
        "root_id" | "rootId" => Some(document.root_id.to_string()),
        "project" | "_index" => Some(document.project.name().to_string()),
        "path" => Some(document.path.clone()),
        "content_type" | "contentType" => Some(document.content_type.clone()),
        "content" => Some(document.content.clone()),
        other => {
            let key = other.strip_prefix("metadata.").unwrap_or(other);
            document.metadata.get(key).map(|v| match v {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchId, BatchSearch, User};
    use chrono::Utc;
    use crate::search::build_query;
    use std::time::Duration;

    fn project() -> Project {
        Project::new("test-project")
    }

    fn scroll(size: usize) -> ScrollSettings {
        ScrollSettings {
            size,
            keep_alive: Duration::from_secs(60),
        }
    }

    async fn hits(index: &MemoryIndex, batch: &BatchSearch, query: &str) -> Vec<String> {
        let query = build_query(batch, query).unwrap();
        let mut scroll = index.search(&[project()], &query, scroll(100)).await.unwrap();
        let page = scroll.next_page().await.unwrap();
        scroll.clear().await;
        page.into_iter().map(|d| d.id.to_string()).collect()
    }

    fn batch() -> BatchSearch {
        BatchSearch::new(BatchId::new("b1"), vec![project()], "name", ["q"], User::local(), Utc::now())
    }

    #[tokio::test]
    async fn fuzziness_is_bounded_by_edit_distance() {
        let index = MemoryIndex::with_documents([Document::new(project(), "mydoc", "I'm looking for mydoc")]);

        assert!(hits(&index, &batch().with_fuzziness(1), "doc").await.is_empty());
        assert_eq!(hits(&index, &batch().with_fuzziness(2), "hedoc").await, vec!["mydoc"]);
    }

    #[tokio::test]
    async fn filters_exclude_deleted_other_types_and_paths() {
        let index = MemoryIndex::with_documents([
            Document::new(project(), "a", "mydoc").with_content_type("application/pdf").with_path("/x/a"),
            Document::new(project(), "b", "mydoc").with_path("/y/b"),
            Document::new(project(), "c", "mydoc").deleted(),
        ]);

        assert_eq!(hits(&index, &batch(), "mydoc").await, vec!["a", "b"]);
        assert_eq!(
            hits(&index, &batch().with_file_types(["application/pdf"]), "mydoc").await,
            vec!["a"]
        );
        assert_eq!(hits(&index, &batch().with_paths(["/y"]), "mydoc").await, vec!["b"]);
    }

    #[tokio::test]
    async fn boolean_operators_in_free_text() {
        let index = MemoryIndex::with_documents([
            Document::new(project(), "one", "mydoc one"),
            Document::new(project(), "two", "mydoc two"),
        ]);

        assert_eq!(hits(&index, &batch(), "mydoc AND one").await, vec!["one"]);
        assert_eq!(hits(&index, &batch(), "mydoc -one").await, vec!["two"]);
        assert_eq!(hits(&index, &batch(), "one OR two").await.len(), 2);
    }

    #[tokio::test]
    async fn scroll_pages_until_exhausted() {
        let index = MemoryIndex::with_documents((0..5).map(|i| Document::new(project(), format!("d{i}"), "mydoc")));
        let query = build_query(&batch(), "mydoc").unwrap();
        let mut scroll = index.search(&[project()], &query, scroll(2)).await.unwrap();

        let sizes = [
            scroll.next_page().await.unwrap().len(),
            scroll.next_page().await.unwrap().len(),
            scroll.next_page().await.unwrap().len(),
            scroll.next_page().await.unwrap().len(),
        ];
        scroll.clear().await;

        assert_eq!(sizes, [2, 2, 1, 0]);
        assert_eq!(index.page_requests(), 4);
        assert_eq!(index.cleared_scrolls(), 1);
    }

    #[tokio::test]
    async fn zero_page_size_is_rejected() {
        let index = MemoryIndex::new();
        let result = index.search(&[project()], &Query::MatchAll, scroll(0)).await;
        assert!(matches!(result, Err(IndexError::InvalidScroll(_))));
    }

    #[tokio::test]
    async fn fetch_drops_excluded_fields() {
        let index = MemoryIndex::with_documents([Document::new(project(), "id", "content")]);
        let document = index
            .fetch(&project(), &DocumentId::new("id"), &["content"])
            .await
            .unwrap()
            .unwrap();
        assert!(document.content.is_empty());
        assert!(index.fetch(&project(), &DocumentId::new("nope"), &[]).await.unwrap().is_none());
    }
}
