//! Documents as returned by the index.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::ids::{DocumentId, Project};

/// A document reference returned by a search or a fetch.
///
/// `content` and `metadata` may be empty when the caller asked the index to
/// exclude them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub root_id: DocumentId,
    pub project: Project,
    pub path: String,
    pub content_type: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Document {
    /// A root document (its own root) with plain-text defaults.
    pub fn new(project: Project, id: impl Into<String>, content: impl Into<String>) -> Self {
        let id = DocumentId::new(id);
        Self {
            root_id: id.clone(),
            path: format!("/path/to/{id}"),
            id,
            project,
            content_type: "text/plain".to_string(),
            content: content.into(),
            deleted: false,
            metadata: HashMap::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_root(mut self, root_id: impl Into<String>) -> Self {
        self.root_id = DocumentId::new(root_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }
}
