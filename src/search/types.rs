use serde::{Deserialize, Serialize};

use crate::filter::MetadataFilter;
use crate::types::{Document, IndexKind, LibraryId};

fn default_limit() -> usize {
    5
}

/// A semantic search over one library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub library_id: LibraryId,
    #[serde(default)]
    pub index_kind: IndexKind,
    /// Maximum number of documents returned
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Applied to chunks before indexing and to result documents after
    #[serde(default)]
    pub metadata_filters: Vec<MetadataFilter>,
}

impl SearchRequest {
    pub fn new(library_id: LibraryId, query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            library_id,
            index_kind: IndexKind::default(),
            limit: default_limit(),
            metadata_filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_index(mut self, kind: IndexKind) -> Self {
        self.index_kind = kind;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_filters(mut self, filters: Vec<MetadataFilter>) -> Self {
        self.metadata_filters = filters;
        self
    }
}

/// One ranked document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: Document,
    /// Rank-derived relevance in `(0, 1]`
    pub score: f32,
    /// How many of the fetched chunk hits belong to this document
    pub matching_chunks: usize,
}
