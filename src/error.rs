//! Error types for the libris vector database
//!
//! This module provides structured error types using thiserror for better
//! error handling and actionable error messages. Lower layers keep their own
//! enums (`VectorError`, `ClusteringError`, `PersistenceError`); they are
//! wrapped here with the library and index kind they failed for.

use thiserror::Error;

use crate::types::{IndexKind, LibraryId};

/// Main error type for library, document and search operations
#[derive(Error, Debug)]
pub enum LibrisError {
    /// Request validation errors, one message per problem
    #[error("Validation failed: {}", errors.join("; "))]
    Validation { errors: Vec<String> },

    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    #[error("Failed to embed text: {reason}")]
    Embedding { reason: String },

    /// Build, load, save or search failures of a specific index
    #[error("Index operation failed for library {library_id} ({kind} index): {source}")]
    Index {
        library_id: LibraryId,
        kind: IndexKind,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Storage operation failed: {reason}")]
    Store { reason: String },

    #[error("Invalid configuration: {reason}")]
    Config { reason: String },
}

impl LibrisError {
    pub fn validation(errors: Vec<String>) -> Self {
        Self::Validation { errors }
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    pub fn store(reason: impl Into<String>) -> Self {
        Self::Store {
            reason: reason.into(),
        }
    }

    /// Get a stable status code for this error type.
    ///
    /// Returns a string identifier that can be used in JSON responses
    /// for programmatic error handling.
    pub fn status_code(&self) -> String {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Embedding { .. } => "EMBEDDING_ERROR",
            Self::Index { .. } => "INDEX_ERROR",
            Self::Store { .. } => "DATABASE_ERROR",
            Self::Config { .. } => "CONFIG_ERROR",
        }
        .to_string()
    }

    /// Whether the caller, rather than the system, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::NotFound { .. })
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Validation { .. } => vec![
                "Filter operators must be one of eq, ne, gt, gte, lt, lte, in, contains, starts_with, ends_with",
                "The 'in' operator takes a JSON list, e.g. tags:in:[\"a\",\"b\"]",
            ],
            Self::NotFound { .. } => vec![
                "Run 'libris library list' to see existing libraries",
            ],
            Self::Embedding { .. } => vec![
                "Check that the embedding model downloaded correctly",
                "Ensure you have internet connection for first-time model download",
            ],
            Self::Index { .. } => vec![
                "Run 'libris indexes delete <library>' to drop the stored index; it is rebuilt on the next search",
                "Check disk space and permissions in the index directory",
            ],
            Self::Store { .. } => vec![
                "Check that the data directory exists and is writable",
            ],
            Self::Config { .. } => vec![
                "Run 'libris config' to inspect the effective settings",
                "Run 'libris init --force' to regenerate the settings file",
            ],
        }
    }
}

/// Result type alias for libris operations
pub type LibrisResult<T> = Result<T, LibrisError>;

/// Helper trait for attaching index context to lower-level errors
pub trait IndexContext<T> {
    fn for_index(self, library_id: LibraryId, kind: IndexKind) -> LibrisResult<T>;
}

impl<T, E> IndexContext<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn for_index(self, library_id: LibraryId, kind: IndexKind) -> LibrisResult<T> {
        self.map_err(|e| LibrisError::Index {
            library_id,
            kind,
            source: Box::new(e),
        })
    }
}
