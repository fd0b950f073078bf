//! Type-safe wrappers and error types shared by the vector indexes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type-safe wrapper for k-means partition ids.
///
/// Partitions are numbered from zero, so a valid id is always `< k`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterId(u32);

impl ClusterId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(&self) -> u32 {
        self.0
    }

    /// Position of this partition in centroid and bucket arrays.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ClusterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of components in every vector of an index. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize")]
pub struct VectorDimension(usize);

impl TryFrom<usize> for VectorDimension {
    type Error = VectorError;

    fn try_from(dim: usize) -> Result<Self, Self::Error> {
        Self::new(dim)
    }
}

impl VectorDimension {
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        match dim {
            0 => Err(VectorError::ZeroDimension),
            _ => Ok(Self(dim)),
        }
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Rejects a query or column whose length differs from this dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        match vector.len() {
            len if len == self.0 => Ok(()),
            actual => Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual,
            }),
        }
    }
}

/// Failures inside the similarity kernel and the indexes built on it.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector dimension must be at least 1\nSuggestion: Check the embedding model's output size")]
    ZeroDimension,

    #[error(
        "Embedding generation failed: {0}\nSuggestion: Verify the embedding model is properly initialized"
    )]
    EmbeddingFailed(String),

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure the chunk set is non-empty and every embedding has the same dimension"
    )]
    ClusteringFailed(String),

    #[error(
        "Malformed chunk embedding: {0}\nSuggestion: Re-ingest the document so its chunks are embedded again"
    )]
    MalformedEmbedding(String),
}
