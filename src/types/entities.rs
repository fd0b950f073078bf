//! Library, document and chunk records.
//!
//! These are the rows the index subsystem consumes. A chunk carries its
//! embedding as a raw little-endian byte buffer whose element type is
//! declared by the `dtype` metadata key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ChunkId, DocumentId, LibraryId};
use crate::vector::VectorError;

/// Open key-value metadata attached to every entity.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key naming the element type of a chunk embedding.
pub const DTYPE_KEY: &str = "dtype";

/// Metadata key carrying the declared embedding length.
pub const DIMENSION_KEY: &str = "embedding_dimension";

/// Element type of a serialized embedding buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingDtype {
    Float32,
    /// Buffers written without a `dtype` key are float64.
    #[default]
    Float64,
}

impl EmbeddingDtype {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingDtype::Float32 => "float32",
            EmbeddingDtype::Float64 => "float64",
        }
    }

    pub fn byte_width(&self) -> usize {
        match self {
            EmbeddingDtype::Float32 => 4,
            EmbeddingDtype::Float64 => 8,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "float32" | "f32" => Some(EmbeddingDtype::Float32),
            "float64" | "f64" => Some(EmbeddingDtype::Float64),
            _ => None,
        }
    }

    /// Serializes a vector into a little-endian buffer of this dtype.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(vector.len() * self.byte_width());
        match self {
            EmbeddingDtype::Float32 => {
                for value in vector {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
            }
            EmbeddingDtype::Float64 => {
                for value in vector {
                    bytes.extend_from_slice(&f64::from(*value).to_le_bytes());
                }
            }
        }
        bytes
    }

    /// Parses a little-endian buffer of this dtype.
    pub fn decode(&self, bytes: &[u8]) -> Result<Vec<f32>, VectorError> {
        let width = self.byte_width();
        if bytes.len() % width != 0 {
            return Err(VectorError::MalformedEmbedding(format!(
                "embedding buffer of {} bytes is not a whole number of {} values",
                bytes.len(),
                self.as_str()
            )));
        }
        let vector = match self {
            EmbeddingDtype::Float32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            EmbeddingDtype::Float64 => bytes
                .chunks_exact(8)
                .map(|b| {
                    f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]) as f32
                })
                .collect(),
        };
        Ok(vector)
    }
}

/// A contiguous piece of a document plus its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub library_id: LibraryId,
    pub content: String,
    pub embedding: Vec<u8>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    /// Builds a chunk whose embedding is stored as float32.
    ///
    /// Records `dtype` and `embedding_dimension` in the metadata so the
    /// buffer can be decoded later without outside knowledge.
    pub fn from_vector(
        library_id: LibraryId,
        document_id: DocumentId,
        content: impl Into<String>,
        vector: &[f32],
        mut metadata: Metadata,
    ) -> Self {
        let dtype = EmbeddingDtype::Float32;
        metadata.insert(DTYPE_KEY.to_string(), Value::from(dtype.as_str()));
        metadata.insert(DIMENSION_KEY.to_string(), Value::from(vector.len()));
        let now = Utc::now();
        Self {
            id: ChunkId::new(),
            document_id,
            library_id,
            content: content.into(),
            embedding: dtype.encode(vector),
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Declared element type of the embedding buffer.
    pub fn dtype(&self) -> Result<EmbeddingDtype, VectorError> {
        match self.metadata.get(DTYPE_KEY) {
            None | Some(Value::Null) => Ok(EmbeddingDtype::default()),
            Some(Value::String(s)) => EmbeddingDtype::parse(s).ok_or_else(|| {
                VectorError::MalformedEmbedding(format!("unsupported embedding dtype '{s}'"))
            }),
            Some(other) => Err(VectorError::MalformedEmbedding(format!(
                "embedding dtype must be a string, got {other}"
            ))),
        }
    }

    /// Decodes the embedding buffer into a vector.
    ///
    /// When `embedding_dimension` is present the decoded length must match.
    pub fn vector(&self) -> Result<Vec<f32>, VectorError> {
        let vector = self.dtype()?.decode(&self.embedding)?;
        if let Some(declared) = self.metadata.get(DIMENSION_KEY).and_then(Value::as_u64) {
            if declared as usize != vector.len() {
                return Err(VectorError::DimensionMismatch {
                    expected: declared as usize,
                    actual: vector.len(),
                });
            }
        }
        Ok(vector)
    }
}

/// A document owned by one library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub library_id: LibraryId,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(library_id: LibraryId, title: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId::new(),
            library_id,
            title: title.into(),
            content: content.into(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A named collection of documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
    pub id: LibraryId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Library {
    pub fn new(name: impl Into<String>, description: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: LibraryId::new(),
            name: name.into(),
            description,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
