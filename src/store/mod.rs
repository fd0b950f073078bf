//! Record stores for libraries, documents and chunks.
//!
//! The search pipeline depends only on these traits. [`MemoryStore`]
//! implements all three and is what the CLI uses, persisted as a JSON
//! snapshot between runs.

mod memory;

use async_trait::async_trait;

use crate::error::LibrisResult;
use crate::types::{Chunk, ChunkId, Document, DocumentId, Library, LibraryId};

pub use memory::MemoryStore;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Chunks of every document in the library, in a stable order.
    async fn find_by_library(&self, library_id: LibraryId) -> LibrisResult<Vec<Chunk>>;

    async fn find_by_document(&self, document_id: DocumentId) -> LibrisResult<Vec<Chunk>>;

    async fn insert_many(&self, chunks: Vec<Chunk>) -> LibrisResult<Vec<ChunkId>>;

    /// Returns the number of chunks removed.
    async fn delete_by_document(&self, document_id: DocumentId) -> LibrisResult<usize>;

    async fn delete_by_library(&self, library_id: LibraryId) -> LibrisResult<usize>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find(&self, id: DocumentId) -> LibrisResult<Option<Document>>;

    async fn find_by_library(&self, library_id: LibraryId) -> LibrisResult<Vec<Document>>;

    async fn insert(&self, document: Document) -> LibrisResult<Document>;

    /// Replaces a stored document and bumps `updated_at`.
    async fn update(&self, document: Document) -> LibrisResult<Document>;

    /// Deletes the document and its chunks. Returns whether it existed.
    async fn delete(&self, id: DocumentId) -> LibrisResult<bool>;

    async fn delete_by_library(&self, library_id: LibraryId) -> LibrisResult<usize>;
}

#[async_trait]
pub trait LibraryStore: Send + Sync {
    async fn find(&self, id: LibraryId) -> LibrisResult<Option<Library>>;

    async fn list(&self) -> LibrisResult<Vec<Library>>;

    async fn insert(&self, library: Library) -> LibrisResult<Library>;

    /// Deletes the library with its documents and chunks.
    async fn delete(&self, id: LibraryId) -> LibrisResult<bool>;
}
