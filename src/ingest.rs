//! Document ingestion: chunk, embed and store.
//!
//! Every mutation drops the library's cached indexes so the next search
//! rebuilds over the new chunk set.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::chunking::{ChunkingConfig, SmartChunker};
use crate::error::{LibrisError, LibrisResult};
use crate::search::IndexCache;
use crate::store::{ChunkStore, DocumentStore, LibraryStore};
use crate::types::{Chunk, Document, DocumentId, LibraryId, Metadata};
use crate::vector::Embedder;

/// Metadata key naming the model a chunk was embedded with.
pub const EMBEDDING_MODEL_KEY: &str = "embedding_model";

const DEFAULT_BATCH_SIZE: usize = 32;

/// Partial update of a document. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    /// Replaces the whole metadata map
    pub metadata: Option<Metadata>,
}

pub struct DocumentIngestor {
    libraries: Arc<dyn LibraryStore>,
    documents: Arc<dyn DocumentStore>,
    chunks: Arc<dyn ChunkStore>,
    embedder: Arc<dyn Embedder>,
    cache: Arc<IndexCache>,
    chunker: SmartChunker,
    batch_size: usize,
}

impl DocumentIngestor {
    pub fn new(
        libraries: Arc<dyn LibraryStore>,
        documents: Arc<dyn DocumentStore>,
        chunks: Arc<dyn ChunkStore>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<IndexCache>,
    ) -> Self {
        Self {
            libraries,
            documents,
            chunks,
            embedder,
            cache,
            chunker: SmartChunker::default(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    #[must_use]
    pub fn with_chunking(mut self, config: ChunkingConfig) -> Self {
        self.chunker = SmartChunker::new(config);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Stores a new document and its embedded chunks.
    pub async fn add_document(
        &self,
        library_id: LibraryId,
        title: impl Into<String>,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> LibrisResult<Document> {
        if self.libraries.find(library_id).await?.is_none() {
            return Err(LibrisError::not_found("Library", library_id));
        }

        let document = Document::new(library_id, title, content).with_metadata(metadata);
        // Embed before storing anything so a failure leaves no partial document
        let chunks = self.build_chunks(&document).await?;
        let document = self.documents.insert(document).await?;
        let count = chunks.len();
        self.chunks.insert_many(chunks).await?;
        self.cache.invalidate(library_id, None);

        info!(
            "Added document {} to library {library_id} with {count} chunks",
            document.id
        );
        Ok(document)
    }

    /// Applies `update`; a content change replaces the document's chunks.
    pub async fn update_document(
        &self,
        id: DocumentId,
        update: DocumentUpdate,
    ) -> LibrisResult<Document> {
        let Some(mut document) = self.documents.find(id).await? else {
            return Err(LibrisError::not_found("Document", id));
        };

        let content_changed = update
            .content
            .as_ref()
            .is_some_and(|content| *content != document.content);
        if let Some(title) = update.title {
            document.title = title;
        }
        if let Some(content) = update.content {
            document.content = content;
        }
        if let Some(metadata) = update.metadata {
            document.metadata = metadata;
        }

        let replacement = if content_changed {
            Some(self.build_chunks(&document).await?)
        } else {
            None
        };

        let document = self.documents.update(document).await?;
        if let Some(chunks) = replacement {
            let removed = self.chunks.delete_by_document(id).await?;
            let added = chunks.len();
            self.chunks.insert_many(chunks).await?;
            debug!("Replaced {removed} chunks of document {id} with {added}");
        }
        self.cache.invalidate(document.library_id, None);

        info!("Updated document {id}");
        Ok(document)
    }

    /// Deletes a document and its chunks.
    pub async fn delete_document(&self, id: DocumentId) -> LibrisResult<()> {
        let Some(document) = self.documents.find(id).await? else {
            return Err(LibrisError::not_found("Document", id));
        };
        self.documents.delete(id).await?;
        self.cache.invalidate(document.library_id, None);

        info!("Deleted document {id}");
        Ok(())
    }

    async fn build_chunks(&self, document: &Document) -> LibrisResult<Vec<Chunk>> {
        if document.content.trim().is_empty() {
            return Ok(Vec::new());
        }

        let pieces = self.chunker.chunk_text(&document.content);
        let texts: Vec<String> = pieces.iter().map(|piece| piece.text.clone()).collect();

        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self
                .embedder
                .embed(batch)
                .await
                .map_err(|e| LibrisError::Embedding {
                    reason: e.to_string(),
                })?;
            vectors.extend(embedded);
        }
        if vectors.len() != pieces.len() {
            return Err(LibrisError::Embedding {
                reason: format!(
                    "embedder returned {} vectors for {} chunks",
                    vectors.len(),
                    pieces.len()
                ),
            });
        }

        let model = self.embedder.model_name().to_string();
        Ok(pieces
            .into_iter()
            .zip(vectors)
            .map(|(piece, vector)| {
                let mut metadata = piece.metadata;
                metadata.insert(EMBEDDING_MODEL_KEY.to_string(), Value::from(model.as_str()));
                Chunk::from_vector(
                    document.library_id,
                    document.id,
                    piece.text,
                    &vector,
                    metadata,
                )
            })
            .collect())
    }
}
