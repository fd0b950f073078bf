use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{ChunkStore, DocumentStore, LibraryStore};
use crate::error::{LibrisError, LibrisResult};
use crate::types::{Chunk, ChunkId, Document, DocumentId, Library, LibraryId};

const SNAPSHOT_VERSION: u32 = 1;

/// DashMap-backed store with secondary indexes for per-library and
/// per-document lookups.
///
/// Deletes cascade: a library takes its documents with it, a document its
/// chunks.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    libraries: Arc<DashMap<LibraryId, Library>>,
    documents: Arc<DashMap<DocumentId, Document>>,
    chunks: Arc<DashMap<ChunkId, Chunk>>,
    by_library: Arc<DashMap<LibraryId, Vec<DocumentId>>>,
    by_document: Arc<DashMap<DocumentId, Vec<ChunkId>>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreSnapshot {
    version: u32,
    libraries: Vec<Library>,
    documents: Vec<Document>,
    chunks: Vec<Chunk>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a snapshot written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// A missing file yields an empty store.
    pub fn load_snapshot(path: &Path) -> LibrisResult<Self> {
        let store = Self::new();
        let content = match fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(store),
            Err(e) => {
                return Err(LibrisError::store(format!(
                    "Failed to read '{}': {e}",
                    path.display()
                )));
            }
        };
        let snapshot: StoreSnapshot = serde_json::from_slice(&content).map_err(|e| {
            LibrisError::store(format!("Failed to parse '{}': {e}", path.display()))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(LibrisError::store(format!(
                "Unsupported store snapshot version {} in '{}'",
                snapshot.version,
                path.display()
            )));
        }

        for library in snapshot.libraries {
            store.put_library(library);
        }
        for document in snapshot.documents {
            store.put_document(document);
        }
        for chunk in snapshot.chunks {
            store.put_chunk(chunk);
        }
        debug!(
            "Loaded store snapshot: {} libraries, {} documents, {} chunks",
            store.libraries.len(),
            store.documents.len(),
            store.chunks.len()
        );
        Ok(store)
    }

    /// Writes every record to `path` atomically.
    pub fn save_snapshot(&self, path: &Path) -> LibrisResult<()> {
        let mut snapshot = StoreSnapshot {
            version: SNAPSHOT_VERSION,
            libraries: self.sorted_libraries(),
            ..StoreSnapshot::default()
        };
        for library in &snapshot.libraries {
            for document in self.documents_of(library.id) {
                snapshot.chunks.extend(self.chunks_of(document.id));
                snapshot.documents.push(document);
            }
        }

        let json = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| LibrisError::store(format!("Failed to serialize store: {e}")))?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let write = || -> std::io::Result<()> {
            fs::create_dir_all(dir)?;
            let mut temp = NamedTempFile::new_in(dir)?;
            temp.write_all(&json)?;
            temp.as_file().sync_all()?;
            temp.persist(path).map_err(|e| e.error)?;
            Ok(())
        };
        write().map_err(|e| {
            LibrisError::store(format!("Failed to write '{}': {e}", path.display()))
        })
    }

    fn put_library(&self, library: Library) {
        self.libraries.insert(library.id, library);
    }

    fn put_document(&self, document: Document) {
        let id = document.id;
        let library_id = document.library_id;
        if self.documents.insert(id, document).is_none() {
            self.by_library.entry(library_id).or_default().push(id);
        }
    }

    fn put_chunk(&self, chunk: Chunk) {
        let id = chunk.id;
        let document_id = chunk.document_id;
        if self.chunks.insert(id, chunk).is_none() {
            self.by_document.entry(document_id).or_default().push(id);
        }
    }

    fn sorted_libraries(&self) -> Vec<Library> {
        let mut libraries: Vec<Library> = self
            .libraries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        libraries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.as_uuid().cmp(b.id.as_uuid()))
        });
        libraries
    }

    fn documents_of(&self, library_id: LibraryId) -> Vec<Document> {
        let ids = self
            .by_library
            .get(&library_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.documents.get(id).map(|entry| entry.clone()))
            .collect()
    }

    fn chunks_of(&self, document_id: DocumentId) -> Vec<Chunk> {
        let ids = self
            .by_document
            .get(&document_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.iter()
            .filter_map(|id| self.chunks.get(id).map(|entry| entry.clone()))
            .collect()
    }

    fn remove_chunks_of(&self, document_id: DocumentId) -> usize {
        let Some((_, ids)) = self.by_document.remove(&document_id) else {
            return 0;
        };
        ids.iter()
            .filter(|id| self.chunks.remove(id).is_some())
            .count()
    }

    fn remove_document(&self, id: DocumentId) -> bool {
        let Some((_, document)) = self.documents.remove(&id) else {
            return false;
        };
        if let Some(mut ids) = self.by_library.get_mut(&document.library_id) {
            ids.retain(|&doc_id| doc_id != id);
        }
        self.remove_chunks_of(id);
        true
    }

    fn remove_documents_of(&self, library_id: LibraryId) -> usize {
        let Some((_, ids)) = self.by_library.remove(&library_id) else {
            return 0;
        };
        let mut removed = 0;
        for id in ids {
            if self.documents.remove(&id).is_some() {
                removed += 1;
            }
            self.remove_chunks_of(id);
        }
        removed
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn find_by_library(&self, library_id: LibraryId) -> LibrisResult<Vec<Chunk>> {
        Ok(self
            .documents_of(library_id)
            .iter()
            .flat_map(|document| self.chunks_of(document.id))
            .collect())
    }

    async fn find_by_document(&self, document_id: DocumentId) -> LibrisResult<Vec<Chunk>> {
        Ok(self.chunks_of(document_id))
    }

    async fn insert_many(&self, chunks: Vec<Chunk>) -> LibrisResult<Vec<ChunkId>> {
        for chunk in &chunks {
            if !self.documents.contains_key(&chunk.document_id) {
                return Err(LibrisError::not_found("Document", chunk.document_id));
            }
        }
        let ids = chunks.iter().map(|c| c.id).collect();
        for chunk in chunks {
            self.put_chunk(chunk);
        }
        Ok(ids)
    }

    async fn delete_by_document(&self, document_id: DocumentId) -> LibrisResult<usize> {
        Ok(self.remove_chunks_of(document_id))
    }

    async fn delete_by_library(&self, library_id: LibraryId) -> LibrisResult<usize> {
        let document_ids: Vec<DocumentId> = self
            .by_library
            .get(&library_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        Ok(document_ids
            .into_iter()
            .map(|id| self.remove_chunks_of(id))
            .sum())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, id: DocumentId) -> LibrisResult<Option<Document>> {
        Ok(self.documents.get(&id).map(|entry| entry.clone()))
    }

    async fn find_by_library(&self, library_id: LibraryId) -> LibrisResult<Vec<Document>> {
        Ok(self.documents_of(library_id))
    }

    async fn insert(&self, document: Document) -> LibrisResult<Document> {
        if !self.libraries.contains_key(&document.library_id) {
            return Err(LibrisError::not_found("Library", document.library_id));
        }
        self.put_document(document.clone());
        Ok(document)
    }

    async fn update(&self, mut document: Document) -> LibrisResult<Document> {
        let Some(mut stored) = self.documents.get_mut(&document.id) else {
            return Err(LibrisError::not_found("Document", document.id));
        };
        if stored.library_id != document.library_id {
            return Err(LibrisError::validation(vec![
                "A document cannot move between libraries".to_string(),
            ]));
        }
        document.created_at = stored.created_at;
        document.updated_at = Utc::now();
        *stored = document.clone();
        Ok(document)
    }

    async fn delete(&self, id: DocumentId) -> LibrisResult<bool> {
        Ok(self.remove_document(id))
    }

    async fn delete_by_library(&self, library_id: LibraryId) -> LibrisResult<usize> {
        Ok(self.remove_documents_of(library_id))
    }
}

#[async_trait]
impl LibraryStore for MemoryStore {
    async fn find(&self, id: LibraryId) -> LibrisResult<Option<Library>> {
        Ok(self.libraries.get(&id).map(|entry| entry.clone()))
    }

    async fn list(&self) -> LibrisResult<Vec<Library>> {
        Ok(self.sorted_libraries())
    }

    async fn insert(&self, library: Library) -> LibrisResult<Library> {
        self.put_library(library.clone());
        Ok(library)
    }

    async fn delete(&self, id: LibraryId) -> LibrisResult<bool> {
        if self.libraries.remove(&id).is_none() {
            return Ok(false);
        }
        self.remove_documents_of(id);
        Ok(true)
    }
}
