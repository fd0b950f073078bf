//! Document-level semantic search over a library.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::SearchSettings;
use crate::error::{IndexContext, LibrisError, LibrisResult};
use crate::filter::{apply_filters, matches, validate_filters};
use crate::search::aggregate::{DocumentHit, aggregate};
use crate::search::cache::IndexCache;
use crate::search::types::{SearchRequest, SearchResult};
use crate::store::{ChunkStore, DocumentStore};
use crate::types::{Chunk, IndexKind, LibraryId};
use crate::vector::{Embedder, IndexMetadata, IndexStore, IvfConfig, VectorIndex};

/// Runs searches and owns the index cache they share.
pub struct SearchService {
    chunks: Arc<dyn ChunkStore>,
    documents: Arc<dyn DocumentStore>,
    embedder: Arc<dyn Embedder>,
    store: Arc<IndexStore>,
    cache: Arc<IndexCache>,
    settings: SearchSettings,
    ivf: IvfConfig,
}

impl SearchService {
    pub fn new(
        chunks: Arc<dyn ChunkStore>,
        documents: Arc<dyn DocumentStore>,
        embedder: Arc<dyn Embedder>,
        store: IndexStore,
    ) -> Self {
        Self {
            chunks,
            documents,
            embedder,
            store: Arc::new(store),
            cache: Arc::new(IndexCache::new()),
            settings: SearchSettings::default(),
            ivf: IvfConfig::default(),
        }
    }

    #[must_use]
    pub fn with_settings(mut self, settings: SearchSettings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_ivf_config(mut self, ivf: IvfConfig) -> Self {
        self.ivf = ivf;
        self
    }

    /// Shares an existing cache, e.g. with a document ingestor.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<IndexCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Ranks the library's documents against the query text.
    pub async fn search(&self, request: &SearchRequest) -> LibrisResult<Vec<SearchResult>> {
        self.validate(request)?;
        let library_id = request.library_id;
        let kind = request.index_kind;

        let query = self
            .embedder
            .embed_one(&request.query)
            .await
            .map_err(|e| LibrisError::Embedding {
                reason: e.to_string(),
            })?;

        let chunks = self.chunks.find_by_library(library_id).await?;
        if chunks.is_empty() {
            debug!("Library {library_id} has no chunks");
            return Ok(Vec::new());
        }

        let chunks = apply_filters(chunks, &request.metadata_filters);
        if chunks.is_empty() {
            debug!("No chunks of library {library_id} pass the filters");
            return Ok(Vec::new());
        }

        let index = self.ensure_index(library_id, kind, chunks).await?;

        let k = request.limit.saturating_mul(self.settings.overfetch_factor);
        let hits = tokio::task::spawn_blocking(move || {
            index
                .search(&query, k)
                .map(|matches| aggregate(&matches))
        })
        .await
        .for_index(library_id, kind)?
        .for_index(library_id, kind)?;

        self.collect_documents(request, hits).await
    }

    fn validate(&self, request: &SearchRequest) -> LibrisResult<()> {
        let mut errors = validate_filters(&request.metadata_filters);
        if request.limit == 0 || request.limit > self.settings.max_limit {
            errors.push(format!(
                "limit must be between 1 and {}, got {}",
                self.settings.max_limit, request.limit
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(LibrisError::validation(errors))
        }
    }

    /// Returns an index covering exactly `chunks`.
    ///
    /// Tries the cache, then the persisted snapshot, then builds and saves.
    async fn ensure_index(
        &self,
        library_id: LibraryId,
        kind: IndexKind,
        chunks: Vec<Chunk>,
    ) -> LibrisResult<Arc<VectorIndex>> {
        let slot = self.cache.slot(library_id, kind);
        if let Some(index) = slot.current_for(&chunks) {
            debug!("Cache hit for {kind} index of library {library_id}");
            return Ok(index);
        }

        let _guard = slot.lock_build().await;
        // Another task may have built it while we waited
        if let Some(index) = slot.current_for(&chunks) {
            debug!("Cache hit for {kind} index of library {library_id} after waiting");
            return Ok(index);
        }
        debug!("Cache miss for {kind} index of library {library_id}");

        let store = Arc::clone(&self.store);
        let ivf = self.ivf;
        let ticket = slot.begin_build();
        let index = tokio::task::spawn_blocking(move || -> LibrisResult<VectorIndex> {
            let persisted = if ticket.trust_snapshot() {
                // The companion record settles freshness without decoding vectors
                match store.load_metadata(library_id, kind) {
                    Some(record) if IndexStore::is_fresh(&record, &chunks) => {
                        store.load(library_id, kind).for_index(library_id, kind)?
                    }
                    Some(_) => {
                        debug!("Persisted {kind} index for library {library_id} is out of date");
                        None
                    }
                    None => None,
                }
            } else {
                None
            };
            if let Some(persisted) = persisted {
                if IndexStore::is_valid(&persisted.index, &chunks) {
                    debug!("Reusing persisted {kind} index for library {library_id}");
                    return Ok(persisted.index);
                }
                debug!("Persisted {kind} index for library {library_id} does not match its record");
            }

            let count = chunks.len();
            let mut index = VectorIndex::new(kind, ivf);
            index.fit(chunks).for_index(library_id, kind)?;
            store.save(library_id, &index).for_index(library_id, kind)?;
            info!("Built {kind} index for library {library_id} over {count} chunks");
            Ok(index)
        })
        .await
        .for_index(library_id, kind)??;

        let index = Arc::new(index);
        slot.publish(Arc::clone(&index), ticket);
        Ok(index)
    }

    async fn collect_documents(
        &self,
        request: &SearchRequest,
        hits: Vec<DocumentHit>,
    ) -> LibrisResult<Vec<SearchResult>> {
        let mut results = Vec::with_capacity(request.limit);
        for hit in hits.into_iter().take(request.limit) {
            let Some(document) = self.documents.find(hit.document_id).await? else {
                warn!(
                    "Skipping result for missing document {} in library {}",
                    hit.document_id, request.library_id
                );
                continue;
            };
            if self.settings.post_filter_documents && !matches(&document, &request.metadata_filters)
            {
                continue;
            }
            results.push(SearchResult {
                document,
                score: hit.score,
                matching_chunks: hit.matching_chunks,
            });
        }
        Ok(results)
    }

    /// Deletes every persisted index of a library and drops it from the cache.
    pub fn delete_library_indexes(&self, library_id: LibraryId) -> LibrisResult<Vec<IndexKind>> {
        self.cache.invalidate(library_id, None);
        let deleted = self
            .store
            .delete_library(library_id)
            .map_err(|e| LibrisError::store(e.to_string()))?;
        info!(
            "Deleted {} persisted index(es) for library {library_id}",
            deleted.len()
        );
        Ok(deleted)
    }

    /// Marks cached indexes of a library out of date, one kind or all.
    pub fn invalidate_index(&self, library_id: LibraryId, kind: Option<IndexKind>) -> usize {
        self.cache.invalidate(library_id, kind)
    }

    /// Invalidates one kind and removes its persisted snapshot, so the next
    /// search of any process rebuilds it.
    pub fn drop_index(&self, library_id: LibraryId, kind: IndexKind) -> LibrisResult<bool> {
        self.cache.invalidate(library_id, Some(kind));
        self.store
            .delete(library_id, kind)
            .map_err(|e| LibrisError::store(e.to_string()))
    }

    /// Checks that the index directory is usable and returns its path.
    pub fn index_health(&self) -> LibrisResult<PathBuf> {
        self.store
            .check_health()
            .map_err(|e| LibrisError::store(e.to_string()))?;
        Ok(self.store.base_path().to_path_buf())
    }

    /// Metadata of every persisted index.
    pub fn list_indexes(&self) -> LibrisResult<Vec<IndexMetadata>> {
        self.store
            .list()
            .map_err(|e| LibrisError::store(e.to_string()))
    }
}
