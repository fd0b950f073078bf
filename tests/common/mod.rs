use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use libris::vector::{VectorDimension, VectorError};
use libris::{
    Chunk, DocumentId, DocumentIngestor, Embedder, IndexCache, IndexStore, IvfConfig, Library,
    LibraryId, LibraryStore, MemoryStore, Metadata, SearchService,
};
use tempfile::TempDir;

/// Deterministic embedder: a normalized bag of hashed lowercase words.
///
/// Texts sharing words get similar vectors, which is enough to rank
/// documents in tests without downloading a model.
pub struct HashEmbedder {
    dimension: VectorDimension,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).expect("dimension must be positive"),
        }
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.001; dim];
        for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            embedding[(hasher.finish() % dim as u64) as usize] += 1.0;
        }
        let norm = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        embedding.iter().map(|x| x / norm).collect()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VectorError> {
        Ok(texts.iter().map(|text| self.vector(text)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "hash"
    }
}

/// A library in a fresh store with its own index directory.
pub struct TestLibrary {
    pub dir: TempDir,
    pub store: MemoryStore,
    pub cache: Arc<IndexCache>,
    pub embedder: Arc<HashEmbedder>,
    pub library: Library,
}

impl TestLibrary {
    pub async fn new() -> Self {
        let store = MemoryStore::new();
        let library = LibraryStore::insert(&store, Library::new("test library", None))
            .await
            .expect("Failed to insert library");
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
            store,
            cache: Arc::new(IndexCache::new()),
            embedder: Arc::new(HashEmbedder::new(64)),
            library,
        }
    }

    pub fn id(&self) -> LibraryId {
        self.library.id
    }

    pub fn ingestor(&self) -> DocumentIngestor {
        let store = Arc::new(self.store.clone());
        DocumentIngestor::new(
            store.clone(),
            store.clone(),
            store,
            self.embedder.clone(),
            Arc::clone(&self.cache),
        )
    }

    /// A search service sharing this library's cache and index directory.
    pub fn service(&self) -> SearchService {
        let store = Arc::new(self.store.clone());
        SearchService::new(
            store.clone(),
            store,
            self.embedder.clone(),
            IndexStore::new(self.dir.path().join("indexes")),
        )
        .with_ivf_config(IvfConfig {
            n_partitions: 2,
            seed: Some(11),
            ..IvfConfig::default()
        })
        .with_cache(Arc::clone(&self.cache))
    }

    /// A service with an empty cache over the same index directory, like a
    /// second process.
    pub fn cold_service(&self) -> SearchService {
        let store = Arc::new(self.store.clone());
        SearchService::new(
            store.clone(),
            store,
            self.embedder.clone(),
            IndexStore::new(self.dir.path().join("indexes")),
        )
        .with_ivf_config(IvfConfig {
            n_partitions: 2,
            seed: Some(11),
            ..IvfConfig::default()
        })
    }
}

/// A chunk with the given vector, owned by a fresh document.
pub fn vector_chunk(vector: &[f32]) -> Chunk {
    Chunk::from_vector(
        LibraryId::new(),
        DocumentId::new(),
        "text",
        vector,
        Metadata::new(),
    )
}

/// `n` pseudo-random chunks of dimension `dim`, reproducible per seed.
pub fn random_chunks(n: usize, dim: usize, seed: u64) -> Vec<Chunk> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let vector: Vec<f32> = (0..dim).map(|_| rng.random_range(-1.0..1.0)).collect();
            vector_chunk(&vector)
        })
        .collect()
}

/// Metadata from a JSON object literal.
pub fn metadata(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().expect("metadata must be a JSON object")
}
