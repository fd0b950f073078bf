//! Text embedding backends.
//!
//! The search pipeline only sees the async [`Embedder`] trait. The
//! production implementation wraps a fastembed [`TextEmbedding`] model,
//! which is CPU bound and not `Sync`, behind a mutex and runs it on the
//! blocking thread pool.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use parking_lot::Mutex;
use tracing::debug;

use crate::vector::types::{VectorDimension, VectorError};

/// Model used when the configuration does not name one.
pub const DEFAULT_MODEL: &str = "AllMiniLML6V2";

/// Turns text into vectors.
///
/// Implementations must return exactly one vector per input text, each of
/// length [`dimension`](Embedder::dimension).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VectorError>;

    /// Embeds a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, VectorError> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| VectorError::EmbeddingFailed("model returned no embedding".to_string()))
    }

    fn dimension(&self) -> VectorDimension;

    /// Name recorded in chunk metadata under `embedding_model`.
    fn model_name(&self) -> &str;
}

/// Maps a configured model name to the fastembed model and its output dimension.
pub fn parse_embedding_model(name: &str) -> Result<(EmbeddingModel, usize), VectorError> {
    let parsed = match name {
        "AllMiniLML6V2" => (EmbeddingModel::AllMiniLML6V2, 384),
        "BGESmallENV15" => (EmbeddingModel::BGESmallENV15, 384),
        "BGEBaseENV15" => (EmbeddingModel::BGEBaseENV15, 768),
        "BGELargeENV15" => (EmbeddingModel::BGELargeENV15, 1024),
        "MultilingualE5Large" => (EmbeddingModel::MultilingualE5Large, 1024),
        "MxbaiEmbedLargeV1" => (EmbeddingModel::MxbaiEmbedLargeV1, 1024),
        other => {
            return Err(VectorError::EmbeddingFailed(format!(
                "Unknown embedding model '{other}'. Supported: AllMiniLML6V2, BGESmallENV15, BGEBaseENV15, BGELargeENV15, MultilingualE5Large, MxbaiEmbedLargeV1"
            )));
        }
    };
    Ok(parsed)
}

/// fastembed-backed [`Embedder`].
pub struct FastEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimension: VectorDimension,
    batch_size: usize,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("model", &"<TextEmbedding>")
            .field("model_name", &self.model_name)
            .field("dimension", &self.dimension)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl FastEmbedder {
    /// Loads `model_name`, downloading it into `cache_dir` on first use.
    ///
    /// # Errors
    /// Returns an error if the name is unknown or the model fails to
    /// initialize or download.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        batch_size: usize,
        show_download_progress: bool,
    ) -> Result<Self, VectorError> {
        let (model, dimension) = parse_embedding_model(model_name)?;
        debug!("Loading embedding model {model_name} from {}", cache_dir.display());

        let text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| VectorError::EmbeddingFailed(
            format!("Failed to initialize embedding model: {e}. Ensure you have internet connection for first-time model download")
        ))?;

        Ok(Self {
            model: Arc::new(Mutex::new(text_model)),
            model_name: model_name.to_string(),
            dimension: VectorDimension::new(dimension)?,
            batch_size: batch_size.max(1),
        })
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VectorError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        let batch_size = self.batch_size;
        let embeddings = tokio::task::spawn_blocking(move || {
            model.lock().embed(texts, Some(batch_size)).map_err(|e| {
                VectorError::EmbeddingFailed(format!("Failed to generate embeddings: {e}"))
            })
        })
        .await
        .map_err(|e| VectorError::EmbeddingFailed(format!("Embedding task failed: {e}")))??;

        for embedding in &embeddings {
            self.dimension.validate_vector(embedding)?;
        }
        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Deterministic embedder for unit tests.
///
/// Texts registered with [`with_vector`](MockEmbedder::with_vector) embed to
/// that exact vector; anything else becomes a normalized bag of hashed words.
#[cfg(test)]
#[derive(Clone)]
pub struct MockEmbedder {
    dimension: VectorDimension,
    fixed: std::collections::HashMap<String, Vec<f32>>,
    fail: bool,
}

#[cfg(test)]
impl MockEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: VectorDimension::new(dimension).unwrap(),
            fixed: std::collections::HashMap::new(),
            fail: false,
        }
    }

    #[must_use]
    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        assert_eq!(vector.len(), self.dimension.get());
        self.fixed.insert(text.to_string(), vector);
        self
    }

    /// An embedder whose every call fails.
    #[must_use]
    pub fn failing(dimension: usize) -> Self {
        Self {
            fail: true,
            ..Self::new(dimension)
        }
    }

    fn hashed(&self, text: &str) -> Vec<f32> {
        use std::hash::{DefaultHasher, Hash, Hasher};

        let dim = self.dimension.get();
        let mut embedding = vec![0.01; dim];
        for word in text.split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            embedding[(hasher.finish() % dim as u64) as usize] += 1.0;
        }
        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        for val in &mut embedding {
            *val /= magnitude;
        }
        embedding
    }
}

#[cfg(test)]
#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, VectorError> {
        if self.fail {
            return Err(VectorError::EmbeddingFailed("mock failure".to_string()));
        }
        Ok(texts
            .iter()
            .map(|text| {
                self.fixed
                    .get(text)
                    .cloned()
                    .unwrap_or_else(|| self.hashed(text))
            })
            .collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
