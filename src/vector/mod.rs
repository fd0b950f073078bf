//! Vector indexing and retrieval.
//!
//! Two index kinds share one chunk model:
//! - [`FlatIndex`]: exhaustive cosine scoring, exact results
//! - [`IvfIndex`]: k-means partitions with a single-probe bucket scan
//!
//! Built indexes are snapshotted per `(library, kind)` by [`IndexStore`].

mod clustering;
mod embedding;
mod flat;
mod index;
mod ivf;
mod similarity;
mod storage;
mod types;

pub use clustering::{ClusteringError, DEFAULT_CLUSTERS, DEFAULT_MAX_ITERS, KMeans, KMeansResult};
#[cfg(test)]
pub use embedding::MockEmbedder;
pub use embedding::{DEFAULT_MODEL, Embedder, FastEmbedder, parse_embedding_model};
pub use flat::{ChunkMatch, FlatIndex};
pub use index::VectorIndex;
pub use ivf::{IvfConfig, IvfIndex};
pub use similarity::{
    VectorMatrix, cosine_similarities, cosine_similarity, euclidean_distance, nearest_centroid,
    squared_euclidean_distance, top_k,
};
pub use storage::{FORMAT_VERSION, IndexMetadata, IndexStore, PersistedIndex, PersistenceError, fingerprint};
pub use types::{ClusterId, VectorDimension, VectorError};
