//! Inverted-file (IVF) index over k-means partitions.
//!
//! Search is two-step: the coarse step picks the single centroid nearest
//! to the query (Euclidean), the fine step returns that partition's chunks
//! in bucket order. Chunks in the bucket are not re-ranked, and other
//! partitions are never probed, so recall depends on the partitioning.
//!
//! There is no incremental insert. `add` and `remove` recluster the whole
//! resulting chunk set, which costs O(M) per mutation.

use std::collections::{HashMap, HashSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{Chunk, ChunkId};
use crate::vector::clustering::{DEFAULT_CLUSTERS, DEFAULT_MAX_ITERS, KMeans};
use crate::vector::flat::ChunkMatch;
use crate::vector::similarity::{VectorMatrix, cosine_similarity, nearest_centroid};
use crate::vector::types::{ClusterId, VectorDimension, VectorError};

/// Partitioning parameters for an IVF index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvfConfig {
    /// Requested number of partitions; reduced to the chunk count when larger.
    pub n_partitions: usize,
    pub max_iters: usize,
    /// Random restarts per build, best inertia kept.
    pub n_init: usize,
    /// Fixed seed for reproducible partitions. `None` draws a fresh seed per build.
    pub seed: Option<u64>,
}

impl Default for IvfConfig {
    fn default() -> Self {
        Self {
            n_partitions: DEFAULT_CLUSTERS,
            max_iters: DEFAULT_MAX_ITERS,
            n_init: 1,
            seed: None,
        }
    }
}

impl IvfConfig {
    fn kmeans(&self) -> KMeans {
        KMeans::new(self.n_partitions, self.max_iters).with_n_init(self.n_init)
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        }
    }
}

/// IVF index state. Unfit whenever it holds no chunks.
#[derive(Debug, Clone, Default)]
pub struct IvfIndex {
    config: IvfConfig,
    chunks: Vec<Chunk>,
    vectors: Option<VectorMatrix>,
    centroids: Vec<Vec<f32>>,
    labels: Vec<ClusterId>,
    buckets: Vec<Vec<usize>>,
    positions: HashMap<ChunkId, usize>,
}

impl IvfIndex {
    #[must_use]
    pub fn new(config: IvfConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn config(&self) -> &IvfConfig {
        &self.config
    }

    /// Clusters `chunks` and rebuilds every bucket.
    ///
    /// On error the previous state is kept.
    pub fn fit(&mut self, chunks: Vec<Chunk>) -> Result<(), VectorError> {
        let chunks = dedup_by_id(chunks);
        let vectors = chunks
            .iter()
            .map(Chunk::vector)
            .collect::<Result<Vec<_>, _>>()?;
        let matrix = match vectors.first() {
            Some(first) => Some(VectorMatrix::from_columns(
                VectorDimension::new(first.len())?,
                &vectors,
            )?),
            None => None,
        };
        self.rebuild(chunks, matrix)
    }

    fn rebuild(
        &mut self,
        chunks: Vec<Chunk>,
        matrix: Option<VectorMatrix>,
    ) -> Result<(), VectorError> {
        let Some(matrix) = matrix.filter(|m| !m.is_empty()) else {
            *self = Self::new(self.config);
            return Ok(());
        };

        let columns: Vec<&[f32]> = matrix.columns().collect();
        let result = self
            .config
            .kmeans()
            .fit(&columns, &mut self.config.rng())
            .map_err(|e| VectorError::ClusteringFailed(e.to_string()))?;

        debug!(
            "IVF rebuilt: {} chunks in {} partitions after {} iterations",
            chunks.len(),
            result.k(),
            result.iterations
        );

        *self = Self::from_parts(self.config, chunks, Some(matrix), result.centroids, result.labels)?;
        Ok(())
    }

    /// Restores an index from previously computed parts.
    pub(crate) fn from_parts(
        config: IvfConfig,
        chunks: Vec<Chunk>,
        vectors: Option<VectorMatrix>,
        centroids: Vec<Vec<f32>>,
        labels: Vec<ClusterId>,
    ) -> Result<Self, VectorError> {
        let stored = vectors.as_ref().map_or(0, VectorMatrix::len);
        if stored != chunks.len() || labels.len() != chunks.len() {
            return Err(VectorError::MalformedEmbedding(format!(
                "IVF index holds {} chunks, {stored} vectors and {} labels",
                chunks.len(),
                labels.len()
            )));
        }
        if labels.iter().any(|l| l.index() >= centroids.len()) {
            return Err(VectorError::MalformedEmbedding(format!(
                "IVF label out of range for {} centroids",
                centroids.len()
            )));
        }
        if let Some(matrix) = &vectors {
            for centroid in &centroids {
                matrix.dimension().validate_vector(centroid)?;
            }
        }

        let mut buckets = vec![Vec::new(); centroids.len()];
        for (position, label) in labels.iter().enumerate() {
            buckets[label.index()].push(position);
        }
        let positions = chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (chunk.id, i))
            .collect();

        Ok(Self {
            config,
            chunks,
            vectors: vectors.filter(|m| !m.is_empty()),
            centroids,
            labels,
            buckets,
            positions,
        })
    }

    /// Returns up to `k` chunks from the partition nearest to `query`.
    ///
    /// Chunks come back in bucket order. The reported similarity is
    /// informational and does not affect ordering.
    #[must_use = "Search results should be processed to retrieve relevant chunks"]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ChunkMatch<'_>>, VectorError> {
        let Some(vectors) = &self.vectors else {
            return Ok(Vec::new());
        };
        vectors.dimension().validate_vector(query)?;

        let Some(partition) = self.nearest_partition(query) else {
            return Ok(Vec::new());
        };

        Ok(self.buckets[partition.index()]
            .iter()
            .take(k)
            .map(|&i| ChunkMatch {
                chunk: &self.chunks[i],
                similarity: cosine_similarity(query, vectors.column(i)),
            })
            .collect())
    }

    /// Partition whose centroid is closest to `query`, lowest id on ties.
    #[must_use]
    pub fn nearest_partition(&self, query: &[f32]) -> Option<ClusterId> {
        nearest_centroid(query, &self.centroids).map(|i| ClusterId::new(i as u32))
    }

    /// Reclusters over the existing chunks plus `chunks`.
    ///
    /// Incoming chunks replace stored chunks with the same id.
    pub fn add(&mut self, chunks: Vec<Chunk>) -> Result<(), VectorError> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut all = self.chunks.clone();
        all.extend(chunks);
        self.fit(all)
    }

    /// Reclusters without the given chunks; an emptied index becomes unfit.
    pub fn remove(&mut self, chunk_ids: &[ChunkId]) -> Result<(), VectorError> {
        let doomed: HashSet<usize> = chunk_ids
            .iter()
            .filter_map(|id| self.positions.get(id).copied())
            .collect();
        if doomed.is_empty() {
            return Ok(());
        }

        let mut matrix = self.vectors.clone();
        if let Some(matrix) = matrix.as_mut() {
            matrix.retain_columns(|i| !doomed.contains(&i));
        }
        let chunks = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(i, _)| !doomed.contains(i))
            .map(|(_, chunk)| chunk.clone())
            .collect();
        self.rebuild(chunks, matrix)
    }

    #[must_use]
    pub fn contains(&self, id: &ChunkId) -> bool {
        self.positions.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn is_fit(&self) -> bool {
        self.vectors.is_some()
    }

    #[must_use]
    pub fn dimension(&self) -> Option<VectorDimension> {
        self.vectors.as_ref().map(VectorMatrix::dimension)
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    #[must_use]
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    #[must_use]
    pub fn labels(&self) -> &[ClusterId] {
        &self.labels
    }

    /// Number of chunks in each partition, indexed by partition id.
    #[must_use]
    pub fn bucket_sizes(&self) -> Vec<usize> {
        self.buckets.iter().map(Vec::len).collect()
    }

    pub(crate) fn vectors(&self) -> Option<&VectorMatrix> {
        self.vectors.as_ref()
    }
}

/// Keeps the last occurrence of each chunk id at the position of the first.
fn dedup_by_id(chunks: Vec<Chunk>) -> Vec<Chunk> {
    let mut positions: HashMap<ChunkId, usize> = HashMap::with_capacity(chunks.len());
    let mut unique: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match positions.get(&chunk.id) {
            Some(&i) => unique[i] = chunk,
            None => {
                positions.insert(chunk.id, unique.len());
                unique.push(chunk);
            }
        }
    }
    unique
}
