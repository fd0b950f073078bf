//! K-means clustering used to partition vectors for the IVF index.
//!
//! # Algorithm Details
//! - Distance metric: Euclidean
//! - Initialization: k distinct input vectors sampled uniformly without replacement
//! - Stops when every recomputed centroid equals its previous value, or
//!   after `max_iters` rounds
//! - Empty clusters are re-seeded with the vector farthest from its
//!   assigned centroid, so centroids never become NaN
//!
//! The random source is a parameter. Production callers pass a freshly
//! seeded generator; tests pass a fixed seed for reproducible partitions.
//!
//! # Performance Characteristics
//! - O(n * k * d * iterations) time complexity
//! - O(k * d) space for centroids

use rand::Rng;
use rand::seq::index::sample;
use thiserror::Error;
use tracing::debug;

use crate::vector::similarity::{nearest_centroid, squared_euclidean_distance};
use crate::vector::types::{ClusterId, VectorError};

/// Default number of partitions.
pub const DEFAULT_CLUSTERS: usize = 16;

/// Default iteration cap.
pub const DEFAULT_MAX_ITERS: usize = 32;

/// Result of a k-means run.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansResult {
    /// Cluster centroids, each of the input dimension.
    pub centroids: Vec<Vec<f32>>,

    /// Cluster label for each input vector, in input order.
    pub labels: Vec<ClusterId>,

    /// Number of assignment/update rounds performed.
    pub iterations: usize,

    /// Whether the run stopped at a fixed point rather than the iteration cap.
    pub converged: bool,
}

impl KMeansResult {
    /// Number of clusters actually produced (may be less than requested).
    #[must_use]
    pub fn k(&self) -> usize {
        self.centroids.len()
    }
}

/// Errors that can occur during clustering operations.
#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error(
        "Empty vector set provided for clustering\nSuggestion: Ensure chunks are embedded before building an IVF index"
    )]
    EmptyVectorSet,

    #[error("Invalid cluster count: {0}\nSuggestion: Use at least one partition")]
    InvalidClusterCount(usize),

    #[error(
        "Dimension mismatch in vectors\nSuggestion: Ensure all vectors come from the same embedding model"
    )]
    DimensionMismatch,

    #[error("Vector operation error: {0}")]
    VectorError(#[from] VectorError),
}

/// K-means configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KMeans {
    pub n_clusters: usize,
    pub max_iters: usize,
    /// Independent random initializations; the run with the lowest
    /// inertia wins.
    pub n_init: usize,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            n_clusters: DEFAULT_CLUSTERS,
            max_iters: DEFAULT_MAX_ITERS,
            n_init: 1,
        }
    }
}

impl KMeans {
    #[must_use]
    pub fn new(n_clusters: usize, max_iters: usize) -> Self {
        Self {
            n_clusters,
            max_iters,
            n_init: 1,
        }
    }

    #[must_use]
    pub fn with_n_init(mut self, n_init: usize) -> Self {
        self.n_init = n_init.max(1);
        self
    }

    /// Partitions `vectors` into at most `n_clusters` clusters.
    ///
    /// If there are fewer vectors than clusters, k is reduced to the
    /// number of vectors.
    #[must_use = "clustering results should be used or the computation is wasted"]
    pub fn fit<V, R>(&self, vectors: &[V], rng: &mut R) -> Result<KMeansResult, ClusteringError>
    where
        V: AsRef<[f32]>,
        R: Rng + ?Sized,
    {
        self.validate(vectors)?;
        let k = self.n_clusters.min(vectors.len());

        let mut best: Option<(f64, KMeansResult)> = None;
        for _ in 0..self.n_init.max(1) {
            let initial: Vec<Vec<f32>> = sample(rng, vectors.len(), k)
                .into_iter()
                .map(|i| vectors[i].as_ref().to_vec())
                .collect();
            let result = self.lloyd(vectors, initial);
            let score = inertia(vectors, &result);
            if best.as_ref().is_none_or(|(best_score, _)| score < *best_score) {
                best = Some((score, result));
            }
        }

        best.map(|(_, result)| result)
            .ok_or(ClusteringError::EmptyVectorSet)
    }

    /// Runs k-means from caller-chosen starting centroids.
    pub fn fit_from_centroids<V>(
        &self,
        vectors: &[V],
        initial: Vec<Vec<f32>>,
    ) -> Result<KMeansResult, ClusteringError>
    where
        V: AsRef<[f32]>,
    {
        self.validate(vectors)?;
        if initial.is_empty() {
            return Err(ClusteringError::InvalidClusterCount(0));
        }
        let dimension = vectors[0].as_ref().len();
        if initial.iter().any(|c| c.len() != dimension) {
            return Err(ClusteringError::DimensionMismatch);
        }
        Ok(self.lloyd(vectors, initial))
    }

    fn validate<V: AsRef<[f32]>>(&self, vectors: &[V]) -> Result<(), ClusteringError> {
        if vectors.is_empty() {
            return Err(ClusteringError::EmptyVectorSet);
        }
        if self.n_clusters == 0 {
            return Err(ClusteringError::InvalidClusterCount(0));
        }
        let dimension = vectors[0].as_ref().len();
        if vectors.iter().any(|v| v.as_ref().len() != dimension) {
            return Err(ClusteringError::DimensionMismatch);
        }
        Ok(())
    }

    fn lloyd<V: AsRef<[f32]>>(&self, vectors: &[V], mut centroids: Vec<Vec<f32>>) -> KMeansResult {
        let mut labels = assign(vectors, &centroids);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.max_iters {
            iterations += 1;

            let updated = update_centroids(vectors, &labels, &centroids);
            let unchanged = updated == centroids;
            centroids = updated;
            labels = assign(vectors, &centroids);

            if unchanged {
                converged = true;
                break;
            }
        }

        debug!(
            "k-means: {} vectors, k={}, {iterations} iterations, converged={converged}",
            vectors.len(),
            centroids.len()
        );

        KMeansResult {
            centroids,
            labels,
            iterations,
            converged,
        }
    }
}

/// Sum of squared distances from each vector to its centroid.
fn inertia<V: AsRef<[f32]>>(vectors: &[V], result: &KMeansResult) -> f64 {
    vectors
        .iter()
        .zip(&result.labels)
        .map(|(v, label)| squared_euclidean_distance(v.as_ref(), &result.centroids[label.index()]))
        .sum()
}

/// Assigns every vector to its nearest centroid (lowest index on ties).
fn assign<V: AsRef<[f32]>>(vectors: &[V], centroids: &[Vec<f32>]) -> Vec<ClusterId> {
    vectors
        .iter()
        .map(|v| {
            let nearest = nearest_centroid(v.as_ref(), centroids).unwrap_or(0);
            ClusterId::new(nearest as u32)
        })
        .collect()
}

/// Recomputes each centroid as the mean of its members.
///
/// A cluster with no members takes the vector that lies farthest from its
/// own centroid; each vector donates at most once per step.
fn update_centroids<V: AsRef<[f32]>>(
    vectors: &[V],
    labels: &[ClusterId],
    previous: &[Vec<f32>],
) -> Vec<Vec<f32>> {
    let k = previous.len();
    let dimension = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f64; dimension]; k];
    let mut sizes = vec![0usize; k];

    for (vector, label) in vectors.iter().zip(labels) {
        let cluster = label.index();
        for (sum, &value) in sums[cluster].iter_mut().zip(vector.as_ref()) {
            *sum += f64::from(value);
        }
        sizes[cluster] += 1;
    }

    let mut centroids: Vec<Vec<f32>> = sums
        .into_iter()
        .zip(&sizes)
        .map(|(sum, &size)| {
            if size == 0 {
                Vec::new()
            } else {
                sum.into_iter().map(|s| (s / size as f64) as f32).collect()
            }
        })
        .collect();

    if sizes.contains(&0) {
        // Farthest points first, ties by input order
        let mut outliers: Vec<(usize, f64)> = vectors
            .iter()
            .zip(labels)
            .enumerate()
            .map(|(i, (v, label))| {
                (i, squared_euclidean_distance(v.as_ref(), &previous[label.index()]))
            })
            .collect();
        outliers.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut donors = outliers.into_iter().map(|(i, _)| i);

        for (cluster, centroid) in centroids.iter_mut().enumerate() {
            if sizes[cluster] == 0 {
                *centroid = match donors.next() {
                    Some(i) => vectors[i].as_ref().to_vec(),
                    None => previous[cluster].clone(),
                };
                debug!("k-means: re-seeded empty cluster {cluster}");
            }
        }
    }

    centroids
}
