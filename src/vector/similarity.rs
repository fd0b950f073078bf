//! Similarity kernel: cosine scoring against a column-major matrix,
//! stable top-k selection and Euclidean distance.
//!
//! Vectors are stored as `f32` but every reduction accumulates in `f64`
//! so that high-dimensional embeddings (1024 and up) do not lose
//! precision to cancellation.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::vector::types::{VectorDimension, VectorError};

/// Column count above which scoring fans out across the rayon pool.
const PARALLEL_THRESHOLD: usize = 2048;

/// A D×N matrix of candidate vectors stored column-major.
///
/// Column `i` occupies `data[i * D..(i + 1) * D]`, so each candidate
/// vector is contiguous in memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatrix {
    dimension: VectorDimension,
    data: Vec<f32>,
}

impl VectorMatrix {
    /// Creates an empty matrix with `dimension` rows.
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Builds a matrix from column vectors, validating every length.
    pub fn from_columns<I>(dimension: VectorDimension, columns: I) -> Result<Self, VectorError>
    where
        I: IntoIterator,
        I::Item: AsRef<[f32]>,
    {
        let mut matrix = Self::new(dimension);
        for column in columns {
            matrix.push_column(column.as_ref())?;
        }
        Ok(matrix)
    }

    #[must_use]
    pub fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    /// Number of columns (candidate vectors).
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / self.dimension.get()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns column `index`.
    ///
    /// # Panics
    /// Panics if `index >= self.len()`.
    #[must_use]
    pub fn column(&self, index: usize) -> &[f32] {
        let d = self.dimension.get();
        &self.data[index * d..(index + 1) * d]
    }

    pub fn columns(&self) -> impl ExactSizeIterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.get())
    }

    pub fn push_column(&mut self, column: &[f32]) -> Result<(), VectorError> {
        self.dimension.validate_vector(column)?;
        self.data.extend_from_slice(column);
        Ok(())
    }

    /// Overwrites column `index` in place.
    pub fn set_column(&mut self, index: usize, column: &[f32]) -> Result<(), VectorError> {
        self.dimension.validate_vector(column)?;
        let d = self.dimension.get();
        self.data[index * d..(index + 1) * d].copy_from_slice(column);
        Ok(())
    }

    /// Keeps only the columns for which `keep(index)` is true, preserving order.
    pub fn retain_columns(&mut self, mut keep: impl FnMut(usize) -> bool) {
        let d = self.dimension.get();
        let mut data = Vec::with_capacity(self.data.len());
        for (i, column) in self.data.chunks_exact(d).enumerate() {
            if keep(i) {
                data.extend_from_slice(column);
            }
        }
        self.data = data;
    }

    /// Copies the columns out as owned row vectors.
    #[must_use]
    pub fn to_vectors(&self) -> Vec<Vec<f32>> {
        self.columns().map(<[f32]>::to_vec).collect()
    }
}

/// Computes the cosine similarity of `query` against every column of `matrix`.
///
/// Returns one score per column in column order. A zero-norm query or
/// column scores 0 instead of dividing by zero.
pub fn cosine_similarities(query: &[f32], matrix: &VectorMatrix) -> Result<Vec<f32>, VectorError> {
    matrix.dimension().validate_vector(query)?;
    if matrix.is_empty() {
        return Ok(Vec::new());
    }

    let query_norm = norm(query);
    let d = matrix.dimension().get();

    let scores = if matrix.len() >= PARALLEL_THRESHOLD {
        matrix
            .data
            .par_chunks_exact(d)
            .map(|column| cosine_with_norm(query, query_norm, column))
            .collect()
    } else {
        matrix
            .columns()
            .map(|column| cosine_with_norm(query, query_norm, column))
            .collect()
    };
    Ok(scores)
}

/// Cosine similarity between two vectors of equal length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    cosine_with_norm(a, norm(a), b)
}

fn cosine_with_norm(query: &[f32], query_norm: f64, column: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut column_sq = 0.0f64;
    for (&q, &v) in query.iter().zip(column) {
        let v = f64::from(v);
        dot += f64::from(q) * v;
        column_sq += v * v;
    }

    let denominator = query_norm * column_sq.sqrt();
    if denominator == 0.0 {
        0.0
    } else {
        (dot / denominator) as f32
    }
}

fn norm(vector: &[f32]) -> f64 {
    vector
        .iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Returns the indices of the `k` highest scores, best first.
///
/// Equal scores keep their original relative order and NaN scores sort
/// after every number. When `k` exceeds the number of scores every index
/// is returned.
pub fn top_k(scores: &[f32], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    let key = |i: usize| {
        let s = scores[i];
        if s.is_nan() { f32::NEG_INFINITY } else { s }
    };
    // sort_by is stable, so ties stay in index order
    order.sort_by(|&a, &b| key(b).total_cmp(&key(a)));
    order.truncate(k);
    order
}

/// Squared Euclidean distance, accumulated in `f64`.
pub fn squared_euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    debug_assert_eq!(a.len(), b.len(), "Vectors must have same dimension");
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let diff = f64::from(x) - f64::from(y);
            diff * diff
        })
        .sum()
}

pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f64 {
    squared_euclidean_distance(a, b).sqrt()
}

/// Index of the centroid closest to `vector`, lowest index on ties.
///
/// Returns `None` when `centroids` is empty.
pub fn nearest_centroid<C: AsRef<[f32]>>(vector: &[f32], centroids: &[C]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, centroid) in centroids.iter().enumerate() {
        let distance = squared_euclidean_distance(vector, centroid.as_ref());
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((i, distance)),
        }
    }
    best.map(|(i, _)| i)
}
