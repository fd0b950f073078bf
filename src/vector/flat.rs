//! Exhaustive cosine-similarity index.
//!
//! Every search scores the query against every stored vector, so results
//! are exact. Chunks can be appended or removed without a full rebuild.

use std::collections::{HashMap, HashSet};

use crate::types::{Chunk, ChunkId};
use crate::vector::similarity::{VectorMatrix, cosine_similarities, top_k};
use crate::vector::types::{VectorDimension, VectorError};

/// A chunk returned by an index search together with its cosine similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkMatch<'a> {
    pub chunk: &'a Chunk,
    pub similarity: f32,
}

/// Flat index over a set of chunks.
///
/// The matrix is `None` whenever no chunks are stored, never a zero-width
/// matrix.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    chunks: Vec<Chunk>,
    matrix: Option<VectorMatrix>,
    positions: HashMap<ChunkId, usize>,
}

impl FlatIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the index contents with `chunks`.
    ///
    /// Later duplicates of a chunk id replace earlier ones.
    pub fn fit(&mut self, chunks: Vec<Chunk>) -> Result<(), VectorError> {
        *self = Self::default();
        self.add(chunks)
    }

    /// Restores an index from previously decoded parts.
    pub(crate) fn from_parts(
        chunks: Vec<Chunk>,
        matrix: Option<VectorMatrix>,
    ) -> Result<Self, VectorError> {
        let stored = matrix.as_ref().map_or(0, VectorMatrix::len);
        if stored != chunks.len() {
            return Err(VectorError::MalformedEmbedding(format!(
                "flat index holds {} chunks but {stored} vectors",
                chunks.len()
            )));
        }
        let mut index = Self {
            chunks,
            matrix: matrix.filter(|m| !m.is_empty()),
            positions: HashMap::new(),
        };
        index.rebuild_positions();
        Ok(index)
    }

    /// Returns up to `k` chunks ordered by cosine similarity, best first.
    ///
    /// An unfit index, or `k == 0`, yields an empty result.
    #[must_use = "Search results should be processed to retrieve relevant chunks"]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ChunkMatch<'_>>, VectorError> {
        let Some(matrix) = &self.matrix else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }

        let similarities = cosine_similarities(query, matrix)?;
        Ok(top_k(&similarities, k)
            .into_iter()
            .map(|i| ChunkMatch {
                chunk: &self.chunks[i],
                similarity: similarities[i],
            })
            .collect())
    }

    /// Appends chunks without rebuilding.
    ///
    /// A chunk whose id is already indexed replaces the stored copy in place.
    /// Nothing is modified if any embedding fails to decode or has the
    /// wrong dimension.
    pub fn add(&mut self, chunks: Vec<Chunk>) -> Result<(), VectorError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let vectors = chunks
            .iter()
            .map(Chunk::vector)
            .collect::<Result<Vec<_>, _>>()?;

        let dimension = match &self.matrix {
            Some(matrix) => matrix.dimension(),
            None => VectorDimension::new(vectors[0].len())?,
        };
        for vector in &vectors {
            dimension.validate_vector(vector)?;
        }

        let matrix = self
            .matrix
            .get_or_insert_with(|| VectorMatrix::new(dimension));
        for (chunk, vector) in chunks.into_iter().zip(&vectors) {
            match self.positions.get(&chunk.id).copied() {
                Some(position) => {
                    matrix.set_column(position, vector)?;
                    self.chunks[position] = chunk;
                }
                None => {
                    matrix.push_column(vector)?;
                    self.positions.insert(chunk.id, self.chunks.len());
                    self.chunks.push(chunk);
                }
            }
        }
        Ok(())
    }

    /// Removes chunks by id. Unknown ids are ignored.
    pub fn remove(&mut self, chunk_ids: &[ChunkId]) {
        let doomed: HashSet<usize> = chunk_ids
            .iter()
            .filter_map(|id| self.positions.get(id).copied())
            .collect();
        if doomed.is_empty() {
            return;
        }

        if let Some(matrix) = self.matrix.as_mut() {
            matrix.retain_columns(|i| !doomed.contains(&i));
        }
        let mut position = 0;
        self.chunks.retain(|_| {
            let keep = !doomed.contains(&position);
            position += 1;
            keep
        });

        if self.chunks.is_empty() {
            self.matrix = None;
        }
        self.rebuild_positions();
    }

    fn rebuild_positions(&mut self) {
        self.positions = self
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (chunk.id, i))
            .collect();
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

    /// Whether the index holds any vectors.
    #[must_use]
    pub fn is_fit(&self) -> bool {
        self.matrix.is_some()
    }

    #[must_use]
    pub fn dimension(&self) -> Option<VectorDimension> {
        self.matrix.as_ref().map(VectorMatrix::dimension)
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub(crate) fn matrix(&self) -> Option<&VectorMatrix> {
        self.matrix.as_ref()
    }
}
