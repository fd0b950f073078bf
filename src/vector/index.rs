//! A single dispatch point over the supported index kinds.

use std::collections::HashSet;

use crate::types::{Chunk, ChunkId, IndexKind};
use crate::vector::flat::{ChunkMatch, FlatIndex};
use crate::vector::ivf::{IvfConfig, IvfIndex};
use crate::vector::types::{VectorDimension, VectorError};

/// Either a flat or an IVF index, selected per request by [`IndexKind`].
#[derive(Debug, Clone)]
pub enum VectorIndex {
    Flat(FlatIndex),
    Ivf(IvfIndex),
}

impl VectorIndex {
    /// Creates an unfit index of the given kind.
    ///
    /// `ivf` is ignored for flat indexes.
    #[must_use]
    pub fn new(kind: IndexKind, ivf: IvfConfig) -> Self {
        match kind {
            IndexKind::Flat => Self::Flat(FlatIndex::new()),
            IndexKind::Ivf => Self::Ivf(IvfIndex::new(ivf)),
        }
    }

    #[must_use]
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Flat(_) => IndexKind::Flat,
            Self::Ivf(_) => IndexKind::Ivf,
        }
    }

    pub fn fit(&mut self, chunks: Vec<Chunk>) -> Result<(), VectorError> {
        match self {
            Self::Flat(index) => index.fit(chunks),
            Self::Ivf(index) => index.fit(chunks),
        }
    }

    #[must_use = "Search results should be processed to retrieve relevant chunks"]
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ChunkMatch<'_>>, VectorError> {
        match self {
            Self::Flat(index) => index.search(query, k),
            Self::Ivf(index) => index.search(query, k),
        }
    }

    pub fn add(&mut self, chunks: Vec<Chunk>) -> Result<(), VectorError> {
        match self {
            Self::Flat(index) => index.add(chunks),
            Self::Ivf(index) => index.add(chunks),
        }
    }

    pub fn remove(&mut self, chunk_ids: &[ChunkId]) -> Result<(), VectorError> {
        match self {
            Self::Flat(index) => {
                index.remove(chunk_ids);
                Ok(())
            }
            Self::Ivf(index) => index.remove(chunk_ids),
        }
    }

    #[must_use]
    pub fn chunks(&self) -> &[Chunk] {
        match self {
            Self::Flat(index) => index.chunks(),
            Self::Ivf(index) => index.chunks(),
        }
    }

    /// Ids of every indexed chunk.
    #[must_use]
    pub fn chunk_ids(&self) -> HashSet<ChunkId> {
        self.chunks().iter().map(|c| c.id).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks().is_empty()
    }

    #[must_use]
    pub fn is_fit(&self) -> bool {
        match self {
            Self::Flat(index) => index.is_fit(),
            Self::Ivf(index) => index.is_fit(),
        }
    }

    #[must_use]
    pub fn dimension(&self) -> Option<VectorDimension> {
        match self {
            Self::Flat(index) => index.dimension(),
            Self::Ivf(index) => index.dimension(),
        }
    }

    /// Whether this index covers exactly the ids in `chunks`.
    #[must_use]
    pub fn covers_exactly(&self, chunks: &[Chunk]) -> bool {
        let current: HashSet<ChunkId> = chunks.iter().map(|c| c.id).collect();
        current == self.chunk_ids()
    }
}
