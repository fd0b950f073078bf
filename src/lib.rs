//! The main library module for libris, an embedded vector database.
//!
//! Libraries hold documents, documents are split into embedded chunks, and
//! chunks are searched through a flat or IVF index that is cached in memory
//! and persisted between runs.

pub mod chunking;
pub mod config;
pub mod display;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod search;
pub mod store;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use chunking::{ChunkingConfig, SmartChunker};
pub use config::Settings;
pub use error::{IndexContext, LibrisError, LibrisResult};
pub use filter::{FilterOperator, Filterable, MetadataFilter, apply_filters, parse_filter_args};
pub use ingest::{DocumentIngestor, DocumentUpdate};
pub use search::{IndexCache, SearchRequest, SearchResult, SearchService};
pub use store::{ChunkStore, DocumentStore, LibraryStore, MemoryStore};
pub use types::{
    Chunk, ChunkId, Document, DocumentId, IndexKind, Library, LibraryId, Metadata,
};
pub use vector::{Embedder, FastEmbedder, IndexStore, IvfConfig, VectorIndex};
