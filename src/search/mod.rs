//! Search orchestration: filters, index lifecycle and document ranking.
//!
//! [`SearchService`] turns a [`SearchRequest`] into ranked documents. It
//! keeps built indexes in an [`IndexCache`], falls back to the persisted
//! snapshot and rebuilds when neither covers the current chunk set.

mod aggregate;
mod cache;
mod service;
mod types;

pub use cache::IndexCache;
pub use service::SearchService;
pub use types::{SearchRequest, SearchResult};
