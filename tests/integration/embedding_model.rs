//! Real embedding model checks.
//!
//! These download the default model on first run, so they are ignored by
//! default. Run with `cargo test embedding_model -- --ignored`.

use std::sync::Arc;

use anyhow::Result;
use libris::vector::cosine_similarity;
use libris::{
    DocumentIngestor, Embedder, FastEmbedder, IndexCache, IndexStore, Library, LibraryStore,
    MemoryStore, Metadata, SearchRequest, SearchService,
};
use tempfile::TempDir;

/// Get a unique cache directory for each test to avoid conflicts
fn get_test_cache_dir(test_name: &str) -> std::path::PathBuf {
    let pid = std::process::id();
    std::env::temp_dir().join(format!("libris_test_fastembed_{test_name}_{pid}"))
}

#[tokio::test]
#[ignore = "Downloads 86MB model - run with --ignored for embedding checks"]
async fn test_default_model_separates_topics() -> Result<()> {
    let embedder = FastEmbedder::new(
        "AllMiniLML6V2",
        get_test_cache_dir("separates_topics"),
        8,
        false,
    )?;
    assert_eq!(embedder.dimension().get(), 384);

    let vectors = embedder
        .embed(&[
            "How do I bake sourdough bread?".to_string(),
            "A recipe for baking a loaf of bread".to_string(),
            "The telescope observed a distant galaxy".to_string(),
        ])
        .await?;
    assert_eq!(vectors.len(), 3);

    let related = cosine_similarity(&vectors[0], &vectors[1]);
    let unrelated = cosine_similarity(&vectors[0], &vectors[2]);
    println!("related: {related:.3}, unrelated: {unrelated:.3}");
    assert!(related > unrelated);
    Ok(())
}

#[tokio::test]
#[ignore = "Downloads 86MB model - run with --ignored for embedding checks"]
async fn test_search_with_real_model() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let embedder: Arc<dyn Embedder> = Arc::new(FastEmbedder::new(
        "AllMiniLML6V2",
        get_test_cache_dir("search_with_real_model"),
        8,
        false,
    )?);
    let store = Arc::new(MemoryStore::new());
    let cache = Arc::new(IndexCache::new());
    let library = LibraryStore::insert(store.as_ref(), Library::new("notes", None)).await?;

    let ingestor = DocumentIngestor::new(
        store.clone(),
        store.clone(),
        store.clone(),
        embedder.clone(),
        Arc::clone(&cache),
    );
    let topics = [
        ("Bread", "Knead the dough, let it rise overnight and bake at high heat."),
        ("Stars", "Astronomers measure how far away galaxies are using redshift."),
        ("Tests", "Unit tests check small pieces of code in isolation."),
    ];
    let mut ids = Vec::new();
    for (title, content) in topics {
        ids.push(
            ingestor
                .add_document(library.id, title, content, Metadata::new())
                .await?
                .id,
        );
    }

    let service = SearchService::new(
        store.clone(),
        store,
        embedder,
        IndexStore::new(temp_dir.path().join("indexes")),
    )
    .with_cache(cache);
    let results = service
        .search(&SearchRequest::new(library.id, "distance to other galaxies").with_limit(1))
        .await?;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id, ids[1]);
    Ok(())
}
