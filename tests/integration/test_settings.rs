//! Settings files driving the ingest and search components.

use std::fs;

use libris::{IndexKind, LibrisError, SearchRequest, Settings};
use serde_json::json;
use tempfile::TempDir;

use crate::common::{TestLibrary, metadata};

fn write_settings(dir: &TempDir, body: &str) -> Settings {
    let path = dir.path().join("settings.toml");
    fs::write(&path, body).unwrap();
    let settings = Settings::load_from(&path).unwrap();
    settings.validate().unwrap();
    settings
}

#[tokio::test]
async fn test_search_settings_bound_the_limit() {
    let config_dir = TempDir::new().unwrap();
    let settings = write_settings(
        &config_dir,
        "[search]\ndefault_limit = 2\nmax_limit = 3\n",
    );
    let lib = TestLibrary::new().await;
    lib.ingestor()
        .add_document(lib.id(), "Note", "short note", metadata(json!({})))
        .await
        .unwrap();
    let service = lib.service().with_settings(settings.search.clone());

    let too_many = SearchRequest::new(lib.id(), "note").with_limit(4);
    let err = service.search(&too_many).await.unwrap_err();
    assert!(matches!(err, LibrisError::Validation { .. }));
    assert!(err.to_string().contains("between 1 and 3"));

    let allowed = SearchRequest::new(lib.id(), "note").with_limit(3);
    assert_eq!(service.search(&allowed).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_index_settings_configure_ivf() {
    let config_dir = TempDir::new().unwrap();
    let settings = write_settings(
        &config_dir,
        "[index]\nivf_partitions = 1\nivf_max_iters = 5\nivf_seed = 42\n",
    );
    let ivf = settings.index.ivf_config();
    assert_eq!(ivf.n_partitions, 1);
    assert_eq!(ivf.max_iters, 5);
    assert_eq!(ivf.seed, Some(42));

    let lib = TestLibrary::new().await;
    let ingestor = lib.ingestor();
    for content in ["first topic words", "second topic words", "third topic words"] {
        ingestor
            .add_document(lib.id(), content, content, metadata(json!({})))
            .await
            .unwrap();
    }

    // A single partition holds every chunk, so IVF sees the whole library
    let service = lib.service().with_ivf_config(ivf);
    let request = SearchRequest::new(lib.id(), "topic")
        .with_index(IndexKind::Ivf)
        .with_limit(3);
    let results = service.search(&request).await.unwrap();
    assert_eq!(results.len(), 3);
}

#[tokio::test]
async fn test_chunking_settings_reach_the_ingestor() {
    let config_dir = TempDir::new().unwrap();
    let settings = write_settings(
        &config_dir,
        "[chunking]\nchunk_size = 40\noverlap_size = 5\nmin_chunk_size = 10\n",
    );
    let lib = TestLibrary::new().await;
    let ingestor = lib.ingestor().with_chunking(settings.chunking.clone());

    let content = "Lorem ipsum dolor sit amet. ".repeat(10);
    let document = ingestor
        .add_document(lib.id(), "Long", content, metadata(json!({})))
        .await
        .unwrap();

    let chunks = libris::ChunkStore::find_by_document(&lib.store, document.id)
        .await
        .unwrap();
    assert!(chunks.len() > 1, "expected several chunks, got {}", chunks.len());
    assert!(chunks.iter().all(|c| c.document_id == document.id));

    let service = lib.service().with_settings(settings.search);
    let results = service
        .search(&SearchRequest::new(lib.id(), "lorem ipsum"))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].matching_chunks, chunks.len().min(15));
}

#[test]
fn test_settings_paths_follow_workspace_root() {
    let workspace = TempDir::new().unwrap();
    let settings = write_settings(
        &TempDir::new().unwrap(),
        "data_dir = \"store\"\n[index]\nstorage_path = \"snapshots\"\n",
    );
    let settings = Settings {
        workspace_root: Some(workspace.path().to_path_buf()),
        ..settings
    };

    assert_eq!(settings.data_path(), workspace.path().join("store"));
    assert_eq!(settings.index_path(), workspace.path().join("snapshots"));
}
