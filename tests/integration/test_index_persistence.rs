//! Snapshot persistence over larger, realistic indexes.

use std::fs;

use libris::vector::{IndexStore, IvfConfig, VectorIndex};
use libris::{ChunkId, IndexKind, LibraryId};
use tempfile::TempDir;

use crate::common::random_chunks;

fn ranked_ids(index: &VectorIndex, query: &[f32], k: usize) -> Vec<ChunkId> {
    index
        .search(query, k)
        .unwrap()
        .iter()
        .map(|m| m.chunk.id)
        .collect()
}

#[test]
fn test_both_kinds_answer_identically_after_reload() {
    let temp_dir = TempDir::new().unwrap();
    let store = IndexStore::new(temp_dir.path());
    let library_id = LibraryId::new();
    let chunks = random_chunks(200, 32, 7);
    let queries: Vec<Vec<f32>> = random_chunks(5, 32, 8)
        .iter()
        .map(|c| c.vector().unwrap())
        .collect();

    for kind in IndexKind::ALL {
        let config = IvfConfig {
            n_partitions: 8,
            seed: Some(5),
            ..IvfConfig::default()
        };
        let mut index = VectorIndex::new(kind, config);
        index.fit(chunks.clone()).unwrap();
        store.save(library_id, &index).unwrap();

        let loaded = store.load(library_id, kind).unwrap().unwrap().index;
        assert_eq!(loaded.kind(), kind);
        assert_eq!(loaded.len(), 200);
        assert!(IndexStore::is_valid(&loaded, &chunks));
        for query in &queries {
            assert_eq!(
                ranked_ids(&index, query, 10),
                ranked_ids(&loaded, query, 10),
                "{kind} results changed after reload"
            );
        }
    }
}

#[test]
fn test_metadata_record_is_readable_json() {
    let temp_dir = TempDir::new().unwrap();
    let store = IndexStore::new(temp_dir.path());
    let library_id = LibraryId::new();
    let mut index = VectorIndex::new(IndexKind::Flat, IvfConfig::default());
    index.fit(random_chunks(12, 16, 1)).unwrap();
    store.save(library_id, &index).unwrap();

    let path = temp_dir
        .path()
        .join(format!("{library_id}_flat_metadata.json"));
    let record: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();

    assert_eq!(record["num_vectors"], 12);
    assert_eq!(record["vector_dimension"], 16);
    assert_eq!(record["index_type"], "flat");
    assert!(record["fingerprint"].as_str().is_some_and(|f| f.len() == 64));
}

#[test]
fn test_truncated_snapshot_is_rebuilt_not_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let store = IndexStore::new(temp_dir.path());
    let library_id = LibraryId::new();
    let mut index = VectorIndex::new(IndexKind::Ivf, IvfConfig::default());
    index.fit(random_chunks(40, 8, 2)).unwrap();
    store.save(library_id, &index).unwrap();

    let path = temp_dir.path().join(format!("{library_id}_ivf.idx"));
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    assert!(store.load(library_id, IndexKind::Ivf).unwrap().is_none());
    // The companion record alone still lists the index
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn test_snapshot_goes_stale_when_chunks_change() {
    let temp_dir = TempDir::new().unwrap();
    let store = IndexStore::new(temp_dir.path());
    let library_id = LibraryId::new();
    let mut chunks = random_chunks(20, 8, 3);
    let mut index = VectorIndex::new(IndexKind::Flat, IvfConfig::default());
    index.fit(chunks.clone()).unwrap();
    let metadata = store.save(library_id, &index).unwrap();

    let loaded = store.load(library_id, IndexKind::Flat).unwrap().unwrap().index;
    chunks.extend(random_chunks(1, 8, 4));

    assert!(!IndexStore::is_valid(&loaded, &chunks));
    assert!(!IndexStore::is_fresh(&metadata, &chunks));
}

#[test]
fn test_libraries_do_not_share_snapshots() {
    let temp_dir = TempDir::new().unwrap();
    let store = IndexStore::new(temp_dir.path());
    let first = LibraryId::new();
    let second = LibraryId::new();

    let mut index = VectorIndex::new(IndexKind::Flat, IvfConfig::default());
    index.fit(random_chunks(5, 4, 5)).unwrap();
    store.save(first, &index).unwrap();

    assert!(store.load(second, IndexKind::Flat).unwrap().is_none());
    assert!(store.load(first, IndexKind::Ivf).unwrap().is_none());
    assert!(store.delete_library(second).unwrap().is_empty());
    assert_eq!(store.delete_library(first).unwrap(), vec![IndexKind::Flat]);
}
