//! Flat and IVF index behavior over realistic chunk sets.

use std::collections::HashSet;

use libris::vector::{FlatIndex, IvfConfig, IvfIndex, KMeans, VectorIndex};
use libris::{ChunkId, IndexKind};
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::common::{random_chunks, vector_chunk};

fn assert_descending(scores: &[f32]) {
    for pair in scores.windows(2) {
        assert!(pair[0] >= pair[1], "scores not descending: {scores:?}");
    }
}

#[test]
fn test_flat_search_top_three_of_five() {
    let chunks = random_chunks(5, 10, 1);
    let ids: HashSet<ChunkId> = chunks.iter().map(|c| c.id).collect();
    let query = chunks[2].vector().unwrap();

    let mut index = FlatIndex::new();
    index.fit(chunks).unwrap();
    let hits = index.search(&query, 3).unwrap();

    assert_eq!(hits.len(), 3);
    assert!(hits.iter().all(|h| ids.contains(&h.chunk.id)));
    let scores: Vec<f32> = hits.iter().map(|h| h.similarity).collect();
    assert_descending(&scores);
    assert!((scores[0] - 1.0).abs() < 1e-5);
}

#[test]
fn test_flat_add_after_fit() {
    let chunks = random_chunks(8, 10, 2);
    let ids: HashSet<ChunkId> = chunks.iter().map(|c| c.id).collect();
    let query = chunks[0].vector().unwrap();

    let mut index = FlatIndex::new();
    index.fit(chunks[..5].to_vec()).unwrap();
    index.add(chunks[5..].to_vec()).unwrap();
    let hits = index.search(&query, 8).unwrap();

    let found: HashSet<ChunkId> = hits.iter().map(|h| h.chunk.id).collect();
    assert_eq!(hits.len(), 8);
    assert_eq!(found, ids);
}

#[test]
fn test_flat_remove_two() {
    let chunks = random_chunks(10, 10, 3);
    let removed = [chunks[3].id, chunks[7].id];
    let query = chunks[3].vector().unwrap();

    let mut index = FlatIndex::new();
    index.fit(chunks).unwrap();
    index.remove(&removed);
    let hits = index.search(&query, 10).unwrap();

    assert_eq!(hits.len(), 8);
    assert!(hits.iter().all(|h| !removed.contains(&h.chunk.id)));
}

#[test]
fn test_search_never_exceeds_k_or_size() {
    let chunks = random_chunks(7, 4, 4);
    let query = chunks[0].vector().unwrap();
    for kind in IndexKind::ALL {
        let mut index = VectorIndex::new(kind, IvfConfig::default());
        index.fit(chunks.clone()).unwrap();
        for k in [0, 1, 3, 7, 50] {
            let hits = index.search(&query, k).unwrap();
            assert!(hits.len() <= k.min(7), "{kind} returned {} for k={k}", hits.len());
            // IVF returns its probed bucket in storage order
            if kind == IndexKind::Flat {
                let scores: Vec<f32> = hits.iter().map(|h| h.similarity).collect();
                assert_descending(&scores);
            }
        }
    }
}

#[test]
fn test_add_then_remove_restores_searchable_set() {
    let chunks = random_chunks(14, 6, 11);
    let (base, extra) = chunks.split_at(10);
    let extra_ids: Vec<ChunkId> = extra.iter().map(|c| c.id).collect();
    let query = base[0].vector().unwrap();

    for kind in IndexKind::ALL {
        let config = IvfConfig {
            n_partitions: 3,
            seed: Some(5),
            ..IvfConfig::default()
        };
        let mut index = VectorIndex::new(kind, config);
        index.fit(base.to_vec()).unwrap();
        let before = index.chunk_ids();

        index.add(extra.to_vec()).unwrap();
        assert_eq!(index.len(), 14, "{kind} after add");
        index.remove(&extra_ids).unwrap();

        assert_eq!(index.chunk_ids(), before, "{kind} searchable set changed");
        assert!(index.covers_exactly(base), "{kind} no longer covers the base chunks");

        let hits = index.search(&query, 14).unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| before.contains(&h.chunk.id)));
    }
}

/// 60 points in three tight groups around (0,0), (5,5) and (10,0).
fn three_blobs() -> Vec<libris::Chunk> {
    let centers = [(0.0f32, 0.0f32), (5.0, 5.0), (10.0, 0.0)];
    let mut chunks = Vec::new();
    for (cx, cy) in centers {
        for i in 0..20 {
            let dx = ((i % 5) as f32 - 2.0) * 0.1;
            let dy = ((i / 5) as f32 - 1.5) * 0.1;
            chunks.push(vector_chunk(&[cx + dx, cy + dy]));
        }
    }
    chunks
}

#[test]
fn test_ivf_query_lands_in_origin_cluster() {
    let chunks = three_blobs();
    let origin: HashSet<ChunkId> = chunks[..20].iter().map(|c| c.id).collect();

    let mut index = IvfIndex::new(IvfConfig {
        n_partitions: 3,
        max_iters: 32,
        n_init: 30,
        seed: Some(2024),
    });
    index.fit(chunks).unwrap();

    assert_eq!(index.bucket_sizes(), vec![20, 20, 20]);
    let hits = index.search(&[0.1, 0.1], 60).unwrap();
    assert_eq!(hits.len(), 20);
    assert!(hits.iter().all(|h| origin.contains(&h.chunk.id)));
}

#[test]
fn test_kmeans_labels_in_range() {
    let vectors: Vec<Vec<f32>> = random_chunks(40, 5, 9)
        .iter()
        .map(|c| c.vector().unwrap())
        .collect();
    let mut rng = StdRng::seed_from_u64(5);

    for k in [1, 4, 40, 100] {
        let result = KMeans::new(k, 16).fit(&vectors, &mut rng).unwrap();
        assert_eq!(result.labels.len(), 40);
        assert!(result.k() <= k.min(40));
        assert!(result.labels.iter().all(|l| l.index() < result.k()));
    }
}

#[test]
fn test_ivf_reset_to_unfit_after_removing_everything() {
    let chunks = random_chunks(6, 3, 10);
    let ids: Vec<ChunkId> = chunks.iter().map(|c| c.id).collect();

    let mut index = VectorIndex::new(IndexKind::Ivf, IvfConfig::default());
    index.fit(chunks).unwrap();
    assert!(index.is_fit());

    index.remove(&ids).unwrap();
    assert!(!index.is_fit());
    assert!(index.is_empty());
    assert!(index.search(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
}
