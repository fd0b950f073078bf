//! End-to-end search: ingest through the document pipeline, then query.

use std::sync::Arc;

use libris::{
    Chunk, ChunkStore, Document, DocumentStore, DocumentUpdate, IndexKind, Metadata,
    SearchRequest, parse_filter_args,
};
use serde_json::json;

use crate::common::{TestLibrary, metadata};

const CORPUS: [(&str, &str); 4] = [
    ("Ownership", "rust ownership borrowing lifetimes"),
    ("Gardening", "tomato garden soil compost watering"),
    ("Baking", "sourdough bread flour oven crust"),
    ("Astronomy", "telescope galaxy nebula orbit planet"),
];

async fn seeded_library() -> (TestLibrary, Vec<Document>) {
    let lib = TestLibrary::new().await;
    let ingestor = lib.ingestor();
    let mut documents = Vec::new();
    for (i, (title, content)) in CORPUS.iter().enumerate() {
        let document = ingestor
            .add_document(lib.id(), *title, *content, metadata(json!({ "position": i })))
            .await
            .unwrap();
        documents.push(document);
    }
    (lib, documents)
}

#[tokio::test]
async fn test_three_chunks_of_one_document_count_as_one_result() {
    let lib = TestLibrary::new().await;
    let document = DocumentStore::insert(
        &lib.store,
        Document::new(lib.id(), "Split", "alpha beta gamma"),
    )
    .await
    .unwrap();
    let chunks: Vec<Chunk> = ["alpha", "beta", "gamma"]
        .iter()
        .map(|text| {
            Chunk::from_vector(
                lib.id(),
                document.id,
                *text,
                &lib.embedder.vector(text),
                Metadata::new(),
            )
        })
        .collect();
    ChunkStore::insert_many(&lib.store, chunks).await.unwrap();

    let request = SearchRequest::new(lib.id(), "alpha").with_limit(1);
    let results = lib.service().search(&request).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id, document.id);
    assert_eq!(results[0].matching_chunks, 3);
    assert!((results[0].score - 1.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_ingested_documents_rank_by_query() {
    let (lib, documents) = seeded_library().await;

    let request = SearchRequest::new(lib.id(), "sourdough bread in the oven").with_limit(4);
    let results = lib.service().search(&request).await.unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].document.id, documents[2].id);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert!(results.iter().all(|r| r.document.library_id == lib.id()));
}

#[tokio::test]
async fn test_limit_caps_results() {
    let (lib, _) = seeded_library().await;

    let request = SearchRequest::new(lib.id(), "planet orbit").with_limit(2);
    let results = lib.service().search(&request).await.unwrap();

    assert_eq!(results.len(), 2);
}

#[tokio::test]
async fn test_ivf_search_returns_library_documents() {
    let (lib, documents) = seeded_library().await;

    let request = SearchRequest::new(lib.id(), "telescope galaxy nebula orbit planet")
        .with_index(IndexKind::Ivf)
        .with_limit(4);
    let results = lib.service().search(&request).await.unwrap();

    assert!(!results.is_empty());
    assert!(results.len() <= 4);
    let known: Vec<_> = documents.iter().map(|d| d.id).collect();
    assert!(results.iter().all(|r| known.contains(&r.document.id)));
    assert!(lib.service().cache().get(lib.id(), IndexKind::Ivf).is_some());
}

#[tokio::test]
async fn test_chunk_filters_narrow_candidates() {
    let (lib, documents) = seeded_library().await;

    let filters = parse_filter_args(&["content:contains:garden"]).unwrap();
    let request = SearchRequest::new(lib.id(), "sourdough bread")
        .with_limit(4)
        .with_filters(filters);
    let results = lib.service().search(&request).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.id, documents[1].id);
}

#[tokio::test]
async fn test_filters_matching_nothing_return_empty() {
    let (lib, _) = seeded_library().await;

    let filters = parse_filter_args(&["embedding_model:eq:\"other\""]).unwrap();
    let request = SearchRequest::new(lib.id(), "garden").with_filters(filters);
    let results = lib.service().search(&request).await.unwrap();

    assert!(results.is_empty());
}

#[tokio::test]
async fn test_cold_service_reuses_persisted_index() {
    let (lib, _) = seeded_library().await;
    let request = SearchRequest::new(lib.id(), "tomato compost");

    let warm = lib.service().search(&request).await.unwrap();
    let snapshot = lib
        .service()
        .list_indexes()
        .unwrap()
        .into_iter()
        .find(|m| m.library_id == lib.id() && m.index_type == IndexKind::Flat)
        .expect("flat index should be persisted");

    let cold = lib.cold_service();
    let results = cold.search(&request).await.unwrap();

    let after = cold
        .list_indexes()
        .unwrap()
        .into_iter()
        .find(|m| m.library_id == lib.id() && m.index_type == IndexKind::Flat)
        .unwrap();
    assert_eq!(after.updated_at, snapshot.updated_at, "snapshot was rewritten");
    assert_eq!(
        results.iter().map(|r| r.document.id).collect::<Vec<_>>(),
        warm.iter().map(|r| r.document.id).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_content_update_changes_ranking() {
    let (lib, documents) = seeded_library().await;
    let service = lib.service();
    let request = SearchRequest::new(lib.id(), "volcano lava eruption").with_limit(1);

    let before = service.search(&request).await.unwrap();
    let cached = service.cache().get(lib.id(), IndexKind::Flat).unwrap();

    lib.ingestor()
        .update_document(
            documents[0].id,
            DocumentUpdate {
                content: Some("volcano lava eruption magma".to_string()),
                ..DocumentUpdate::default()
            },
        )
        .await
        .unwrap();
    let after = service.search(&request).await.unwrap();

    assert_eq!(before.len(), 1);
    assert_eq!(after[0].document.id, documents[0].id);
    assert_eq!(after[0].document.content, "volcano lava eruption magma");
    let rebuilt = service.cache().get(lib.id(), IndexKind::Flat).unwrap();
    assert!(!Arc::ptr_eq(&cached, &rebuilt));
}

#[tokio::test]
async fn test_deleted_document_leaves_results() {
    let (lib, documents) = seeded_library().await;
    let service = lib.service();
    let request = SearchRequest::new(lib.id(), "rust ownership borrowing").with_limit(4);

    let before = service.search(&request).await.unwrap();
    assert_eq!(before[0].document.id, documents[0].id);

    lib.ingestor().delete_document(documents[0].id).await.unwrap();
    let after = service.search(&request).await.unwrap();

    assert!(after.iter().all(|r| r.document.id != documents[0].id));
    assert_eq!(after.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_searches_share_one_build_per_kind() {
    let (lib, _documents) = seeded_library().await;
    let service = Arc::new(lib.service());

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..16 {
        let kind = IndexKind::ALL[i % 2];
        let service = Arc::clone(&service);
        let request = SearchRequest::new(lib.id(), "garden soil and bread")
            .with_limit(4)
            .with_index(kind);
        tasks.spawn(async move {
            let results = service.search(&request).await.unwrap();
            let ranked: Vec<_> = results
                .iter()
                .map(|r| (r.document.id, r.score, r.matching_chunks))
                .collect();
            (kind, ranked)
        });
    }

    let mut seen: Vec<(IndexKind, Vec<_>)> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (kind, ranked) = joined.unwrap();
        assert!(!ranked.is_empty());
        match seen.iter().find(|(k, _)| *k == kind) {
            Some((_, first)) => assert_eq!(&ranked, first, "{kind} searches disagree"),
            None => seen.push((kind, ranked)),
        }
    }
    assert_eq!(seen.len(), 2);

    // A second save would keep created_at and move updated_at
    let records = service.list_indexes().unwrap();
    assert_eq!(records.len(), 2);
    for record in &records {
        assert_eq!(
            record.created_at, record.updated_at,
            "{} index was saved more than once",
            record.index_type
        );
    }
    for kind in IndexKind::ALL {
        assert!(service.cache().get(lib.id(), kind).is_some());
    }
}
