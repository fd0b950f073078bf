//! Filter parsing and evaluation across entity types.

use libris::filter::{matches, validate_filters};
use libris::{
    Chunk, DocumentId, FilterOperator, LibraryId, MetadataFilter, apply_filters,
    parse_filter_args,
};
use serde_json::json;

use crate::common::metadata;

fn scored_chunk(score: i64) -> Chunk {
    Chunk::from_vector(
        LibraryId::new(),
        DocumentId::new(),
        format!("score {score}"),
        &[1.0, 0.0],
        metadata(json!({ "score": score })),
    )
}

#[test]
fn test_score_gt_seven_keeps_ten_and_fifteen() {
    let chunks: Vec<Chunk> = [5, 10, 15].into_iter().map(scored_chunk).collect();
    let filters = vec![MetadataFilter::new("score", FilterOperator::Gt, 7)];

    let kept: Vec<String> = apply_filters(chunks, &filters)
        .into_iter()
        .map(|c| c.content)
        .collect();
    assert_eq!(kept, vec!["score 10", "score 15"]);
}

#[test]
fn test_cli_arguments_become_filters() {
    let filters = parse_filter_args(&[
        "score:gte:10",
        "tags:in:[\"db\",\"ml\"]",
        "content:contains:score",
        "dtype:eq:float32",
    ])
    .unwrap();
    assert_eq!(filters.len(), 4);
    assert_eq!(filters[0].value, json!(10));
    assert_eq!(filters[1].value, json!(["db", "ml"]));
    assert!(validate_filters(&filters).is_empty());

    let mut chunk = scored_chunk(12);
    chunk.metadata.insert("tags".into(), json!("ml"));
    assert!(matches(&chunk, &filters));

    chunk.metadata.insert("tags".into(), json!("web"));
    assert!(!matches(&chunk, &filters));
}

#[test]
fn test_cli_argument_errors_are_collected() {
    let errors = parse_filter_args(&["score:like:3", "nocolon", "a:between:1"]).unwrap_err();
    assert_eq!(errors.len(), 3);
    assert!(errors[0].contains("operator must be one of"));
    assert!(errors[1].contains("field:operator:value"));

    let errors = parse_filter_args(&["tags:in:ml"]).unwrap_err();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("'in' operator"));
}

#[test]
fn test_unknown_operator_rejected_in_json() {
    let parsed: Result<Vec<MetadataFilter>, _> =
        serde_json::from_value(json!([{ "field": "a", "operator": "regex", "value": "x" }]));
    assert!(parsed.is_err());

    let parsed: Vec<MetadataFilter> =
        serde_json::from_value(json!([{ "field": "a", "operator": "ends_with", "value": "x" }]))
            .unwrap();
    assert_eq!(parsed[0].operator, FilterOperator::EndsWith);
}
