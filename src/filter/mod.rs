//! Metadata filter engine.
//!
//! A filter list is a conjunction of `(field, operator, value)` predicates
//! evaluated against an entity's metadata merged over its built-in fields
//! (`id`, `created_at`, `updated_at` and, where the entity has them,
//! `title`, `content`, `name`, `description`). Custom metadata wins when a
//! key collides with a built-in.

mod coerce;
mod operator;

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Chunk, Document, Library, Metadata};
use coerce::{compare_operands, json_equal, normalize, operands_equal, stringify};

pub use operator::FilterOperator;

/// One predicate over an entity field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl MetadataFilter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// An entity that metadata filters can be evaluated against.
pub trait Filterable {
    fn filter_id(&self) -> String;

    fn created_at(&self) -> Option<DateTime<Utc>>;

    fn updated_at(&self) -> Option<DateTime<Utc>>;

    fn metadata(&self) -> &Metadata;

    /// Built-in fields specific to the entity type, e.g. `title`.
    fn extra_fields(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    /// Built-in fields with the entity's own metadata layered on top.
    fn filter_view(&self) -> Metadata {
        let timestamp = |ts: Option<DateTime<Utc>>| ts.map_or(Value::Null, |t| Value::String(t.to_rfc3339()));

        let mut view = Metadata::new();
        view.insert("id".to_string(), Value::String(self.filter_id()));
        view.insert("created_at".to_string(), timestamp(self.created_at()));
        view.insert("updated_at".to_string(), timestamp(self.updated_at()));
        for (key, value) in self.extra_fields() {
            view.insert(key.to_string(), value);
        }
        for (key, value) in self.metadata() {
            view.insert(key.clone(), value.clone());
        }
        view
    }
}

impl<T: Filterable + ?Sized> Filterable for &T {
    fn filter_id(&self) -> String {
        (**self).filter_id()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        (**self).created_at()
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        (**self).updated_at()
    }

    fn metadata(&self) -> &Metadata {
        (**self).metadata()
    }

    fn extra_fields(&self) -> Vec<(&'static str, Value)> {
        (**self).extra_fields()
    }
}

impl Filterable for Chunk {
    fn filter_id(&self) -> String {
        self.id.to_string()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn extra_fields(&self) -> Vec<(&'static str, Value)> {
        vec![("content", Value::String(self.content.clone()))]
    }
}

impl Filterable for Document {
    fn filter_id(&self) -> String {
        self.id.to_string()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn extra_fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("title", Value::String(self.title.clone())),
            ("content", Value::String(self.content.clone())),
        ]
    }
}

impl Filterable for Library {
    fn filter_id(&self) -> String {
        self.id.to_string()
    }

    fn created_at(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn updated_at(&self) -> Option<DateTime<Utc>> {
        Some(self.updated_at)
    }

    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn extra_fields(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("name", Value::String(self.name.clone())),
            (
                "description",
                self.description.clone().map_or(Value::Null, Value::String),
            ),
        ]
    }
}

/// Whether `item` satisfies every filter. An empty list matches everything.
pub fn matches<T: Filterable + ?Sized>(item: &T, filters: &[MetadataFilter]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let view = item.filter_view();
    filters.iter().all(|filter| matches_filter(&view, filter))
}

/// Keeps the items that satisfy every filter, in their original order.
pub fn apply_filters<T: Filterable>(items: Vec<T>, filters: &[MetadataFilter]) -> Vec<T> {
    if filters.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|item| matches(item, filters))
        .collect()
}

fn matches_filter(view: &Metadata, filter: &MetadataFilter) -> bool {
    let field_value = match view.get(&filter.field) {
        None | Some(Value::Null) => {
            return filter.operator == FilterOperator::Ne && !filter.value.is_null();
        }
        Some(value) => value,
    };
    let filter_value = &filter.value;

    match filter.operator {
        FilterOperator::Eq | FilterOperator::Ne => {
            let (a, b) = normalize(field_value, filter_value);
            let equal = operands_equal(a, b);
            if filter.operator == FilterOperator::Eq {
                equal
            } else {
                !equal
            }
        }
        FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
            let (a, b) = normalize(field_value, filter_value);
            let Some(ordering) = compare_operands(a, b) else {
                return false;
            };
            match filter.operator {
                FilterOperator::Gt => ordering == Ordering::Greater,
                FilterOperator::Gte => ordering != Ordering::Less,
                FilterOperator::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
        FilterOperator::In => match filter_value {
            Value::Array(options) => options.iter().any(|option| json_equal(field_value, option)),
            _ => false,
        },
        FilterOperator::Contains => stringify(field_value)
            .to_lowercase()
            .contains(&stringify(filter_value).to_lowercase()),
        FilterOperator::StartsWith => stringify(field_value)
            .to_lowercase()
            .starts_with(&stringify(filter_value).to_lowercase()),
        FilterOperator::EndsWith => stringify(field_value)
            .to_lowercase()
            .ends_with(&stringify(filter_value).to_lowercase()),
    }
}

/// Checks a filter list and returns one message per problem.
///
/// Operators are already checked when a filter is built or deserialized.
pub fn validate_filters(filters: &[MetadataFilter]) -> Vec<String> {
    let mut errors = Vec::new();
    for (i, filter) in filters.iter().enumerate() {
        if filter.field.is_empty() {
            errors.push(format!("Filter {i}: field must be a non-empty string"));
        }
        if filter.operator == FilterOperator::In && !filter.value.is_array() {
            errors.push(format!(
                "Filter {i}: 'in' operator requires a list or tuple value"
            ));
        }
    }
    errors
}

/// Parses `field:operator:value` arguments.
///
/// The value is read as JSON when it parses (`7`, `true`, `["a","b"]`),
/// otherwise as a plain string. All problems are collected.
pub fn parse_filter_args<S: AsRef<str>>(args: &[S]) -> Result<Vec<MetadataFilter>, Vec<String>> {
    let mut filters = Vec::with_capacity(args.len());
    let mut errors = Vec::new();

    for (i, arg) in args.iter().enumerate() {
        let arg = arg.as_ref();
        let mut parts = arg.splitn(3, ':');
        let (Some(field), Some(op), Some(raw)) = (parts.next(), parts.next(), parts.next()) else {
            errors.push(format!(
                "Filter {i}: expected field:operator:value, got '{arg}'"
            ));
            continue;
        };
        match op.parse::<FilterOperator>() {
            Ok(operator) => {
                let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
                filters.push(MetadataFilter {
                    field: field.to_string(),
                    operator,
                    value,
                });
            }
            Err(message) => errors.push(format!("Filter {i}: {message}")),
        }
    }

    if errors.is_empty() {
        errors = validate_filters(&filters);
    }
    if errors.is_empty() {
        Ok(filters)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LibraryId;
    use serde_json::json;

    fn doc(title: &str, metadata: Value) -> Document {
        let Value::Object(metadata) = metadata else {
            panic!("metadata must be an object");
        };
        Document::new(LibraryId::new(), title, "body text").with_metadata(metadata)
    }

    #[test]
    fn test_numeric_gt_over_mixed_scores() {
        let docs = vec![
            doc("a", json!({"score": 5})),
            doc("b", json!({"score": 10})),
            doc("c", json!({"score": 15})),
        ];
        let filters = [MetadataFilter::new("score", FilterOperator::Gt, 7)];
        let kept: Vec<String> = apply_filters(docs, &filters)
            .into_iter()
            .map(|d| d.title)
            .collect();
        assert_eq!(kept, vec!["b", "c"]);
    }

    #[test]
    fn test_apply_filters_is_idempotent() {
        let docs = vec![
            doc("a", json!({"lang": "rust"})),
            doc("b", json!({"lang": "go"})),
            doc("c", json!({"lang": "Rust"})),
        ];
        let filters = [MetadataFilter::new("lang", FilterOperator::StartsWith, "ru")];
        let once = apply_filters(docs, &filters);
        let twice = apply_filters(once.clone(), &filters);
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_missing_field_only_matches_ne() {
        let d = doc("a", json!({}));
        assert!(!matches(&d, &[MetadataFilter::new("missing", FilterOperator::Eq, 1)]));
        assert!(matches(&d, &[MetadataFilter::new("missing", FilterOperator::Ne, 1)]));
        assert!(!matches(&d, &[MetadataFilter::new("missing", FilterOperator::Ne, Value::Null)]));

        let nulled = doc("b", json!({"tag": null}));
        assert!(!matches(&nulled, &[MetadataFilter::new("tag", FilterOperator::Gt, 0)]));
        assert!(matches(&nulled, &[MetadataFilter::new("tag", FilterOperator::Ne, "x")]));
    }

    #[test]
    fn test_metadata_overrides_builtins() {
        let d = doc("Real Title", json!({"title": "override"}));
        assert!(matches(&d, &[MetadataFilter::new("title", FilterOperator::Eq, "override")]));
        assert!(matches(&d, &[MetadataFilter::new("id", FilterOperator::Eq, d.id.to_string())]));
    }

    #[test]
    fn test_builtin_fields_per_entity() {
        let library = Library::new("papers", None);
        assert!(matches(&library, &[MetadataFilter::new("name", FilterOperator::Eq, "papers")]));
        assert!(!matches(&library, &[MetadataFilter::new("description", FilterOperator::Eq, "x")]));

        let d = doc("Rust Book", json!({}));
        assert!(matches(&d, &[MetadataFilter::new("title", FilterOperator::Contains, "rust")]));
        assert!(matches(&d, &[MetadataFilter::new("content", FilterOperator::EndsWith, "TEXT")]));
    }

    #[test]
    fn test_date_comparisons() {
        let d = doc("a", json!({"published": "2024-06-01"}));
        let after = [MetadataFilter::new("published", FilterOperator::Gt, "2024-01-01T00:00:00Z")];
        let before = [MetadataFilter::new("published", FilterOperator::Lt, "2024-01-01")];
        assert!(matches(&d, &after));
        assert!(!matches(&d, &before));

        let recent = [MetadataFilter::new("created_at", FilterOperator::Gte, "2000-01-01")];
        assert!(matches(&d, &recent));
    }

    #[test]
    fn test_numeric_string_coercion() {
        let d = doc("a", json!({"year": "2021", "rating": 4}));
        assert!(matches(&d, &[MetadataFilter::new("year", FilterOperator::Gte, 2020)]));
        assert!(matches(&d, &[MetadataFilter::new("year", FilterOperator::Lt, "2100")]));
        assert!(matches(&d, &[MetadataFilter::new("rating", FilterOperator::Eq, "4.0")]));
        assert!(matches(&d, &[MetadataFilter::new("rating", FilterOperator::Eq, 4.0)]));
    }

    #[test]
    fn test_incompatible_comparison_does_not_match() {
        let d = doc("a", json!({"tag": "alpha"}));
        assert!(!matches(&d, &[MetadataFilter::new("tag", FilterOperator::Gt, 3)]));
        assert!(!matches(&d, &[MetadataFilter::new("tag", FilterOperator::Eq, 3)]));
        assert!(matches(&d, &[MetadataFilter::new("tag", FilterOperator::Ne, 3)]));
    }

    #[test]
    fn test_in_operator() {
        let d = doc("a", json!({"category": "ml", "level": 2}));
        assert!(matches(&d, &[MetadataFilter::new("category", FilterOperator::In, json!(["ml", "ai"]))]));
        assert!(!matches(&d, &[MetadataFilter::new("category", FilterOperator::In, json!(["db"]))]));
        assert!(matches(&d, &[MetadataFilter::new("level", FilterOperator::In, json!([1.0, 2.0]))]));
        assert!(!matches(&d, &[MetadataFilter::new("category", FilterOperator::In, "ml")]));
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let d = doc("a", json!({"a": 1, "b": 2}));
        let both = [
            MetadataFilter::new("a", FilterOperator::Eq, 1),
            MetadataFilter::new("b", FilterOperator::Eq, 2),
        ];
        let one_wrong = [
            MetadataFilter::new("a", FilterOperator::Eq, 1),
            MetadataFilter::new("b", FilterOperator::Eq, 3),
        ];
        assert!(matches(&d, &both));
        assert!(!matches(&d, &one_wrong));
        assert!(matches(&d, &[]));
    }

    #[test]
    fn test_validate_filters_reports_every_problem() {
        let filters = [
            MetadataFilter::new("", FilterOperator::Eq, 1),
            MetadataFilter::new("tags", FilterOperator::In, "x"),
            MetadataFilter::new("ok", FilterOperator::In, json!(["x"])),
        ];
        let errors = validate_filters(&filters);
        assert_eq!(
            errors,
            vec![
                "Filter 0: field must be a non-empty string".to_string(),
                "Filter 1: 'in' operator requires a list or tuple value".to_string(),
            ]
        );
        assert!(validate_filters(&filters[2..]).is_empty());
    }

    #[test]
    fn test_deserialize_rejects_unknown_operator() {
        let ok: MetadataFilter =
            serde_json::from_value(json!({"field": "score", "operator": "gte", "value": 3})).unwrap();
        assert_eq!(ok.operator, FilterOperator::Gte);

        let err = serde_json::from_value::<MetadataFilter>(
            json!({"field": "score", "operator": "approx", "value": 3}),
        )
        .unwrap_err();
        assert!(err.to_string().contains("operator must be one of"));
    }

    #[test]
    fn test_parse_filter_args() {
        let filters = parse_filter_args(&["score:gt:7", "tags:in:[\"a\",\"b\"]", "date:gte:2024-01-01T10:00:00Z"]).unwrap();
        assert_eq!(filters[0].value, json!(7));
        assert_eq!(filters[1].value, json!(["a", "b"]));
        assert_eq!(filters[2].value, json!("2024-01-01T10:00:00Z"));

        let errors = parse_filter_args(&["score", "x:approx:1", ":eq:1"]).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("Filter 0: expected field:operator:value"));
        assert!(errors[1].starts_with("Filter 1: operator must be one of"));

        let errors = parse_filter_args(&[":eq:1"]).unwrap_err();
        assert_eq!(errors, vec!["Filter 0: field must be a non-empty string".to_string()]);
    }
}
