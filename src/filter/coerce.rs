//! Value coercion and comparison for filter evaluation.
//!
//! Metadata is loosely typed JSON, so a filter value and a field value are
//! first normalized to a common representation:
//!
//! 1. both strings parse as ISO-8601 timestamps: compare as instants
//! 2. both strings parse as numbers: compare as floats
//! 3. one side a number, the other a numeric string: compare as floats
//! 4. otherwise compare the JSON values as they are
//!
//! Naive timestamps (no offset) are taken as UTC.

use std::cmp::Ordering;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Operand<'a> {
    Time(DateTime<Utc>),
    Float(f64),
    Json(&'a Value),
}

const NAIVE_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parses an ISO-8601 date, date-time, or RFC 3339 timestamp.
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok()
}

/// Brings `field` and `filter` to comparable operands.
pub(crate) fn normalize<'a>(field: &'a Value, filter: &'a Value) -> (Operand<'a>, Operand<'a>) {
    if let (Value::String(field_str), Value::String(filter_str)) = (field, filter) {
        if let Some(filter_time) = parse_timestamp(filter_str) {
            if let Some(field_time) = parse_timestamp(field_str) {
                return (Operand::Time(field_time), Operand::Time(filter_time));
            }
        }
        if let (Some(a), Some(b)) = (parse_number(field_str), parse_number(filter_str)) {
            return (Operand::Float(a), Operand::Float(b));
        }
    }

    match (field, filter) {
        (Value::Number(n), Value::String(s)) => {
            if let (Some(a), Some(b)) = (n.as_f64(), parse_number(s)) {
                return (Operand::Float(a), Operand::Float(b));
            }
        }
        (Value::String(s), Value::Number(n)) => {
            if let (Some(a), Some(b)) = (parse_number(s), n.as_f64()) {
                return (Operand::Float(a), Operand::Float(b));
            }
        }
        _ => {}
    }

    (Operand::Json(field), Operand::Json(filter))
}

impl Operand<'_> {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Operand::Float(f) => Some(*f),
            Operand::Json(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }
}

/// Equality after normalization. Numbers compare by value, so `10 == 10.0`.
pub(crate) fn operands_equal(a: Operand<'_>, b: Operand<'_>) -> bool {
    match (a, b) {
        (Operand::Time(x), Operand::Time(y)) => x == y,
        (Operand::Json(x), Operand::Json(y)) => json_equal(x, y),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Ordering after normalization, `None` when the operands are not comparable.
pub(crate) fn compare_operands(a: Operand<'_>, b: Operand<'_>) -> Option<Ordering> {
    match (a, b) {
        (Operand::Time(x), Operand::Time(y)) => Some(x.cmp(&y)),
        (Operand::Json(Value::String(x)), Operand::Json(Value::String(y))) => Some(x.cmp(y)),
        (Operand::Json(Value::Bool(x)), Operand::Json(Value::Bool(y))) => Some(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => None,
        },
    }
}

/// Structural JSON equality with numeric comparison by value.
pub(crate) fn json_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(key, value)| y.get(key).is_some_and(|other| json_equal(value, other)))
        }
        _ => a == b,
    }
}

/// Text form used by the substring operators.
pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
