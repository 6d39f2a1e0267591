//! Recognition of the backend's recursive bucket response.
//!
//! The request builder names its structural aggregations with marker keys;
//! this module maps a response key back to what it was.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static JOIN_KEY: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^_join_(\d+)$").unwrap());

/// Filter wrapper, passed through.
pub const FILTER: &str = "_filter";
/// Nested or reverse-nested wrapper, passed through.
pub const NESTED: &str = "_nested";
/// Bucket list of the values an edge matched.
pub const MATCH: &str = "_match";
/// Single bucket of documents an edge did not match.
pub const MISSING: &str = "_missing";
/// Bucket list of out-of-domain values.
pub const OTHER: &str = "_other";

/// Name of the `n`th indexed filter bucket.
pub fn join_key(n: usize) -> String {
    format!("_join_{}", n)
}

/// What a response key is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Filter,
    Nested,
    Match,
    Missing,
    Other,
    Join(usize),
    /// A metric or anything else the walker does not descend into.
    Payload,
}

impl Marker {
    pub fn of(key: &str) -> Marker {
        match key {
            FILTER => Marker::Filter,
            NESTED => Marker::Nested,
            MATCH => Marker::Match,
            MISSING => Marker::Missing,
            OTHER => Marker::Other,
            _ => JOIN_KEY
                .captures(key)
                .and_then(|c| c[1].parse().ok())
                .map(Marker::Join)
                .unwrap_or(Marker::Payload),
        }
    }
}

/// Descend through filter and nested wrappers.
pub fn drill(mut node: &Value) -> &Value {
    while let Some(deeper) = node.get(FILTER).or_else(|| node.get(NESTED)) {
        node = deeper;
    }
    node
}

/// Buckets of a bucket-list aggregation.
pub fn buckets(node: &Value) -> &[Value] {
    node.get("buckets")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

pub fn doc_count(node: &Value) -> u64 {
    node.get("doc_count").and_then(Value::as_u64).unwrap_or(0)
}

/// The value a terms bucket stands for. Boolean fields come back as `1`/`0`
/// with a textual `key_as_string`.
pub fn bucket_key(bucket: &Value) -> Value {
    match (bucket.get("key"), bucket.get("key_as_string")) {
        (Some(Value::Number(_)), Some(Value::String(s))) if s == "true" => Value::Bool(true),
        (Some(Value::Number(_)), Some(Value::String(s))) if s == "false" => Value::Bool(false),
        (Some(key), _) => key.clone(),
        (None, _) => Value::Null,
    }
}

/// Total hit count, which older backends report as a number and newer ones
/// as `{"value": n}`.
pub fn hits_total(response: &Value) -> Option<u64> {
    let total = response.get("hits")?.get("total")?;
    total
        .as_u64()
        .or_else(|| total.get("value").and_then(Value::as_u64))
}

/// The aggregations root with `doc_count` filled from the hit total.
pub fn aggregations_root(response: &Value) -> Value {
    let mut root = response
        .get("aggregations")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));
    if let Value::Object(map) = &mut root {
        if !map.contains_key("doc_count") {
            if let Some(total) = hits_total(response) {
                map.insert("doc_count".to_string(), Value::from(total));
            }
        }
    }
    root
}
