//! Decoding groupby responses into lists, tables and cubes.

use serde_json::{json, Value};
use tessera::aggs::compile_aggs;
use tessera::compile::{compile, CompileOptions};
use tessera::decoder::OverflowPolicy;
use tessera::executor::decode;
use tessera::format::Formatted;
use tessera::query::Query;
use tessera::response::aggregations_root;
use tessera::schema::{Catalog, Column, JxType};
use tessera::{walker, QueryError};

fn catalog() -> Catalog {
    Catalog::new(
        "t",
        vec![
            Column::new("a", "a", JxType::String),
            Column::new("b", "b", JxType::Number),
        ],
    )
}

fn decode_with(q: Value, options: &CompileOptions, aggregations: Value) -> Formatted {
    let query = Query::from_json(&q).unwrap();
    let compiled = compile(&query, &catalog(), "6.8.2", options).unwrap();
    let response = json!({"hits": {"total": 10, "hits": []}, "aggregations": aggregations});
    decode(&query, compiled, &response).unwrap()
}

fn decode_response(q: Value, aggregations: Value) -> Formatted {
    decode_with(q, &CompileOptions::default(), aggregations)
}

/// `a` over ten documents: five "a", four "c", one without.
fn single_level() -> Value {
    json!({
        "_match": {"buckets": [
            {"key": "a", "doc_count": 5},
            {"key": "c", "doc_count": 4}
        ]},
        "_missing": {"doc_count": 1}
    })
}

// ============================================================================
// One edge
// ============================================================================

#[test]
fn test_single_null_row_list() {
    let out = decode_response(json!({"from": "t", "groupby": "a", "sort": "a"}), single_level());
    assert_eq!(out.format, "list");
    assert_eq!(
        out.data,
        json!([{"a": "a", "count": 5}, {"a": "c", "count": 4}, {"count": 1}])
    );
}

#[test]
fn test_single_null_row_table() {
    let out = decode_response(
        json!({"from": "t", "groupby": "a", "sort": "a", "format": "table"}),
        single_level(),
    );
    assert_eq!(out.header, Some(vec!["a".to_string(), "count".to_string()]));
    assert_eq!(out.data, json!([["a", 5], ["c", 4], [null, 1]]));
}

#[test]
fn test_descending_edge_sort() {
    let out = decode_response(
        json!({"from": "t", "groupby": "a", "sort": {"a": "desc"}}),
        single_level(),
    );
    assert_eq!(
        out.data,
        json!([{"a": "c", "count": 4}, {"a": "a", "count": 5}, {"count": 1}])
    );
}

#[test]
fn test_empty_buckets_are_skipped() {
    let out = decode_response(
        json!({"from": "t", "groupby": "a"}),
        json!({"_match": {"buckets": [{"key": "a", "doc_count": 2}]}, "_missing": {"doc_count": 0}}),
    );
    assert_eq!(out.data, json!([{"a": "a", "count": 2}]));
}

// ============================================================================
// Two edges
// ============================================================================

fn two_level_query(format: &str) -> Value {
    json!({
        "from": "t",
        "groupby": ["a", "b"],
        "sort": [{"value": "b", "sort": "desc"}, "a"],
        "format": format
    })
}

/// Sorted by `b` first, so `b` is the outer level.
fn b_outer() -> Value {
    json!({
        "_match": {"buckets": [
            {"key": 2, "doc_count": 3,
             "_match": {"buckets": [{"key": "a", "doc_count": 2}, {"key": "c", "doc_count": 1}]},
             "_missing": {"doc_count": 0}},
            {"key": 1, "doc_count": 3,
             "_match": {"buckets": [{"key": "c", "doc_count": 2}, {"key": "a", "doc_count": 1}]},
             "_missing": {"doc_count": 0}}
        ]},
        "_missing": {"doc_count": 3,
            "_match": {"buckets": [{"key": "a", "doc_count": 1}, {"key": "c", "doc_count": 1}]},
            "_missing": {"doc_count": 1}}
    })
}

#[test]
fn test_two_level_list_follows_sort() {
    let out = decode_response(two_level_query("list"), b_outer());
    assert_eq!(
        out.data,
        json!([
            {"a": "a", "b": 2, "count": 2},
            {"a": "c", "b": 2, "count": 1},
            {"a": "a", "b": 1, "count": 1},
            {"a": "c", "b": 1, "count": 2},
            {"a": "a", "count": 1},
            {"a": "c", "count": 1},
            {"count": 1}
        ])
    );
}

#[test]
fn test_two_level_table_keeps_edge_columns_in_query_order() {
    let out = decode_response(two_level_query("table"), b_outer());
    assert_eq!(
        out.header,
        Some(vec!["a".to_string(), "b".to_string(), "count".to_string()])
    );
    assert_eq!(out.data[0], json!(["a", 2, 2]));
    assert_eq!(out.data[6], json!([null, null, 1]));
}

#[test]
fn test_two_level_cube() {
    // cubes keep edge order, so `a` is the outer level
    let a_outer = json!({
        "_match": {"buckets": [
            {"key": "a", "doc_count": 4,
             "_match": {"buckets": [{"key": 2, "doc_count": 2}, {"key": 1, "doc_count": 1}]},
             "_missing": {"doc_count": 1}},
            {"key": "c", "doc_count": 4,
             "_match": {"buckets": [{"key": 1, "doc_count": 2}, {"key": 2, "doc_count": 1}]},
             "_missing": {"doc_count": 1}}
        ]},
        "_missing": {"doc_count": 1, "_match": {"buckets": []}, "_missing": {"doc_count": 1}}
    });
    let out = decode_response(two_level_query("cube"), a_outer);
    assert_eq!(out.data, json!({"count": [[2, 1, 1], [1, 2, 1], [0, 0, 1]]}));
    let edges = out.edges.unwrap();
    assert_eq!(edges[0]["name"], json!("a"));
    assert_eq!(
        edges[1]["domain"]["partitions"],
        json!([{"value": 2, "dataIndex": 0}, {"value": 1, "dataIndex": 1}])
    );
}

// ============================================================================
// Discovery
// ============================================================================

#[test]
fn test_index_before_counting_fails() {
    let query = Query::from_json(&json!({"from": "t", "groupby": "a"})).unwrap();
    let plan = compile_aggs(&query, &catalog(), &CompileOptions::default()).unwrap();
    let root = aggregations_root(&json!({"aggregations": single_level()}));
    let err = walker::rows(&root, &plan.decoders).unwrap_err();
    assert!(matches!(err, QueryError::DomainNotFrozen { .. }));
}

#[test]
fn test_overflow_dropped_by_default() {
    let out = decode_response(json!({"from": "t", "groupby": "a", "limit": 1}), single_level());
    assert_eq!(out.data, json!([{"a": "a", "count": 5}, {"count": 1}]));
}

#[test]
fn test_overflow_into_null_cell() {
    let options = CompileOptions::default().with_overflow(OverflowPolicy::Other);
    let out = decode_with(
        json!({"from": "t", "groupby": "a", "limit": 1, "format": "cube"}),
        &options,
        single_level(),
    );
    assert_eq!(out.data, json!({"count": [5, 5]}));
    let edges = out.edges.unwrap();
    assert_eq!(edges[0]["domain"]["overflow"], json!(4));
}

#[test]
fn test_overflow_rows_collapse_into_one() {
    let options = CompileOptions::default().with_overflow(OverflowPolicy::Other);
    let list = decode_with(
        json!({"from": "t", "groupby": "a", "limit": 1}),
        &options,
        single_level(),
    );
    assert_eq!(list.data, json!([{"a": "a", "count": 5}, {"count": 5}]));

    let table = decode_with(
        json!({"from": "t", "groupby": "a", "limit": 1, "format": "table"}),
        &options,
        single_level(),
    );
    assert_eq!(table.header, Some(vec!["a".to_string(), "count".to_string()]));
    assert_eq!(table.data, json!([["a", 5], [null, 5]]));
}
