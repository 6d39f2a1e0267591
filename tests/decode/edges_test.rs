//! Decoding edges responses: every cell of the cross product is reported.

use serde_json::{json, Value};
use tessera::compile::{compile, CompileOptions};
use tessera::executor::decode;
use tessera::format::Formatted;
use tessera::query::Query;
use tessera::schema::{Catalog, Column, JxType};
use tessera::QueryError;

fn catalog() -> Catalog {
    Catalog::new(
        "t",
        vec![
            Column::new("a", "a", JxType::String),
            Column::new("v", "v", JxType::Number),
        ],
    )
}

fn decode_response(q: Value, response: Value) -> Formatted {
    let query = Query::from_json(&q).unwrap();
    let compiled = compile(&query, &catalog(), "5.6.16", &CompileOptions::default()).unwrap();
    decode(&query, compiled, &response).unwrap()
}

fn set_edge(format: &str) -> Value {
    json!({
        "from": "t",
        "edges": [{"name": "a", "value": "a", "domain": {"type": "set", "partitions": ["x", "y"]}}],
        "format": format
    })
}

fn set_response() -> Value {
    json!({
        "hits": {"total": 5},
        "aggregations": {
            "_match": {"buckets": [{"key": "x", "doc_count": 3}]},
            "_missing": {"doc_count": 2}
        }
    })
}

#[test]
fn test_set_domain_list_has_every_partition() {
    let out = decode_response(set_edge("list"), set_response());
    assert_eq!(
        out.data,
        json!([{"a": "x", "count": 3}, {"a": "y", "count": 0}, {"count": 2}])
    );
}

#[test]
fn test_set_domain_table() {
    let out = decode_response(set_edge("table"), set_response());
    assert_eq!(out.header, Some(vec!["a".to_string(), "count".to_string()]));
    assert_eq!(out.data, json!([["x", 3], ["y", 0], [null, 2]]));
}

#[test]
fn test_set_domain_cube() {
    let out = decode_response(set_edge("cube"), set_response());
    assert_eq!(
        out.edges,
        Some(vec![json!({
            "name": "a",
            "allowNulls": true,
            "domain": {
                "type": "set",
                "partitions": [{"value": "x", "dataIndex": 0}, {"value": "y", "dataIndex": 1}]
            }
        })])
    );
    assert_eq!(out.data, json!({"count": [3, 0, 2]}));
}

#[test]
fn test_range_domain_with_metric() {
    let q = json!({
        "from": "t",
        "edges": [{
            "name": "v",
            "value": "v",
            "allowNulls": false,
            "domain": {"type": "range", "min": 0, "max": 20, "interval": 10}
        }],
        "select": [{"name": "n", "aggregate": "count"}, {"name": "biggest", "value": "v", "aggregate": "max"}],
        "format": "cube"
    });
    let query = Query::from_json(&q).unwrap();
    let compiled = compile(&query, &catalog(), "5.6.16", &CompileOptions::default()).unwrap();
    let request = compiled.request().clone();
    let ranges = request["aggs"]["_match"]["range"]["ranges"].clone();
    assert_eq!(ranges, json!([{"from": 0.0, "to": 10.0}, {"from": 10.0, "to": 20.0}]));

    let response = json!({"aggregations": {"_match": {"buckets": [
        {"key": "0.0-10.0", "from": 0.0, "to": 10.0, "doc_count": 2, "v": {"count": 2, "max": 7.0}},
        {"key": "10.0-20.0", "from": 10.0, "to": 20.0, "doc_count": 0, "v": {"count": 0, "max": null}}
    ]}}});
    let out = decode(&query, compiled, &response).unwrap();
    assert_eq!(out.data, json!({"n": [2, 0], "biggest": [7.0, null]}));
}

#[test]
fn test_range_domain_too_fine_is_rejected() {
    let q = json!({
        "from": "t",
        "edges": [{"name": "v", "value": "v", "domain": {"type": "range", "min": 0, "max": 1e300, "interval": 1}}]
    });
    let query = Query::from_json(&q).unwrap();
    let err = compile(&query, &catalog(), "6.8.2", &CompileOptions::default()).unwrap_err();
    assert!(matches!(err, QueryError::InvalidQuery(_)));

    let q = json!({
        "from": "t",
        "edges": [{"name": "v", "value": "v", "domain": {"type": "range", "min": 0, "max": 100, "interval": 1}}]
    });
    let query = Query::from_json(&q).unwrap();
    let capped = CompileOptions::default().with_max_limit(50);
    assert!(compile(&query, &catalog(), "6.8.2", &capped).is_err());
    assert!(compile(&query, &catalog(), "6.8.2", &CompileOptions::default()).is_ok());
}

#[test]
fn test_no_edges_single_value() {
    let q = json!({"from": "t", "select": {"aggregate": "count"}});
    let out = decode_response(q, json!({"hits": {"total": 2}, "aggregations": {}}));
    assert_eq!(out.format, "value");
    assert_eq!(out.data, json!(2));
}

#[test]
fn test_no_edges_selects_object() {
    let q = json!({"from": "t", "select": [{"name": "count", "aggregate": "count"}]});
    let out = decode_response(q, json!({"hits": {"total": {"value": 2, "relation": "eq"}}}));
    assert_eq!(out.data, json!({"count": 2}));
}

#[test]
fn test_no_edges_table_and_cube() {
    let response = json!({"hits": {"total": 3}, "aggregations": {"v": {"count": 3, "sum": 12.0, "max": 6.0}}});
    let q = json!({"from": "t", "select": [{"name": "total", "value": "v", "aggregate": "sum"}], "format": "table"});
    let out = decode_response(q, response.clone());
    assert_eq!(out.header, Some(vec!["total".to_string()]));
    assert_eq!(out.data, json!([[12.0]]));

    let q = json!({"from": "t", "select": [{"name": "total", "value": "v", "aggregate": "sum"}], "format": "cube"});
    let out = decode_response(q, response);
    assert_eq!(out.edges, Some(vec![]));
    assert_eq!(out.data, json!({"total": 12.0}));
}
