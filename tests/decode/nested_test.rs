//! Nested documents: catalog discovery, deep queries and nested aggregations.

use std::sync::Arc;

use serde_json::{json, Value};
use tessera::backend::StaticBackend;
use tessera::executor::Executor;
use tessera::query::Query;
use tessera::schema::{Catalog, JxType, Schema};

/// One document holds a single object where the others hold arrays.
fn docs() -> Vec<Value> {
    vec![
        json!({"o": 1, "_a": [{"b": "x", "v": 2}, {"b": "y", "v": 3}]}),
        json!({"o": 2, "_a": {"b": "x", "v": 5}}),
        json!({"o": 3, "_a": [{"b": "x", "v": 7}]}),
        json!({"o": 4, "c": "x"}),
    ]
}

fn catalog() -> Catalog {
    Catalog::from_documents("t", &docs())
}

fn inner(offset: usize, b: &str, v: i64) -> Value {
    json!({"_nested": {"field": "_a", "offset": offset}, "fields": {"_a.b": [b], "_a.v": [v]}})
}

/// Hits as the backend returns them for a query with `_a` inner hits.
fn hits_with_inner() -> Value {
    json!({"hits": {"total": 4, "hits": [
        {"_id": "1", "fields": {"o": [1]}, "inner_hits": {"_a": {"hits": {"hits": [inner(0, "x", 2), inner(1, "y", 3)]}}}},
        {"_id": "2", "fields": {"o": [2]}, "inner_hits": {"_a": {"hits": {"hits": [inner(0, "x", 5)]}}}},
        {"_id": "3", "fields": {"o": [3]}, "inner_hits": {"_a": {"hits": {"hits": [inner(0, "x", 7)]}}}},
        {"_id": "4", "fields": {"o": [4], "c": ["x"]}, "inner_hits": {"_a": {"hits": {"hits": []}}}}
    ]}})
}

async fn run(q: Value, response: Value) -> (Value, Vec<(String, Value)>) {
    let backend = Arc::new(StaticBackend::new("6.8.2").with_response(response));
    let executor = Executor::new(backend.clone());
    let output = executor
        .execute(&Query::from_json(&q).unwrap(), &catalog())
        .await
        .unwrap();
    (output.to_json(), backend.requests().await)
}

#[test]
fn test_single_object_counts_as_nested() {
    let catalog = catalog();
    let described: Vec<(&str, JxType, &str)> = catalog
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.jx_type, c.depth()))
        .collect();
    assert_eq!(
        described,
        vec![
            ("_a", JxType::Nested, "_a"),
            ("_a.b", JxType::String, "_a"),
            ("_a.v", JxType::Number, "_a"),
            ("c", JxType::String, "."),
            ("o", JxType::Number, "."),
        ]
    );
    assert!(catalog.columns.iter().all(|c| c.es_column == c.name));
    assert_eq!(catalog.columns[1].nested_path, vec!["_a".to_string(), ".".to_string()]);
    assert_eq!(catalog.leaves("_a").len(), 2);
}

#[tokio::test]
async fn test_deep_query_one_row_per_element() {
    let (out, requests) = run(json!({"from": "t._a", "select": ["b", "v"]}), hits_with_inner()).await;
    assert_eq!(
        out["data"],
        json!([{"b": "x", "v": 2}, {"b": "y", "v": 3}, {"b": "x", "v": 5}, {"b": "x", "v": 7}])
    );
    let (index, request) = &requests[0];
    assert_eq!(index, "t");
    assert_eq!(request["query"]["nested"]["path"], json!("_a"));
}

#[tokio::test]
async fn test_deep_query_reaches_parent_fields() {
    let (out, _) = run(
        json!({"from": "t._a", "select": ["v", "o"], "format": "table"}),
        hits_with_inner(),
    )
    .await;
    assert_eq!(out["header"], json!(["v", "o"]));
    assert_eq!(out["data"], json!([[2, 1], [3, 1], [5, 2], [7, 3]]));
}

#[tokio::test]
async fn test_nested_column_from_root() {
    let (out, requests) = run(json!({"from": "t", "select": ["o", "_a"], "sort": "o"}), hits_with_inner()).await;
    assert_eq!(
        out["data"],
        json!([
            {"o": 1, "_a": [{"b": "x", "v": 2}, {"b": "y", "v": 3}]},
            {"o": 2, "_a": [{"b": "x", "v": 5}]},
            {"o": 3, "_a": [{"b": "x", "v": 7}]},
            {"o": 4}
        ])
    );
    let request = &requests[0].1;
    assert_eq!(request["sort"], json!([{"o": "asc"}]));
    assert_eq!(request["query"]["bool"]["should"][0]["nested"]["path"], json!("_a"));
}

#[tokio::test]
async fn test_groupby_nested_counts_parent_documents() {
    let response = json!({
        "hits": {"total": 4, "hits": []},
        "aggregations": {"_nested": {"doc_count": 5,
            "_match": {"buckets": [
                {"key": "x", "doc_count": 4, "_nested": {"doc_count": 3}},
                {"key": "y", "doc_count": 1, "_nested": {"doc_count": 1}}
            ]},
            "_missing": {"doc_count": 0, "_nested": {"doc_count": 0}}
        }}
    });
    let (out, requests) = run(json!({"from": "t", "groupby": "_a.b"}), response).await;
    assert_eq!(
        out["data"],
        json!([{"_a.b": "x", "count": 3}, {"_a.b": "y", "count": 1}])
    );
    assert_eq!(requests[0].1["aggs"]["_nested"]["nested"], json!({"path": "_a"}));
}
