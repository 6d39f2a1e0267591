//! Set operations: request compilation and hit formatting.

use std::sync::Arc;

use insta::assert_snapshot;
use serde_json::{json, Value};
use tessera::backend::StaticBackend;
use tessera::compile::{compile, CompileOptions, Compiled};
use tessera::executor::Executor;
use tessera::query::Query;
use tessera::schema::{Catalog, Column, JxType};
use tessera::setop::format_hits;

fn catalog() -> Catalog {
    Catalog::new(
        "t",
        vec![
            Column::new("a", "a.~s~", JxType::String),
            Column::new("n", "n.~n~", JxType::Number),
            Column::new("c", "c", JxType::Nested).nested_in(&["c"]),
            Column::new("c.v", "c.v.~n~", JxType::Number).nested_in(&["c"]),
        ],
    )
}

fn query(json: Value) -> Query {
    Query::from_json(&json).unwrap()
}

fn hits(fields: Vec<Value>) -> Value {
    let hits: Vec<Value> = fields
        .into_iter()
        .enumerate()
        .map(|(i, f)| json!({"_id": i.to_string(), "fields": f}))
        .collect();
    json!({"hits": {"total": hits.len(), "hits": hits}})
}

async fn run(q: Value, response: Value) -> Value {
    let backend = StaticBackend::new("6.8.2").with_response(response);
    let executor = Executor::new(Arc::new(backend));
    executor.execute(&query(q), &catalog()).await.unwrap().to_json()
}

#[test]
fn test_prefix_filter_request() {
    let q = query(json!({"from": "t", "where": {"prefix": {"a": "test"}}}));
    let compiled = compile(&q, &catalog(), "6.8.2", &CompileOptions::default()).unwrap();
    assert_snapshot!(
        compiled.request().to_string(),
        @r#"{"from":0,"query":{"prefix":{"a.~s~":"test"}},"size":10,"stored_fields":["a.~s~","n.~n~"]}"#
    );
}

#[tokio::test]
async fn test_prefix_filter_rows() {
    let response = hits(vec![json!({"a.~s~": ["test"]}), json!({"a.~s~": ["testkyle"]})]);
    let out = run(json!({"from": "t", "where": {"prefix": {"a": "test"}}}), response).await;
    assert_eq!(out["meta"]["format"], json!("list"));
    assert_eq!(out["data"], json!([{"a": "test"}, {"a": "testkyle"}]));
}

#[tokio::test]
async fn test_descending_sort() {
    let q = json!({"from": "t", "select": "n", "sort": {"n": "desc"}});
    let compiled = compile(&query(q.clone()), &catalog(), "6.8.2", &CompileOptions::default()).unwrap();
    assert_eq!(compiled.request()["sort"], json!([{"n.~n~": "desc"}]));

    let response = hits([6, 4, 3, 2, 1].iter().map(|n| json!({"n.~n~": [n]})).collect());
    let out = run(q, response).await;
    assert_eq!(out["data"], json!([6, 4, 3, 2, 1]));
}

#[tokio::test]
async fn test_table_of_selects() {
    let response = hits(vec![json!({"a.~s~": ["x"], "n.~n~": [1]}), json!({"n.~n~": [2]})]);
    let out = run(json!({"from": "t", "select": ["a", "n", "_id"], "format": "table"}), response).await;
    assert_eq!(out["header"], json!(["a", "n", "_id"]));
    assert_eq!(out["data"], json!([["x", 1, "0"], [null, 2, "1"]]));
}

#[tokio::test]
async fn test_empty_cube() {
    let out = run(json!({"from": "t", "select": ["a", "n"], "format": "cube"}), hits(vec![])).await;
    assert_eq!(
        out["edges"],
        json!([{"name": "rownum", "domain": {"type": "rownum", "min": 0, "max": 0, "interval": 1}}])
    );
    assert_eq!(out["data"], json!({"a": [], "n": []}));
}

#[tokio::test]
async fn test_cube_columns() {
    let response = hits(vec![json!({"a.~s~": ["x"]}), json!({"a.~s~": ["y"], "n.~n~": [3]})]);
    let out = run(json!({"from": "t", "select": ["a", "n"], "format": "cube"}), response).await;
    assert_eq!(out["edges"][0]["domain"]["max"], json!(2));
    assert_eq!(out["data"], json!({"a": ["x", "y"], "n": [null, 3]}));
}

#[test]
fn test_filter_on_nested_column_from_root() {
    let q = query(json!({"from": "t", "select": "a", "where": {"eq": {"c.v": 1}}}));
    let compiled = compile(&q, &catalog(), "6.8.2", &CompileOptions::default()).unwrap();
    assert_eq!(
        compiled.request()["query"],
        json!({"nested": {"path": "c", "query": {"term": {"c.v.~n~": 1}}}})
    );
}

#[test]
fn test_limit_is_capped() {
    let q = query(json!({"from": "t", "select": "a", "limit": 1000}));
    let options = CompileOptions::default().with_max_limit(50);
    let compiled = compile(&q, &catalog(), "6.8.2", &options).unwrap();
    assert_eq!(compiled.request()["size"], json!(50));
}

#[test]
fn test_deep_query_rows_come_from_inner_hits() {
    let q = query(json!({"from": "t.c", "select": ["v", "a"]}));
    let schema = catalog().scoped_to("c").unwrap();
    let Compiled::SetOp(plan) = compile(&q, &schema, "6.8.2", &CompileOptions::default()).unwrap() else {
        panic!("expected a set operation");
    };
    let response = json!({"hits": {"total": 1, "hits": [{
        "fields": {"a.~s~": ["p"]},
        "inner_hits": {"c": {"hits": {"hits": [
            {"_nested": {"field": "c", "offset": 0}, "fields": {"c.v.~n~": [1]}},
            {"_nested": {"field": "c", "offset": 1}, "fields": {"c.v.~n~": [2]}}
        ]}}}
    }]}});
    let formatted = format_hits(&q, &plan, &response).unwrap();
    assert_eq!(formatted.data, json!([{"v": 1, "a": "p"}, {"v": 2, "a": "p"}]));
}
