//! Aggregation request building through the public compile API.

use insta::assert_snapshot;
use serde_json::{json, Value};
use tessera::aggs::compile_aggs;
use tessera::compile::{compile, CompileOptions, Compiled, Operation};
use tessera::query::Query;
use tessera::schema::{Catalog, Column, JxType};
use tessera::QueryError;

fn catalog() -> Catalog {
    Catalog::new(
        "t",
        vec![
            Column::new("a", "a", JxType::String),
            Column::new("b", "b", JxType::Number),
            Column::new("c", "c", JxType::Nested).nested_in(&["c"]),
            Column::new("c.v", "c.v", JxType::Number).nested_in(&["c"]),
            Column::new("c.w", "c.w", JxType::String).nested_in(&["c"]),
        ],
    )
}

fn query(json: Value) -> Query {
    Query::from_json(&json).unwrap()
}

fn request(json: Value) -> Value {
    match compile(&query(json), &catalog(), "6.8.2", &CompileOptions::default()).unwrap() {
        Compiled::Aggs(plan) => plan.request,
        Compiled::SetOp(_) => panic!("expected an aggregation"),
    }
}

fn compile_error(json: Value) -> QueryError {
    compile(&query(json), &catalog(), "6.8.2", &CompileOptions::default()).unwrap_err()
}

// ============================================================================
// Request shape
// ============================================================================

#[test]
fn test_groupby_counts_each_value_and_the_missing() {
    let request = request(json!({"from": "t", "groupby": "a"}));
    assert_snapshot!(
        request.to_string(),
        @r#"{"aggs":{"_match":{"terms":{"field":"a","size":10}},"_missing":{"missing":{"field":"a"}}},"size":0}"#
    );
}

#[test]
fn test_sorted_edge_is_outermost() {
    let request = request(json!({
        "from": "t",
        "groupby": ["a", "b"],
        "sort": [{"value": "b", "sort": "desc"}, "a"]
    }));
    let outer = &request["aggs"]["_match"];
    assert_eq!(outer["terms"]["field"], json!("b"));
    assert_eq!(outer["aggs"]["_match"]["terms"]["field"], json!("a"));
    assert_eq!(request["aggs"]["_missing"]["aggs"]["_missing"], json!({"missing": {"field": "a"}}));
}

#[test]
fn test_cube_keeps_edge_order() {
    let request = request(json!({
        "from": "t",
        "groupby": ["a", "b"],
        "sort": {"b": "desc"},
        "format": "cube"
    }));
    assert_eq!(request["aggs"]["_match"]["terms"]["field"], json!("a"));
}

#[test]
fn test_metrics_sit_under_every_bucket() {
    let request = request(json!({
        "from": "t",
        "groupby": "a",
        "select": [{"value": "b", "aggregate": "max"}]
    }));
    let under_match = &request["aggs"]["_match"]["aggs"];
    let under_missing = &request["aggs"]["_missing"]["aggs"];
    assert_eq!(under_match, under_missing);
    assert!(under_match.as_object().unwrap().values().any(|agg| agg.get("extended_stats").is_some()));
}

#[test]
fn test_nested_edge_enters_and_leaves_nested_scope() {
    let request = request(json!({"from": "t", "groupby": "c.w"}));
    let nested = &request["aggs"]["_nested"];
    assert_eq!(nested["nested"], json!({"path": "c"}));
    let terms = &nested["aggs"]["_match"];
    assert_eq!(terms["terms"]["field"], json!("c.w"));
    assert_eq!(terms["aggs"]["_nested"], json!({"reverse_nested": {"path": null}}));
}

#[test]
fn test_nested_filter_applies_inside_nested_scope() {
    let request = request(json!({
        "from": "t",
        "groupby": "a",
        "where": {"eq": {"c.w": "x"}}
    }));
    let terms = &request["aggs"]["_match"];
    let nested = &terms["aggs"]["_nested"];
    assert_eq!(nested["nested"], json!({"path": "c"}));
    assert_eq!(nested["aggs"]["_filter"]["filter"], json!({"term": {"c.w": "x"}}));
}

#[test]
fn test_limits_come_from_options() {
    let q = query(json!({"from": "t", "groupby": "a", "limit": 500}));
    let options = CompileOptions::default().with_max_limit(100);
    let plan = compile_aggs(&q, &catalog(), &options).unwrap();
    assert_eq!(plan.request["aggs"]["_match"]["terms"]["size"], json!(100));
}

#[test]
fn test_sorted_terms_order_per_backend_generation() {
    let q = query(json!({"from": "t", "groupby": "a", "sort": {"a": "desc"}}));
    for (version, expected) in [
        ("1.7.5", json!({"_term": "desc"})),
        ("5.6.16", json!({"_term": "desc"})),
        ("6.8.2", json!({"_key": "desc"})),
        ("7.10.2", json!({"_key": "desc"})),
    ] {
        let compiled = compile(&q, &catalog(), version, &CompileOptions::default()).unwrap();
        assert_eq!(compiled.request()["aggs"]["_match"]["terms"]["order"], expected, "{}", version);
    }
}

#[test]
fn test_aggregate_select_without_edges_is_an_aggregation() {
    let q = query(json!({"from": "t", "select": {"value": "b", "aggregate": "sum"}}));
    let compiled = compile(&q, &catalog(), "7.10.2", &CompileOptions::default()).unwrap();
    assert_eq!(compiled.operation(), Operation::Aggregation);
    assert_eq!(compiled.request()["size"], json!(0));
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_sort_must_name_an_edge() {
    let err = compile_error(json!({"from": "t", "groupby": "a", "sort": "b"}));
    assert!(matches!(err, QueryError::UnknownSortTarget { .. }));
}

#[test]
fn test_edge_across_depths_is_rejected() {
    let err = compile_error(json!({
        "from": "t",
        "edges": [{"name": "x", "value": {"add": ["b", "c.v"]}}]
    }));
    match err {
        QueryError::CrossPathExpression { paths, .. } => {
            assert_eq!(paths, vec![".".to_string(), "c".to_string()]);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_unknown_field_fails_before_any_request() {
    let err = compile_error(json!({"from": "t", "groupby": "nope"}));
    assert!(matches!(err, QueryError::SchemaResolution { .. }));
}

#[test]
fn test_unknown_aggregate() {
    let err = Query::from_json(&json!({"from": "t", "select": {"value": "b", "aggregate": "mode"}})).unwrap_err();
    assert!(matches!(err, QueryError::UnsupportedAggregate { .. }));
}
