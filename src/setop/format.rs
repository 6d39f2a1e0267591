//! Hit formatters.

use serde_json::{json, Map, Value};

use super::{is_scalar_select, HitPull, HitSelect, SetOpPlan};
use crate::error::{QueryError, QueryResult};
use crate::format::{set_path, Formatted};
use crate::query::{Format, Query};
use crate::schema::ROOT;

/// A hit, and for queries over a nested path, one of its nested documents.
#[derive(Debug, Clone, Copy)]
struct HitRow<'a> {
    hit: &'a Value,
    inner: Option<&'a Value>,
}

fn hits_of(node: &Value) -> &[Value] {
    node.get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn hit_rows<'a>(response: &'a Value, plan: &SetOpPlan) -> QueryResult<Vec<HitRow<'a>>> {
    if response.get("hits").is_none() {
        return Err(QueryError::formatting(response, "response has no hits"));
    }
    let hits = hits_of(response);
    let rows = match &plan.deep {
        None => hits.iter().map(|hit| HitRow { hit, inner: None }).collect(),
        Some(nested_path) => hits
            .iter()
            .flat_map(|hit| {
                let inner = hit
                    .get("inner_hits")
                    .and_then(|h| h.get(nested_path.as_str()))
                    .map(hits_of)
                    .unwrap_or(&[]);
                inner.iter().map(move |doc| HitRow {
                    hit,
                    inner: Some(doc),
                })
            })
            .take(plan.limit)
            .collect(),
    };
    Ok(rows)
}

/// Single-element lists are the value itself.
fn unwrap_list(value: Option<&Value>) -> Value {
    match value {
        None => Value::Null,
        Some(Value::Array(items)) => match items.as_slice() {
            [] => Value::Null,
            [one] => one.clone(),
            _ => Value::Array(items.clone()),
        },
        Some(other) => other.clone(),
    }
}

fn field(doc: Option<&Value>, name: &str) -> Value {
    unwrap_list(doc.and_then(|d| d.get("fields")).and_then(|f| f.get(name)))
}

/// Rebuild nested documents from inner hits, placing each at its offset.
fn nested_docs(hit: &Value, nested_path: &str, columns: &[(String, String)]) -> Value {
    let inner = hit
        .get("inner_hits")
        .and_then(|h| h.get(nested_path))
        .map(hits_of)
        .unwrap_or(&[]);
    let mut docs: Vec<Value> = Vec::new();
    for doc in inner {
        let offset = doc
            .get("_nested")
            .and_then(|n| n.get("offset"))
            .and_then(Value::as_u64)
            .map(|o| o as usize)
            .unwrap_or(docs.len());
        let mut obj = Map::new();
        for (es_column, name) in columns {
            let value = field(Some(doc), es_column);
            if !value.is_null() {
                set_path(&mut obj, name, value);
            }
        }
        if docs.len() <= offset {
            docs.resize(offset + 1, Value::Null);
        }
        docs[offset] = Value::Object(obj);
    }
    if docs.is_empty() {
        Value::Null
    } else {
        Value::Array(docs)
    }
}

fn pull(select: &HitSelect, row: HitRow<'_>) -> Value {
    match &select.pull {
        HitPull::Field { es_column, inner } => {
            let doc = if *inner { row.inner } else { Some(row.hit) };
            field(doc, es_column)
        }
        HitPull::Id => row.hit.get("_id").cloned().unwrap_or(Value::Null),
        HitPull::ScriptField(name) => field(Some(row.hit), name),
        HitPull::NestedDocs { path, columns } => nested_docs(row.hit, path, columns),
        HitPull::Null => Value::Null,
    }
}

/// Write `value` into `cell` at `child`.
fn put_child(cell: &mut Value, child: &str, value: Value) {
    if child == ROOT {
        *cell = value;
        return;
    }
    if !cell.is_object() {
        *cell = Value::Object(Map::new());
    }
    if let Value::Object(map) = cell {
        set_path(map, child, value);
    }
}

/// Format the hits of a set-operation response.
pub fn format_hits(query: &Query, plan: &SetOpPlan, response: &Value) -> QueryResult<Formatted> {
    let rows = hit_rows(response, plan)?;
    Ok(match query.format {
        Format::List => list(query, plan, &rows),
        Format::Table => table(query, plan, &rows),
        Format::Cube => cube(query, plan, &rows),
    })
}

fn list(query: &Query, plan: &SetOpPlan, rows: &[HitRow<'_>]) -> Formatted {
    let scalar = is_scalar_select(query);
    let data = rows
        .iter()
        .map(|&row| {
            let mut out = Value::Null;
            for select in &plan.selects {
                let value = pull(select, row);
                if value.is_null() {
                    continue;
                }
                if scalar {
                    put_child(&mut out, &select.put.child, value);
                } else {
                    if !out.is_object() {
                        out = Value::Object(Map::new());
                    }
                    if let Value::Object(map) = &mut out {
                        let cell = map.entry(select.put.name.clone()).or_insert(Value::Null);
                        put_child(cell, &select.put.child, value);
                    }
                }
            }
            out
        })
        .collect();
    Formatted {
        format: "list",
        header: None,
        edges: None,
        data: Value::Array(data),
    }
}

fn header(query: &Query, plan: &SetOpPlan) -> Vec<String> {
    let width = plan.selects.iter().map(|s| s.put.index + 1).max().unwrap_or(0);
    let mut header: Vec<Option<String>> = vec![None; width];
    let scalar = is_scalar_select(query);
    for select in &plan.selects {
        let slot = &mut header[select.put.index];
        if scalar {
            *slot = Some(select.name.clone());
        } else if slot.is_none() {
            let name = match select.name.split_once('.') {
                _ if select.name == ROOT => ROOT,
                Some((head, _)) => head,
                None => select.name.as_str(),
            };
            *slot = Some(name.to_string());
        }
    }
    header.into_iter().map(Option::unwrap_or_default).collect()
}

fn table_rows(plan: &SetOpPlan, rows: &[HitRow<'_>], width: usize) -> Vec<Vec<Value>> {
    rows.iter()
        .map(|&row| {
            let mut cells = vec![Value::Null; width];
            for select in &plan.selects {
                let value = pull(select, row);
                if !value.is_null() {
                    put_child(&mut cells[select.put.index], &select.put.child, value);
                }
            }
            cells
        })
        .collect()
}

fn table(query: &Query, plan: &SetOpPlan, rows: &[HitRow<'_>]) -> Formatted {
    let header = header(query, plan);
    let data = table_rows(plan, rows, header.len())
        .into_iter()
        .map(Value::Array)
        .collect();
    Formatted {
        format: "table",
        header: Some(header),
        edges: None,
        data: Value::Array(data),
    }
}

/// Columns of the table, indexed by a synthetic `rownum` edge.
fn cube(query: &Query, plan: &SetOpPlan, rows: &[HitRow<'_>]) -> Formatted {
    let header = header(query, plan);
    let table = table_rows(plan, rows, header.len());
    let rownum = json!({
        "name": "rownum",
        "domain": {"type": "rownum", "min": 0, "max": table.len(), "interval": 1}
    });
    let data = header
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let column = table.iter().map(|row| row[i].clone()).collect();
            (name.clone(), Value::Array(column))
        })
        .collect();
    Formatted {
        format: "cube",
        header: None,
        edges: Some(vec![rownum]),
        data: Value::Object(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggs::CompileOptions;
    use crate::query::{Query, Select};
    use crate::schema::{Catalog, Column, JxType};
    use crate::setop::compile_setop;

    fn schema() -> Catalog {
        Catalog::new(
            "t",
            vec![
                Column::new("a", "a.~n~", JxType::Number),
                Column::new("o.x", "o.x", JxType::Number),
                Column::new("o.y", "o.y", JxType::String),
                Column::new("c", "c", JxType::Nested).nested_in(&["c"]),
                Column::new("c.v", "c.v", JxType::Number).nested_in(&["c"]),
            ],
        )
    }

    fn hits(docs: Vec<Value>) -> Value {
        json!({"hits": {"total": docs.len(), "hits": docs}})
    }

    #[test]
    fn test_single_select_is_scalar_list() {
        let q = Query::from_json(&json!({"from": "t", "select": "a"})).unwrap();
        let plan = compile_setop(&q, &schema(), &CompileOptions::default()).unwrap();
        let response = hits(vec![
            json!({"_id": "1", "fields": {"a.~n~": [3]}}),
            json!({"_id": "2"}),
        ]);
        let out = format_hits(&q, &plan, &response).unwrap();
        assert_eq!(out.data, json!([3, null]));
    }

    #[test]
    fn test_list_of_selects_builds_objects() {
        let q = Query::from_json(&json!({"from": "t", "select": ["a", "o", "_id"]})).unwrap();
        let plan = compile_setop(&q, &schema(), &CompileOptions::default()).unwrap();
        let response = hits(vec![
            json!({"_id": "1", "fields": {"a.~n~": [3], "o.x": [1], "o.y": ["y"]}}),
            json!({"_id": "2", "fields": {}}),
        ]);
        let out = format_hits(&q, &plan, &response).unwrap();
        assert_eq!(out.data[0], json!({"a": 3, "o": {"x": 1, "y": "y"}, "_id": "1"}));
        assert_eq!(out.data[1], json!({"_id": "2"}));
    }

    #[test]
    fn test_table_header_and_cells() {
        let q = Query::from_json(&json!({"from": "t", "select": ["a", "o"], "format": "table"})).unwrap();
        let plan = compile_setop(&q, &schema(), &CompileOptions::default()).unwrap();
        let response = hits(vec![json!({"fields": {"o.x": [1]}})]);
        let out = format_hits(&q, &plan, &response).unwrap();
        assert_eq!(out.header, Some(vec!["a".to_string(), "o".to_string()]));
        assert_eq!(out.data, json!([[null, {"x": 1}]]));
    }

    #[test]
    fn test_empty_cube() {
        let q = Query::from_json(&json!({"from": "t", "select": ["a"], "format": "cube"})).unwrap();
        let plan = compile_setop(&q, &schema(), &CompileOptions::default()).unwrap();
        let out = format_hits(&q, &plan, &hits(vec![])).unwrap();
        assert_eq!(
            out.edges,
            Some(vec![json!({
                "name": "rownum",
                "domain": {"type": "rownum", "min": 0, "max": 0, "interval": 1}
            })])
        );
        assert_eq!(out.data, json!({"a": []}));
    }

    #[test]
    fn test_nested_docs_placed_by_offset() {
        let q = Query::from_json(&json!({"from": "t", "select": ["c"]})).unwrap();
        let plan = compile_setop(&q, &schema(), &CompileOptions::default()).unwrap();
        let response = hits(vec![json!({
            "inner_hits": {"c": {"hits": {"hits": [
                {"_nested": {"field": "c", "offset": 1}, "fields": {"c.v": [7]}},
                {"_nested": {"field": "c", "offset": 0}, "fields": {"c.v": [5]}},
            ]}}}
        })]);
        let out = format_hits(&q, &plan, &response).unwrap();
        assert_eq!(out.data, json!([{"c": [{"v": 5}, {"v": 7}]}]));
    }

    #[test]
    fn test_deep_rows_one_per_nested_doc() {
        let q = Query::from_json(&json!({"from": "t.c", "select": ["v", "a"]})).unwrap();
        let schema = schema().scoped_to("c").unwrap();
        let plan = compile_setop(&q, &schema, &CompileOptions::default()).unwrap();
        let response = hits(vec![json!({
            "fields": {"a.~n~": [1]},
            "inner_hits": {"c": {"hits": {"hits": [
                {"fields": {"c.v": [5]}},
                {"fields": {"c.v": [7]}},
            ]}}}
        })]);
        let out = format_hits(&q, &plan, &response).unwrap();
        assert_eq!(out.data, json!([{"v": 5, "a": 1}, {"v": 7, "a": 1}]));
    }

    #[test]
    fn test_missing_hits_is_a_formatting_error() {
        let q = Query::from_json(&json!({"from": "t", "select": "a"})).unwrap();
        let plan = compile_setop(&q, &schema(), &CompileOptions::default()).unwrap();
        let err = format_hits(&q, &plan, &json!({"error": "x"})).unwrap_err();
        assert!(matches!(err, QueryError::Formatting { .. }));
    }

    #[test]
    fn test_select_with_no_column_is_null() {
        let mut q = Query::over("t");
        q.select = vec![Select::field("nothing")];
        let plan = compile_setop(&q, &schema(), &CompileOptions::default()).unwrap();
        let out = format_hits(&q, &plan, &hits(vec![json!({"_id": "1"})])).unwrap();
        assert_eq!(out.data, json!([null]));
    }
}
