//! Output formatters.
//!
//! Rows decoded from an aggregation response become one of three shapes:
//!
//! - `list`: one object per row (groupby) or per cube cell (edges)
//! - `table`: a header plus fixed-width rows
//! - `cube`: one dense array per select, dimensioned by the edge domains
//!
//! A query with no edges returns a single value (`format: "value"`) as a
//! list, or a zero-dimensional cube.

mod matrix;

pub use matrix::{combine, coordinates, Matrix};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::aggs::AggsPlan;
use crate::decoder::Decoder;
use crate::error::QueryResult;
use crate::query::{Format, Query, SelectShape};
use crate::walker::Row;

pub const CONTENT_TYPE: &str = "application/json";

/// Seconds spent in each stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Timing {
    pub backend: f64,
    pub formatting: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meta {
    pub format: String,
    pub content_type: String,
    pub timing: Timing,
    pub es_query: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_as: Option<String>,
}

/// A formatted result before execution metadata is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Formatted {
    pub format: &'static str,
    pub header: Option<Vec<String>>,
    pub edges: Option<Vec<Value>>,
    pub data: Value,
}

impl Formatted {
    fn data(format: &'static str, data: Value) -> Self {
        Self {
            format,
            header: None,
            edges: None,
            data,
        }
    }
}

/// The complete result of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutput {
    pub meta: Meta,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edges: Option<Vec<Value>>,
    pub data: Value,
}

impl QueryOutput {
    pub fn new(formatted: Formatted, es_query: Value, timing: Timing) -> Self {
        Self {
            meta: Meta {
                format: formatted.format.to_string(),
                content_type: CONTENT_TYPE.to_string(),
                timing,
                es_query,
                saved_as: None,
            },
            header: formatted.header,
            edges: formatted.edges,
            data: formatted.data,
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Insert unless `value` is null.
pub(crate) fn put(out: &mut Map<String, Value>, name: &str, value: Value) {
    if !value.is_null() {
        out.insert(name.to_string(), value);
    }
}

/// Insert `value` at a dotted `path`, creating intermediate objects. A
/// non-object in the way is replaced.
pub(crate) fn set_path(out: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            out.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = out
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set_path(map, rest, value);
            }
        }
    }
}

/// Cells across the full cross product of the edge domains.
fn partition_dims(decoders: &[Decoder]) -> Vec<usize> {
    decoders
        .iter()
        .map(|d| d.partition_count() + usize::from(d.allow_nulls))
        .collect()
}

/// Decoder positions in the order the query wrote the edges.
fn query_order(decoders: &[Decoder]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..decoders.len()).collect();
    order.sort_by_key(|&i| decoders[i].edge_index);
    order
}

/// One matrix per select over the decoders' dimensions.
fn fill_matrices(plan: &AggsPlan, rows: &[Row<'_>]) -> QueryResult<Vec<Matrix>> {
    let dims = partition_dims(&plan.decoders);
    let mut matrices: Vec<Matrix> = plan
        .selects
        .iter()
        .map(|s| Matrix::new(dims.clone(), s.select.default.clone()))
        .collect();
    for row in rows {
        for (matrix, select) in matrices.iter_mut().zip(&plan.selects) {
            matrix.merge(&row.coord, select.value(row.node), select.select.aggregate)?;
        }
    }
    Ok(matrices)
}

fn counted(row: &Row<'_>) -> bool {
    crate::response::doc_count(row.node) > 0
}

/// Select values of counted rows in coordinate order. Rows landing on the same
/// coordinate, as overflow buckets do, are combined into one.
fn grouped_rows(plan: &AggsPlan, rows: &[Row<'_>]) -> Vec<(Vec<usize>, Vec<Value>)> {
    let mut rows: Vec<&Row<'_>> = rows.iter().filter(|r| counted(r)).collect();
    rows.sort_by(|a, b| a.coord.cmp(&b.coord));
    let mut out: Vec<(Vec<usize>, Vec<Value>)> = Vec::new();
    for row in rows {
        let values: Vec<Value> = plan.selects.iter().map(|s| s.value(row.node)).collect();
        match out.last_mut() {
            Some((coord, current)) if *coord == row.coord => {
                for ((cell, value), select) in current.iter_mut().zip(values).zip(&plan.selects) {
                    *cell = combine(select.select.aggregate, cell.take(), value);
                }
            }
            _ => out.push((row.coord.clone(), values)),
        }
    }
    out
}

/// Format decoded aggregation rows.
pub fn format_aggs(query: &Query, plan: &AggsPlan, rows: &[Row<'_>]) -> QueryResult<Formatted> {
    if plan.decoders.is_empty() {
        return format_value(query, plan, rows);
    }
    match (query.format, query.is_groupby()) {
        (Format::List, true) => list_from_rows(plan, rows),
        (Format::List, false) => list_from_cells(plan, rows),
        (Format::Table, true) => Ok(table_from_rows(plan, rows)),
        (Format::Table, false) => table_from_cells(plan, rows),
        (Format::Cube, _) => cube(plan, rows),
    }
}

/// A query without edges.
fn format_value(query: &Query, plan: &AggsPlan, rows: &[Row<'_>]) -> QueryResult<Formatted> {
    let node = rows.first().map(|r| r.node).unwrap_or(&Value::Null);
    let values: Vec<Value> = plan.selects.iter().map(|s| s.value(node)).collect();
    let names: Vec<String> = plan.selects.iter().map(|s| s.select.name.clone()).collect();
    Ok(match query.format {
        Format::List => {
            if query.select_shape == SelectShape::Single && values.len() == 1 {
                Formatted::data("value", values[0].clone())
            } else {
                let mut out = Map::new();
                for (name, value) in names.iter().zip(values) {
                    put(&mut out, name, value);
                }
                Formatted::data("value", Value::Object(out))
            }
        }
        Format::Table => {
            let (header, cells) = fold_children(&names, values);
            Formatted {
                format: "table",
                header: Some(header),
                edges: None,
                data: Value::Array(vec![Value::Array(cells)]),
            }
        }
        Format::Cube => Formatted {
            format: "cube",
            header: None,
            edges: Some(Vec::new()),
            data: Value::Object(names.into_iter().zip(values).collect()),
        },
    })
}

fn row_object(plan: &AggsPlan, coord: &[usize], selects: Vec<Value>) -> Value {
    let mut out = Map::new();
    for &i in &query_order(&plan.decoders) {
        let decoder = &plan.decoders[i];
        put(&mut out, &decoder.name, decoder.value_at(coord[i]));
    }
    for (select, value) in plan.selects.iter().zip(selects) {
        put(&mut out, &select.select.name, value);
    }
    Value::Object(out)
}

fn cell_values(matrices: &[Matrix], coord: &[usize]) -> QueryResult<Vec<Value>> {
    matrices.iter().map(|m| m.get(coord).cloned()).collect()
}

fn list_from_rows(plan: &AggsPlan, rows: &[Row<'_>]) -> QueryResult<Formatted> {
    let data = grouped_rows(plan, rows)
        .into_iter()
        .map(|(coord, values)| row_object(plan, &coord, values))
        .collect();
    Ok(Formatted::data("list", Value::Array(data)))
}

fn list_from_cells(plan: &AggsPlan, rows: &[Row<'_>]) -> QueryResult<Formatted> {
    let matrices = fill_matrices(plan, rows)?;
    let data = coordinates(&partition_dims(&plan.decoders))
        .iter()
        .map(|coord| Ok(row_object(plan, coord, cell_values(&matrices, coord)?)))
        .collect::<QueryResult<Vec<_>>>()?;
    Ok(Formatted::data("list", Value::Array(data)))
}

fn header_names(plan: &AggsPlan) -> Vec<String> {
    query_order(&plan.decoders)
        .into_iter()
        .map(|i| plan.decoders[i].name.clone())
        .collect()
}

fn table_row(plan: &AggsPlan, coord: &[usize], selects: Vec<Value>) -> (Vec<String>, Vec<Value>) {
    let mut header = header_names(plan);
    let mut cells: Vec<Value> = query_order(&plan.decoders)
        .into_iter()
        .map(|i| plan.decoders[i].value_at(coord[i]))
        .collect();
    let names: Vec<String> = plan.selects.iter().map(|s| s.select.name.clone()).collect();
    let (select_header, select_cells) = fold_children(&names, selects);
    header.extend(select_header);
    cells.extend(select_cells);
    (header, cells)
}

fn table_from_rows(plan: &AggsPlan, rows: &[Row<'_>]) -> Formatted {
    let mut header = None;
    let mut data = Vec::new();
    for (coord, values) in grouped_rows(plan, rows) {
        let (h, cells) = table_row(plan, &coord, values);
        header.get_or_insert(h);
        data.push(Value::Array(cells));
    }
    Formatted {
        format: "table",
        header: Some(header.unwrap_or_else(|| empty_header(plan))),
        edges: None,
        data: Value::Array(data),
    }
}

fn table_from_cells(plan: &AggsPlan, rows: &[Row<'_>]) -> QueryResult<Formatted> {
    let matrices = fill_matrices(plan, rows)?;
    let mut data = Vec::new();
    for coord in coordinates(&partition_dims(&plan.decoders)) {
        let values = cell_values(&matrices, &coord)?;
        data.push(Value::Array(table_row(plan, &coord, values).1));
    }
    Ok(Formatted {
        format: "table",
        header: Some(empty_header(plan)),
        edges: None,
        data: Value::Array(data),
    })
}

fn empty_header(plan: &AggsPlan) -> Vec<String> {
    let names: Vec<String> = plan.selects.iter().map(|s| s.select.name.clone()).collect();
    let mut header = header_names(plan);
    header.extend(fold_children(&names, vec![Value::Null; names.len()]).0);
    header
}

/// Fold selects named as a dotted child of another select into the parent's
/// cell. A scalar parent value moves under the `.` key.
pub(crate) fn fold_children(names: &[String], values: Vec<Value>) -> (Vec<String>, Vec<Value>) {
    let parent_of = |name: &str| {
        names
            .iter()
            .position(|p| name.len() > p.len() && name.starts_with(p.as_str()) && name[p.len()..].starts_with('.'))
    };
    let mut header = Vec::new();
    let mut cells: Vec<Value> = Vec::new();
    let mut column_of = vec![usize::MAX; names.len()];
    for (i, name) in names.iter().enumerate() {
        if parent_of(name).is_none() {
            column_of[i] = header.len();
            header.push(name.clone());
            cells.push(values[i].clone());
        }
    }
    for (i, name) in names.iter().enumerate() {
        let Some(parent) = parent_of(name) else {
            continue;
        };
        let column = column_of[parent];
        if values[i].is_null() || column == usize::MAX {
            continue;
        }
        let child = name[names[parent].len() + 1..].to_string();
        let cell = &mut cells[column];
        if let Value::Object(map) = cell {
            map.insert(child, values[i].clone());
            continue;
        }
        let mut map = Map::new();
        match cell.take() {
            Value::Null => {}
            scalar => {
                map.insert(".".to_string(), scalar);
            }
        }
        map.insert(child, values[i].clone());
        *cell = Value::Object(map);
    }
    (header, cells)
}

fn cube(plan: &AggsPlan, rows: &[Row<'_>]) -> QueryResult<Formatted> {
    let matrices = fill_matrices(plan, rows)?;
    let edges = plan.decoders.iter().map(|d| d.output_domain().to_json()).collect();
    let data = plan
        .selects
        .iter()
        .zip(&matrices)
        .map(|(s, m)| (s.select.name.clone(), m.to_json()))
        .collect();
    Ok(Formatted {
        format: "cube",
        header: None,
        edges: Some(edges),
        data: Value::Object(data),
    })
}
