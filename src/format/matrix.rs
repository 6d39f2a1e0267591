//! Dense n-dimensional array of JSON cells.

use std::cmp::Ordering;

use serde_json::Value;

use crate::aggs::pull::{merge_counts, union_of};
use crate::error::{QueryError, QueryResult};
use crate::expr::number_value;
use crate::query::Aggregate;

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    dims: Vec<usize>,
    cells: Vec<Value>,
    written: Vec<bool>,
}

impl Matrix {
    /// A matrix with every cell set to `fill`. Zero dimensions hold one cell.
    pub fn new(dims: Vec<usize>, fill: Value) -> Self {
        let size = dims.iter().product();
        Self {
            dims,
            cells: vec![fill; size],
            written: vec![false; size],
        }
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    fn offset(&self, coord: &[usize]) -> QueryResult<usize> {
        if coord.len() != self.dims.len() || coord.iter().zip(&self.dims).any(|(c, d)| c >= d) {
            return Err(QueryError::Formatting {
                row: format!("{:?}", coord),
                message: format!("coordinate outside of cube with dimensions {:?}", self.dims),
            });
        }
        Ok(coord
            .iter()
            .zip(&self.dims)
            .fold(0, |offset, (c, d)| offset * d + c))
    }

    pub fn get(&self, coord: &[usize]) -> QueryResult<&Value> {
        Ok(&self.cells[self.offset(coord)?])
    }

    /// Write a cell. A cell written twice holds both values combined as
    /// `aggregate` dictates.
    pub fn merge(&mut self, coord: &[usize], value: Value, aggregate: Aggregate) -> QueryResult<()> {
        let offset = self.offset(coord)?;
        if !self.written[offset] {
            self.written[offset] = true;
            self.cells[offset] = value;
        } else {
            let current = self.cells[offset].take();
            self.cells[offset] = combine(aggregate, current, value);
        }
        Ok(())
    }

    /// Nested arrays, outermost dimension first.
    pub fn to_json(&self) -> Value {
        if self.dims.is_empty() {
            return self.cells.first().cloned().unwrap_or(Value::Null);
        }
        nest(&self.dims, &self.cells)
    }
}

/// Combine two results of `aggregate` taken over disjoint sets of documents.
/// Aggregates that cannot be rebuilt from partial results give null.
pub fn combine(aggregate: Aggregate, current: Value, value: Value) -> Value {
    if current.is_null() {
        return value;
    }
    if value.is_null() {
        return current;
    }
    match aggregate {
        a if a.is_additive() => number_value(current.as_f64().unwrap_or(0.0) + value.as_f64().unwrap_or(0.0)),
        Aggregate::Min | Aggregate::Max => {
            let wanted = if aggregate == Aggregate::Min { Ordering::Less } else { Ordering::Greater };
            match compare(&current, &value) {
                Some(ordering) if ordering == wanted => current,
                Some(Ordering::Equal) => current,
                Some(_) => value,
                None => Value::Null,
            }
        }
        Aggregate::None => current,
        Aggregate::Union => union_of([current, value]),
        Aggregate::CountValues => merge_counts([current, value]),
        _ => Value::Null,
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}

fn nest(dims: &[usize], cells: &[Value]) -> Value {
    match dims {
        [] | [_] => Value::Array(cells.to_vec()),
        [_, rest @ ..] => {
            let stride: usize = rest.iter().product();
            if stride == 0 {
                return Value::Array(vec![Value::Array(Vec::new()); dims[0]]);
            }
            Value::Array(cells.chunks(stride).map(|chunk| nest(rest, chunk)).collect())
        }
    }
}

/// Every coordinate of a cube with `dims`, in row-major order.
pub fn coordinates(dims: &[usize]) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::with_capacity(dims.len())];
    for &size in dims {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..size).map(move |i| {
                    let mut coord = prefix.clone();
                    coord.push(i);
                    coord
                })
            })
            .collect();
    }
    out
}
