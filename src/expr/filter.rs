//! Expression → backend filter clause.

use serde_json::{json, Value};

use super::{script_json, CompareOp, Expr};
use crate::error::QueryResult;
use crate::schema::{Column, JxType, Schema};

const CONTAINERS: &[JxType] = &[JxType::Object, JxType::Nested];

pub(super) fn match_all() -> Value {
    json!({"match_all": {}})
}

pub(super) fn match_none() -> Value {
    json!({"bool": {"must_not": match_all()}})
}

fn any_of(mut filters: Vec<Value>) -> Value {
    match filters.len() {
        0 => match_none(),
        1 => filters.remove(0),
        _ => json!({"bool": {"should": filters, "minimum_should_match": 1}}),
    }
}

fn literal_type(value: &Value) -> Option<JxType> {
    match value {
        Value::String(_) => Some(JxType::String),
        Value::Number(_) => Some(JxType::Number),
        Value::Bool(_) => Some(JxType::Boolean),
        _ => None,
    }
}

/// Columns of `name` that can hold `value`.
fn typed_columns(schema: &dyn Schema, name: &str, value: &Value) -> Vec<Column> {
    let wanted = literal_type(value);
    schema
        .values(name, CONTAINERS)
        .into_iter()
        .filter(|c| wanted.is_none() || Some(c.jx_type) == wanted || c.jx_type == JxType::Exists)
        .collect()
}

impl Expr {
    /// Compile to a backend filter clause.
    ///
    /// Field references with no backing column match nothing rather than
    /// failing; expressions with no native filter fall back to a script.
    pub fn to_filter(&self, schema: &dyn Schema) -> QueryResult<Value> {
        let filter = match self {
            Expr::Literal(Value::Bool(true)) => match_all(),
            Expr::Literal(_) => match_none(),
            Expr::And(terms) => {
                let filters = terms
                    .iter()
                    .map(|t| t.to_filter(schema))
                    .collect::<QueryResult<Vec<_>>>()?;
                json!({"bool": {"filter": filters}})
            }
            Expr::Or(terms) => any_of(
                terms
                    .iter()
                    .map(|t| t.to_filter(schema))
                    .collect::<QueryResult<Vec<_>>>()?,
            ),
            Expr::Not(inner) => json!({"bool": {"must_not": inner.to_filter(schema)?}}),
            Expr::Exists(inner) => match inner.as_variable() {
                Some(name) => exists(schema, name),
                None => script_filter(self, schema)?,
            },
            Expr::Missing(inner) => match inner.as_variable() {
                Some(name) => json!({"bool": {"must_not": exists(schema, name)}}),
                None => script_filter(self, schema)?,
            },
            Expr::Compare { op, lhs, rhs } => match (lhs.as_ref(), rhs.as_ref()) {
                (Expr::Variable(name), Expr::Literal(value)) => {
                    compare(schema, *op, name, value)?
                }
                (Expr::Literal(value), Expr::Variable(name)) => {
                    compare(schema, flip(*op), name, value)?
                }
                _ => script_filter(self, schema)?,
            },
            Expr::Prefix { expr, prefix } => match expr.as_variable() {
                Some(name) => any_of(
                    schema
                        .values(name, CONTAINERS)
                        .into_iter()
                        .filter(|c| c.jx_type == JxType::String)
                        .map(|c| json!({"prefix": {c.es_column: prefix}}))
                        .collect(),
                ),
                None => script_filter(self, schema)?,
            },
            Expr::In { expr, values } => match expr.as_variable() {
                Some(name) => {
                    let mut filters = Vec::new();
                    for column in schema.values(name, CONTAINERS) {
                        let matching: Vec<&Value> = values
                            .iter()
                            .filter(|v| literal_type(v) == Some(column.jx_type))
                            .collect();
                        if !matching.is_empty() {
                            filters.push(json!({"terms": {column.es_column: matching}}));
                        }
                    }
                    any_of(filters)
                }
                None => script_filter(self, schema)?,
            },
            Expr::Variable(_)
            | Expr::Leaves(_)
            | Expr::Tuple(_)
            | Expr::Arith { .. }
            | Expr::Coalesce(_) => script_filter(self, schema)?,
        };
        Ok(filter)
    }
}

fn flip(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Gt => CompareOp::Lt,
        CompareOp::Gte => CompareOp::Lte,
        CompareOp::Lt => CompareOp::Gt,
        CompareOp::Lte => CompareOp::Gte,
        other => other,
    }
}

fn exists(schema: &dyn Schema, name: &str) -> Value {
    let columns = schema.leaves(name);
    any_of(
        columns
            .into_iter()
            .map(|c| json!({"exists": {"field": c.es_column}}))
            .collect(),
    )
}

fn compare(schema: &dyn Schema, op: CompareOp, name: &str, value: &Value) -> QueryResult<Value> {
    if value.is_null() {
        let missing = json!({"bool": {"must_not": exists(schema, name)}});
        return Ok(match op {
            CompareOp::Eq => missing,
            CompareOp::Ne => exists(schema, name),
            _ => match_none(),
        });
    }
    let columns = typed_columns(schema, name, value);
    let filters = columns
        .into_iter()
        .map(|c| match op {
            CompareOp::Eq => json!({"term": {c.es_column: value}}),
            CompareOp::Ne => json!({"bool": {"must_not": {"term": {c.es_column: value}}}}),
            range => json!({"range": {c.es_column: {range.name(): value}}}),
        })
        .collect();
    Ok(any_of(filters))
}

fn script_filter(expr: &Expr, schema: &dyn Schema) -> QueryResult<Value> {
    let source = expr.to_script(schema)?;
    Ok(json!({"script": {"script": script_json(&source)}}))
}
