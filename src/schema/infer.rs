//! Column discovery from sample documents.
//!
//! A path holding an array of objects in any document becomes a nested
//! column; a lone object at that path elsewhere is an array of one.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::{path, Column, JxType, ROOT};

/// Infer the column catalog for a set of documents.
pub fn infer_columns(docs: &[Value]) -> Vec<Column> {
    let mut nested = BTreeSet::new();
    for doc in docs {
        find_nested(ROOT, doc, &mut nested);
    }

    let mut leaves: BTreeMap<String, BTreeSet<JxType>> = BTreeMap::new();
    let mut objects = BTreeSet::new();
    for doc in docs {
        collect(ROOT, doc, &nested, &mut leaves, &mut objects);
    }

    let mut columns = Vec::new();
    for name in &nested {
        let mut column = Column::new(name, name, JxType::Nested);
        column.nested_path = nested_chain(name, &nested, true);
        columns.push(column);
    }
    for name in &objects {
        let mut column = Column::new(name, name, JxType::Object);
        column.nested_path = nested_chain(name, &nested, false);
        columns.push(column);
    }
    for (name, types) in &leaves {
        let chain = nested_chain(name, &nested, false);
        for jx_type in types {
            let es_column = if types.len() == 1 {
                name.clone()
            } else {
                format!("{}.{}", name, type_suffix(*jx_type))
            };
            let mut column = Column::new(name, &es_column, *jx_type);
            column.nested_path = chain.clone();
            columns.push(column);
        }
    }
    columns.sort_by(|a, b| (&a.name, &a.es_column).cmp(&(&b.name, &b.es_column)));
    columns
}

fn type_suffix(jx_type: JxType) -> &'static str {
    match jx_type {
        JxType::String => "~s~",
        JxType::Number => "~n~",
        JxType::Boolean => "~b~",
        JxType::Exists => "~e~",
        JxType::Object | JxType::Nested => "~o~",
    }
}

fn find_nested(at: &str, value: &Value, nested: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                find_nested(&path::join(at, k), v, nested);
            }
        }
        Value::Array(items) => {
            if at != ROOT && items.iter().any(Value::is_object) {
                nested.insert(at.to_string());
            }
            for item in items {
                find_nested(at, item, nested);
            }
        }
        _ => {}
    }
}

fn collect(
    at: &str,
    value: &Value,
    nested: &BTreeSet<String>,
    leaves: &mut BTreeMap<String, BTreeSet<JxType>>,
    objects: &mut BTreeSet<String>,
) {
    let leaf_type = match value {
        Value::Bool(_) => Some(JxType::Boolean),
        Value::Number(_) => Some(JxType::Number),
        Value::String(_) => Some(JxType::String),
        _ => None,
    };
    if let Some(jx_type) = leaf_type {
        leaves.entry(at.to_string()).or_default().insert(jx_type);
        return;
    }
    match value {
        Value::Array(items) => {
            for item in items {
                collect(at, item, nested, leaves, objects);
            }
        }
        Value::Object(map) => {
            if at != ROOT && !nested.contains(at) {
                objects.insert(at.to_string());
            }
            for (k, v) in map {
                collect(&path::join(at, k), v, nested, leaves, objects);
            }
        }
        _ => {}
    }
}

/// Nested documents enclosing `name`, innermost first, ending at the root.
fn nested_chain(name: &str, nested: &BTreeSet<String>, inclusive: bool) -> Vec<String> {
    let mut chain: Vec<String> = nested
        .iter()
        .filter(|n| path::is_prefix(n, name) && (inclusive || n.as_str() != name))
        .cloned()
        .collect();
    chain.sort_by_key(|n| std::cmp::Reverse(path::depth(n)));
    chain.push(ROOT.to_string());
    chain
}
