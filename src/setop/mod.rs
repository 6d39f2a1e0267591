//! Set-operation compiler.
//!
//! A query with no grouping and no aggregates is a plain projection: the
//! backend returns matching documents (hits) and each select is read from
//! them. Object and `*` selects expand to their leaf columns; columns living
//! in nested documents below the query path are fetched with `inner_hits`.
//! A query over a nested path (`from: "table.nested"`) yields one row per
//! nested document.

mod format;

pub use format::format_hits;

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use crate::aggs::{split_where, CompileOptions};
use crate::error::{QueryError, QueryResult};
use crate::expr::{script_json, Expr};
use crate::query::{Query, SelectShape, SortTerm};
use crate::schema::{path, Column, JxType, Schema, ROOT};

/// Where a pulled value is written in the output row.
#[derive(Debug, Clone, PartialEq)]
pub struct Put {
    /// Top-level name of the output column.
    pub name: String,
    /// Output column position, for tables.
    pub index: usize,
    /// Dotted path below `name`; `.` for the column itself.
    pub child: String,
}

/// How a value is read from a hit.
#[derive(Debug, Clone, PartialEq)]
pub enum HitPull {
    /// A stored field of the hit, or of the nested inner hit when `inner`.
    Field { es_column: String, inner: bool },
    /// The document id.
    Id,
    /// A computed script field.
    ScriptField(String),
    /// Nested documents at `path`, rebuilt from inner hits by offset.
    /// `columns` maps each stored field to its name inside the document.
    NestedDocs {
        path: String,
        columns: Vec<(String, String)>,
    },
    /// A select with no backing column.
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HitSelect {
    pub name: String,
    pub put: Put,
    pub pull: HitPull,
}

/// Everything needed to run a set operation and format its hits.
#[derive(Debug, Clone)]
pub struct SetOpPlan {
    pub request: Value,
    pub selects: Vec<HitSelect>,
    /// Nested path rows are drawn from, when the query is over one.
    pub deep: Option<String>,
    pub limit: usize,
}

fn is_below(column: &Column, depth: &str) -> bool {
    column.depth() != depth && path::is_prefix(depth, column.depth())
}

/// Split a dotted output name into its top-level name and child path.
fn split_put(full: &str) -> (String, String) {
    match full.split_once('.') {
        Some((head, rest)) => (head.to_string(), rest.to_string()),
        None => (full.to_string(), ROOT.to_string()),
    }
}

#[derive(Default)]
struct Fields {
    stored: Vec<String>,
    inner: Vec<String>,
    nested: BTreeMap<String, Vec<String>>,
    scripts: Map<String, Value>,
}

impl Fields {
    fn add(&mut self, column: &Column, deep: bool, depth: &str) -> HitPull {
        let inner = deep && column.depth() == depth;
        let list = if inner { &mut self.inner } else { &mut self.stored };
        if !list.contains(&column.es_column) {
            list.push(column.es_column.clone());
        }
        HitPull::Field {
            es_column: column.es_column.clone(),
            inner,
        }
    }
}

/// Compile a set operation.
#[instrument(skip_all, fields(from = %query.from))]
pub fn compile_setop(query: &Query, schema: &dyn Schema, options: &CompileOptions) -> QueryResult<SetOpPlan> {
    let limit = options.limit(query.limit);
    let depth = schema.query_depth().to_string();
    let deep = depth != ROOT;
    let mut fields = Fields::default();
    let mut selects = Vec::new();

    for (put_index, select) in query.select.iter().enumerate() {
        match &select.value {
            Expr::Leaves(term) => {
                for column in schema.leaves(term) {
                    if column.jx_type == JxType::Exists || is_below(&column, &depth) {
                        continue;
                    }
                    let local = column.name_relative_to(&depth);
                    let full = path::join(&select.name, &path::relative(&local, term));
                    let (name, child) = split_put(&full);
                    selects.push(HitSelect {
                        name: name.clone(),
                        put: Put {
                            name,
                            index: put_index,
                            child,
                        },
                        pull: fields.add(&column, deep, &depth),
                    });
                }
            }
            Expr::Variable(var) if var == "_id" => selects.push(HitSelect {
                name: select.name.clone(),
                put: Put {
                    name: select.name.clone(),
                    index: put_index,
                    child: ROOT.to_string(),
                },
                pull: HitPull::Id,
            }),
            Expr::Variable(var) => {
                let columns: Vec<Column> = schema
                    .leaves(var)
                    .into_iter()
                    .filter(|c| c.jx_type != JxType::Exists && c.es_column != "_id")
                    .collect();
                let put = |child: String| Put {
                    name: select.name.clone(),
                    index: put_index,
                    child,
                };
                if columns.is_empty() {
                    selects.push(HitSelect {
                        name: select.name.clone(),
                        put: put(ROOT.to_string()),
                        pull: HitPull::Null,
                    });
                }
                let mut below: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
                for column in &columns {
                    if is_below(column, &depth) {
                        below.entry(column.depth().to_string()).or_default().push((
                            column.es_column.clone(),
                            column.name_relative_to(column.depth()),
                        ));
                        continue;
                    }
                    let child = path::relative(&column.name_relative_to(&depth), var);
                    selects.push(HitSelect {
                        name: select.name.clone(),
                        put: put(child),
                        pull: fields.add(column, deep, &depth),
                    });
                }
                for (nested_path, columns) in below {
                    let stored = fields.nested.entry(nested_path.clone()).or_default();
                    for (es_column, _) in &columns {
                        if !stored.contains(es_column) {
                            stored.push(es_column.clone());
                        }
                    }
                    selects.push(HitSelect {
                        name: select.name.clone(),
                        put: put(ROOT.to_string()),
                        pull: HitPull::NestedDocs {
                            path: nested_path,
                            columns,
                        },
                    });
                }
            }
            expr => {
                let source = expr.partial_eval().to_script(schema)?;
                fields
                    .scripts
                    .insert(select.name.clone(), json!({"script": script_json(&source)}));
                selects.push(HitSelect {
                    name: select.name.clone(),
                    put: Put {
                        name: select.name.clone(),
                        index: put_index,
                        child: ROOT.to_string(),
                    },
                    pull: HitPull::ScriptField(select.name.clone()),
                });
            }
        }
    }

    let request = build_request(query, schema, &fields, &depth, limit)?;
    debug!(request = %request, "set operation request");
    Ok(SetOpPlan {
        request,
        selects,
        deep: deep.then_some(depth),
        limit,
    })
}

fn and_all(mut filters: Vec<Value>) -> Value {
    match filters.len() {
        0 => json!({"match_all": {}}),
        1 => filters.remove(0),
        _ => json!({"bool": {"filter": filters}}),
    }
}

fn build_request(
    query: &Query,
    schema: &dyn Schema,
    fields: &Fields,
    depth: &str,
    limit: usize,
) -> QueryResult<Value> {
    let mut outer = Vec::new();
    let mut at_depth = Vec::new();
    for (nested_path, expr) in split_where(&query.where_, schema)? {
        let filter = expr.to_filter(schema)?;
        if nested_path == depth && depth != ROOT {
            at_depth.push(filter);
        } else if nested_path == ROOT {
            outer.push(filter);
        } else {
            outer.push(json!({"nested": {"path": nested_path, "query": filter}}));
        }
    }

    if depth != ROOT {
        outer.push(json!({"nested": {
            "path": depth,
            "query": and_all(at_depth),
            "inner_hits": {"size": limit, "_source": false, "stored_fields": fields.inner},
        }}));
    }

    let filter = and_all(outer);
    let es_query = if fields.nested.is_empty() {
        filter
    } else {
        let should: Vec<Value> = fields
            .nested
            .iter()
            .map(|(path, columns)| {
                json!({"nested": {
                    "path": path,
                    "query": {"match_all": {}},
                    "inner_hits": {"_source": false, "stored_fields": columns},
                }})
            })
            .collect();
        json!({"bool": {"filter": [filter], "should": should}})
    };

    let mut request = Map::new();
    request.insert("from".to_string(), json!(0));
    request.insert("query".to_string(), es_query);
    request.insert("size".to_string(), json!(limit));
    let sort = es_sort(&query.sort, schema)?;
    if !sort.is_empty() {
        request.insert("sort".to_string(), Value::Array(sort));
    }
    request.insert("stored_fields".to_string(), json!(fields.stored));
    if !fields.scripts.is_empty() {
        request.insert("script_fields".to_string(), Value::Object(fields.scripts.clone()));
    }
    Ok(Value::Object(request))
}

fn type_rank(jx_type: JxType) -> u8 {
    match jx_type {
        JxType::Boolean => 0,
        JxType::Number => 1,
        JxType::String => 2,
        _ => 3,
    }
}

/// Backend sort clauses. Columns of a multi-typed field sort by type:
/// booleans, numbers, then strings, reversed when descending.
pub fn es_sort(sort: &[SortTerm], schema: &dyn Schema) -> QueryResult<Vec<Value>> {
    let mut out = Vec::new();
    for term in sort {
        let dir = term.dir.name();
        match term.value.as_variable() {
            Some(var) => {
                let mut columns = schema.leaves(var);
                if columns.is_empty() {
                    return Err(QueryError::missing_field(var));
                }
                columns.sort_by_key(|c| type_rank(c.jx_type));
                if term.dir.sign() < 0 {
                    columns.reverse();
                }
                for column in columns {
                    out.push(json!({column.es_column: dir}));
                }
            }
            None => {
                let source = term.value.partial_eval().to_script(schema)?;
                out.push(json!({"_script": {
                    "type": "number",
                    "script": script_json(&source),
                    "order": dir,
                }}));
            }
        }
    }
    Ok(out)
}

/// Whether list output is one scalar per row.
pub(crate) fn is_scalar_select(query: &Query) -> bool {
    query.select_shape == SelectShape::Single
        && !matches!(query.select.first().map(|s| &s.value), Some(Expr::Leaves(_)))
}
