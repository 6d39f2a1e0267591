//! Aggregation request builder.
//!
//! Turns an edges or groupby query into a backend aggregation tree plus the
//! decoders and pulls needed to read the response back:
//!
//! ```text
//! Query → sort edges → Decoders → metrics (registry) → wrap per nested path → request
//! ```
//!
//! The tree is assembled inside-out. Metrics sit innermost at the query path;
//! every nested path is then visited deepest first, stepping the
//! [`PathCursor`] to it, encoding the decoders living there, then the part of
//! the `where` clause at that depth.

pub mod pull;
mod registry;
mod script;

pub use pull::Pull;
pub use script::compare_tuple;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::decoder::{Decoder, OverflowPolicy};
use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;
use crate::query::{Domain, Edge, Format, Query, Select};
use crate::request::{AggKind, Aggs, KeyOrder};
use crate::response::{FILTER, NESTED};
use crate::schema::{path, Schema, ROOT};

use registry::{plan_select, MetricScope};

// ============================================================================
// Options
// ============================================================================

/// Buckets one aggregation may ask for when `max_limit` is not set.
pub const MAX_BUCKETS: usize = 10_000;

/// Limits and policies applied while compiling.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Rows (or partitions per discovered edge) when a query does not say.
    pub default_limit: usize,
    /// Upper bound on any requested limit.
    pub max_limit: Option<usize>,
    /// What discovered values beyond an edge's limit become.
    pub overflow: OverflowPolicy,
    /// How terms aggregations name their key when sorting.
    pub key_order: KeyOrder,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            default_limit: crate::query::DEFAULT_LIMIT,
            max_limit: None,
            overflow: OverflowPolicy::Drop,
            key_order: KeyOrder::Key,
        }
    }
}

impl CompileOptions {
    /// Render requests for a backend reporting `version`.
    pub fn with_backend_version(mut self, version: &str) -> Self {
        self.key_order = KeyOrder::for_version(version);
        self
    }

    /// Most buckets a single aggregation may produce: fixed partitions of a
    /// range domain, or the values gathered by a union.
    pub fn bucket_limit(&self) -> usize {
        self.max_limit.unwrap_or(MAX_BUCKETS)
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn with_max_limit(mut self, limit: usize) -> Self {
        self.max_limit = Some(limit);
        self
    }

    /// The limit in force for `requested`, capped by `max_limit`.
    pub fn limit(&self, requested: Option<usize>) -> usize {
        let limit = requested.unwrap_or(self.default_limit);
        match self.max_limit {
            Some(max) => limit.min(max),
            None => limit,
        }
    }
}

// ============================================================================
// Path cursor
// ============================================================================

/// The nested path the tree built so far is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCursor {
    path: String,
}

impl PathCursor {
    pub fn at(path: &str) -> Self {
        Self {
            path: path.to_string(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Re-scope `aggs` so it can be placed at `target`.
    ///
    /// Content deeper than `target` is entered with `nested`; anything else is
    /// left with `reverse_nested`, whose path is null when the cursor is the root.
    /// A no-op when already at `target`.
    pub fn remap_nested(self, aggs: Aggs, target: &str) -> (PathCursor, Aggs) {
        if self.path == target {
            return (self, aggs);
        }
        let kind = if path::is_prefix(target, &self.path) {
            AggKind::Nested {
                path: self.path.clone(),
            }
        } else {
            AggKind::ReverseNested {
                path: (self.path != ROOT).then(|| self.path.clone()),
            }
        };
        (PathCursor::at(target), aggs.wrap(NESTED, kind))
    }
}

// ============================================================================
// Plan
// ============================================================================

/// A select and how to read it from a response row.
#[derive(Debug, Clone)]
pub struct PlannedSelect {
    pub select: Select,
    pub pull: Pull,
}

impl PlannedSelect {
    /// The select's value in `node`, or its default.
    pub fn value(&self, node: &Value) -> Value {
        match self.pull.apply(node) {
            Value::Null => self.select.default.clone(),
            value => value,
        }
    }
}

/// Everything needed to run an aggregation query and decode its response.
#[derive(Debug, Clone)]
pub struct AggsPlan {
    pub request: Value,
    /// One per edge, primary sort edge first.
    pub decoders: Vec<Decoder>,
    pub selects: Vec<PlannedSelect>,
}

/// Outer-to-inner order of nested paths.
fn path_order(a: &str, b: &str) -> Ordering {
    path::depth(a).cmp(&path::depth(b)).then_with(|| a.cmp(b))
}

/// Edges in the order rows should be sorted by: sort terms first, then the
/// rest as written. Cubes keep the written order. Discovered domains of sort
/// edges take the term's direction.
pub fn sort_edges(query: &Query) -> QueryResult<Vec<(usize, Edge)>> {
    let edges = query.grouping();
    let mut ordered: Vec<(usize, Edge)> = Vec::with_capacity(edges.len());
    for term in &query.sort {
        let found = edges.iter().position(|e| {
            e.value.as_ref() == Some(&term.value) || term.value.as_variable() == Some(e.name.as_str())
        });
        let Some(index) = found else {
            return Err(QueryError::UnknownSortTarget {
                expr: term.value.to_string(),
            });
        };
        if ordered.iter().any(|(i, _)| *i == index) {
            continue;
        }
        let mut edge = edges[index].clone();
        if let Domain::Default { sort } = &mut edge.domain {
            *sort = Some(term.dir);
        }
        ordered.push((index, edge));
    }
    for (index, edge) in edges.iter().enumerate() {
        if !ordered.iter().any(|(i, _)| *i == index) {
            ordered.push((index, edge.clone()));
        }
    }
    if query.format == Format::Cube {
        ordered.sort_by_key(|(i, _)| *i);
    }
    Ok(ordered)
}

/// Nested depth of a where conjunct.
fn conjunct_depth(expr: &Expr, schema: &dyn Schema) -> QueryResult<String> {
    let depths: BTreeSet<String> = expr
        .vars()
        .iter()
        .flat_map(|v| schema.leaves(v))
        .map(|c| c.depth().to_string())
        .collect();
    let mut depths = depths.into_iter();
    match (depths.next(), depths.next()) {
        (None, _) => Ok(schema.query_depth().to_string()),
        (Some(depth), None) => Ok(depth),
        (Some(first), Some(second)) => Err(QueryError::CrossPathExpression {
            expr: expr.to_string(),
            paths: [first, second].into_iter().chain(depths).collect(),
        }),
    }
}

/// `where` conjuncts grouped by the nested path they filter.
pub(crate) fn split_where(where_: &Expr, schema: &dyn Schema) -> QueryResult<BTreeMap<String, Expr>> {
    let mut by_path: BTreeMap<String, Vec<Expr>> = BTreeMap::new();
    for conjunct in where_.partial_eval().conjuncts() {
        if conjunct.is_true() {
            continue;
        }
        by_path
            .entry(conjunct_depth(&conjunct, schema)?)
            .or_default()
            .push(conjunct);
    }
    Ok(by_path
        .into_iter()
        .map(|(path, mut terms)| {
            let expr = if terms.len() == 1 {
                terms.remove(0)
            } else {
                Expr::And(terms)
            };
            (path, expr)
        })
        .collect())
}

/// Compile an edges or groupby query.
#[instrument(skip_all, fields(from = %query.from, edges = query.grouping().len()))]
pub fn compile_aggs(query: &Query, schema: &dyn Schema, options: &CompileOptions) -> QueryResult<AggsPlan> {
    let query_limit = options.limit(query.limit);
    let mut decoders = sort_edges(query)?
        .into_iter()
        .map(|(index, edge)| {
            let limit = options.limit(Some(edge.limit.unwrap_or(query_limit)));
            Decoder::for_edge(&edge, index, schema, limit, options)
        })
        .collect::<QueryResult<Vec<_>>>()?;

    let mut metrics = Aggs::new();
    let mut selects = Vec::with_capacity(query.select.len());
    for select in &query.select {
        let pull = plan_select(
            select,
            &mut MetricScope {
                schema,
                aggs: &mut metrics,
                value_limit: options.bucket_limit(),
            },
        )?;
        selects.push(PlannedSelect {
            select: select.clone(),
            pull,
        });
    }

    // outermost first: shallow paths before deep ones, edge order within a path
    let mut order: Vec<usize> = (0..decoders.len()).collect();
    order.sort_by(|&a, &b| path_order(&decoders[a].depth, &decoders[b].depth).then(a.cmp(&b)));
    let mut starts = vec![0; decoders.len()];
    let mut next = 0;
    for &i in &order {
        starts[i] = next;
        next += decoders[i].num_columns();
    }

    let mut filters = split_where(&query.where_, schema)?;
    let mut paths: BTreeSet<&str> = decoders.iter().map(|d| d.depth.as_str()).collect();
    paths.extend(filters.keys().map(String::as_str));
    paths.insert(schema.query_depth());
    let mut paths: Vec<String> = paths.into_iter().map(str::to_string).collect();
    paths.sort_by(|a, b| path_order(b, a));

    let mut cursor = PathCursor::at(schema.query_depth());
    let mut tree = metrics;
    for path in &paths {
        (cursor, tree) = cursor.remap_nested(tree, path);
        for &i in order.iter().rev() {
            if decoders[i].depth == *path {
                tree = decoders[i].encode(tree, starts[i]);
            }
        }
        if let Some(filter) = filters.remove(path) {
            let filter = filter.partial_eval();
            if !filter.is_true() {
                tree = tree.wrap(FILTER, AggKind::Filter(filter.to_filter(schema)?));
            }
        }
    }
    let (_, tree) = cursor.remap_nested(tree, ROOT);

    let request = json!({"aggs": tree.render(options.key_order), "size": 0});
    debug!(request = %request, "aggregation request");
    Ok(AggsPlan {
        request,
        decoders,
        selects,
    })
}
