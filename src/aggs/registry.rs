//! Select strategies, keyed by aggregate.
//!
//! Each strategy adds the metric aggregations a select needs to the tree at
//! the query path and returns the [`Pull`] that reads the result back.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use super::pull::{path, Pull};
use super::script;
use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;
use crate::query::{Aggregate, Select};
use crate::request::{AggKind, AggNode, Aggs, Source};
use crate::response::NESTED;
use crate::schema::{self, Column, JxType, Schema, ROOT};

const CONTAINERS: &[JxType] = &[JxType::Object, JxType::Nested];

/// Where metrics are being added.
pub(crate) struct MetricScope<'a> {
    pub schema: &'a dyn Schema,
    pub aggs: &'a mut Aggs,
    /// Distinct values a union or count_values may gather.
    pub value_limit: usize,
}

impl MetricScope<'_> {
    fn query_depth(&self) -> String {
        self.schema.query_depth().to_string()
    }

    /// Add `kind` as `name`, stepping into or out of nested documents when
    /// `depth` differs from the query path. Returns the key path to the
    /// metric's result.
    fn place(&mut self, name: &str, kind: AggKind, depth: &str) -> Vec<String> {
        let query_depth = self.query_depth();
        if depth == query_depth {
            self.aggs.insert_leaf(name, kind);
            return path(&[name]);
        }
        let step = if schema::path::is_prefix(&query_depth, depth) {
            AggKind::Nested {
                path: depth.to_string(),
            }
        } else {
            AggKind::ReverseNested {
                path: (depth != ROOT).then(|| depth.to_string()),
            }
        };
        let mut inner = Aggs::new();
        inner.insert_leaf(NESTED, kind);
        self.aggs.insert(name, AggNode { kind: step, aggs: inner });
        path(&[name, NESTED])
    }
}

fn extend(mut keys: Vec<String>, more: &[&str]) -> Vec<String> {
    keys.extend(more.iter().map(|k| k.to_string()));
    keys
}

/// Percent with the float noise of `p * 100` rounded away.
fn percent_of(select: &Select) -> QueryResult<f64> {
    let p = select.percentile.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&p) {
        return Err(QueryError::unsupported(
            select.aggregate.name(),
            format!("with percentile {}, expecting a value between 0.0 and 1.0", p),
        ));
    }
    Ok((p * 100.0 * 1e6).round() / 1e6)
}

/// Combine per-column pulls.
fn combine(mut pulls: Vec<Pull>, empty: Value, many: impl FnOnce(Vec<Pull>) -> Pull) -> Pull {
    match pulls.len() {
        0 => Pull::Constant(empty),
        1 => pulls.remove(0),
        _ => many(pulls),
    }
}

fn single_column<'c>(select: &Select, columns: &'c [Column]) -> QueryResult<Option<&'c Column>> {
    match columns {
        [] => Ok(None),
        [column] => Ok(Some(column)),
        _ => Err(QueryError::unsupported(
            select.aggregate.name(),
            format!("over {} with more than one column type", select.value),
        )),
    }
}

/// Plan one select of an aggregation query.
pub(crate) fn plan_select(select: &Select, scope: &mut MetricScope<'_>) -> QueryResult<Pull> {
    if select.aggregate == Aggregate::None {
        return Err(QueryError::unsupported(
            "none",
            format!("for select {} of an aggregation query", select.name),
        ));
    }
    if matches!(select.aggregate, Aggregate::Median | Aggregate::Percentile) {
        percent_of(select)?;
    }
    if select.is_count_of_root() {
        return Ok(count_documents(scope.schema));
    }
    match &select.value {
        Expr::Variable(name) => plan_variable(select, name, scope),
        Expr::Leaves(name) => Err(QueryError::unsupported(
            select.aggregate.name(),
            format!("over all leaves of {}", name),
        )),
        _ => plan_formula(select, scope),
    }
}

fn count_documents(schema: &dyn Schema) -> Pull {
    if schema.query_depth() == ROOT {
        Pull::Path(path(&["doc_count"]))
    } else {
        Pull::Coalesce(vec![
            Pull::Path(path(&[NESTED, "doc_count"])),
            Pull::Path(path(&["doc_count"])),
            Pull::Constant(json!(0)),
        ])
    }
}

fn plan_variable(select: &Select, name: &str, scope: &mut MetricScope<'_>) -> QueryResult<Pull> {
    let columns = scope.schema.values(name, CONTAINERS);
    let default = select.default.clone();

    let pull = match select.aggregate {
        Aggregate::Count => {
            let mut pulls = Vec::new();
            for column in &columns {
                let cn = format!("{}_count", column.es_column);
                let keys = if column.jx_type == JxType::Exists {
                    let filter = json!({"range": {column.es_column.as_str(): {"gt": 0}}});
                    extend(scope.place(&cn, AggKind::Filter(filter), column.depth()), &["doc_count"])
                } else {
                    let kind = AggKind::ValueCount(Source::Field(column.es_column.clone()));
                    extend(scope.place(&cn, kind, column.depth()), &["value"])
                };
                pulls.push(Pull::Path(keys));
            }
            combine(pulls, default, Pull::Sum)
        }
        Aggregate::Median | Aggregate::Percentile => {
            let Some(column) = single_column(select, &columns)? else {
                return Ok(Pull::Constant(default));
            };
            let percent = percent_of(select)?;
            let key = format!("{} percentile", name);
            let source = Source::Field(column.es_column.clone());
            let keys = if column.depth() == scope.query_depth() {
                scope.aggs.add_percentile(&key, source, percent);
                path(&[&key])
            } else {
                let kind = AggKind::Percentiles {
                    source,
                    percents: vec![percent],
                };
                scope.place(&key, kind, column.depth())
            };
            Pull::Percentile {
                path: keys,
                percent,
            }
        }
        Aggregate::Cardinality => {
            let mut pulls = Vec::new();
            for column in &columns {
                let cn = format!("{}_cardinality", column.es_column);
                let kind = AggKind::Cardinality(Source::Field(column.es_column.clone()));
                pulls.push(Pull::Path(extend(scope.place(&cn, kind, column.depth()), &["value"])));
            }
            match pulls.len() {
                0 | 1 => combine(pulls, default, Pull::Sum),
                _ => Pull::Coalesce(vec![Pull::Sum(pulls), Pull::Constant(json!(0))]),
            }
        }
        Aggregate::Stats => {
            let Some(column) = single_column(select, &columns)? else {
                return Ok(Pull::Constant(default));
            };
            let source = Source::Field(column.es_column.clone());
            let stats = scope.place(name, AggKind::ExtendedStats(source.clone()), column.depth());
            let median = scope.place(
                &format!("{}_percentile", name),
                AggKind::Percentiles {
                    source,
                    percents: vec![50.0],
                },
                column.depth(),
            );
            Pull::Stats { stats, median }
        }
        Aggregate::Union => {
            let pulls = columns
                .iter()
                .map(|c| {
                    let kind = AggKind::ScriptedMetric(script::union_of(&c.es_column));
                    Pull::Path(extend(scope.place(&c.es_column, kind, c.depth()), &["value"]))
                })
                .collect();
            combine(pulls, default, Pull::Union)
        }
        Aggregate::CountValues => {
            let pulls = columns
                .iter()
                .map(|c| {
                    let kind = AggKind::ScriptedMetric(script::count_values_of(&c.es_column));
                    Pull::Path(extend(scope.place(&c.es_column, kind, c.depth()), &["value"]))
                })
                .collect();
            combine(pulls, default, Pull::MergeCounts)
        }
        Aggregate::Sum
        | Aggregate::Min
        | Aggregate::Max
        | Aggregate::Avg
        | Aggregate::Std
        | Aggregate::Var
        | Aggregate::SumOfSquares => {
            let field = select.aggregate.stats_field().unwrap_or("value");
            let query_depth = scope.query_depth();
            let pulls = columns
                .iter()
                .map(|c| {
                    let stats_name = if c.depth() == query_depth {
                        name.to_string()
                    } else {
                        format!("{}.{}", c.depth(), name)
                    };
                    let kind = AggKind::ExtendedStats(Source::Field(c.es_column.clone()));
                    let keys = extend(scope.place(&stats_name, kind, c.depth()), &[field]);
                    Pull::Coalesce(vec![Pull::Path(keys), Pull::Constant(default.clone())])
                })
                .collect();
            combine(pulls, default, Pull::Sum)
        }
        Aggregate::None => {
            return Err(QueryError::unsupported("none", format!("for select {}", select.name)))
        }
    };
    Ok(pull)
}

/// The nested depth every variable of `expr` lives at.
fn formula_depth(expr: &Expr, schema: &dyn Schema) -> QueryResult<String> {
    let depths: BTreeSet<String> = expr
        .vars()
        .iter()
        .flat_map(|v| schema.leaves(v))
        .map(|c| c.depth().to_string())
        .collect();
    match depths.len() {
        0 => Ok(schema.query_depth().to_string()),
        1 => Ok(depths
            .into_iter()
            .next()
            .unwrap_or_else(|| schema.query_depth().to_string())),
        _ => Err(QueryError::CrossPathExpression {
            expr: expr.to_string(),
            paths: depths.into_iter().collect(),
        }),
    }
}

fn plan_formula(select: &Select, scope: &mut MetricScope<'_>) -> QueryResult<Pull> {
    let depth = formula_depth(&select.value, scope.schema)?;
    let value = select.value.partial_eval();
    let name = select.name.as_str();

    if let Expr::Tuple(terms) = &value {
        return match select.aggregate {
            Aggregate::Count => Ok(Pull::Path(path(&["doc_count"]))),
            Aggregate::Min | Aggregate::Max => {
                let dir = if select.aggregate == Aggregate::Max { 1 } else { -1 };
                let nulls = Expr::Tuple(vec![Expr::null(); terms.len()]).to_script(scope.schema)?;
                let tuple = value.to_script(scope.schema)?;
                let kind = AggKind::ScriptedMetric(script::best_tuple(&tuple, &nulls, dir));
                Ok(Pull::Path(extend(scope.place(name, kind, &depth), &["value"])))
            }
            other => Err(QueryError::unsupported(other.name(), "over a tuple")),
        };
    }

    let source = Source::Script(value.to_script(scope.schema)?);
    let pull = match select.aggregate {
        Aggregate::Count => {
            let keys = scope.place(name, AggKind::ValueCount(source), &depth);
            Pull::Path(extend(keys, &["value"]))
        }
        Aggregate::Median | Aggregate::Percentile => {
            let percent = percent_of(select)?;
            let kind = AggKind::Percentiles {
                source,
                percents: vec![percent],
            };
            Pull::Percentile {
                path: scope.place(&format!("{} percentile", name), kind, &depth),
                percent,
            }
        }
        Aggregate::Cardinality => {
            let keys = scope.place(&format!("{} cardinality", name), AggKind::Cardinality(source), &depth);
            Pull::Path(extend(keys, &["value"]))
        }
        Aggregate::Stats => {
            let stats = scope.place(name, AggKind::ExtendedStats(source.clone()), &depth);
            let median = scope.place(
                &format!("{} percentile", name),
                AggKind::Percentiles {
                    source,
                    percents: vec![50.0],
                },
                &depth,
            );
            Pull::Stats { stats, median }
        }
        Aggregate::Union | Aggregate::CountValues => {
            let kind = AggKind::Terms {
                source,
                size: Some(scope.value_limit),
                include: None,
                order: None,
            };
            let keys = scope.place(name, kind, &depth);
            if select.aggregate == Aggregate::Union {
                Pull::BucketKeys(keys)
            } else {
                Pull::BucketCounts(keys)
            }
        }
        Aggregate::Sum
        | Aggregate::Min
        | Aggregate::Max
        | Aggregate::Avg
        | Aggregate::Std
        | Aggregate::Var
        | Aggregate::SumOfSquares => {
            let field = select.aggregate.stats_field().unwrap_or("value");
            let keys = scope.place(name, AggKind::ExtendedStats(source), &depth);
            Pull::Coalesce(vec![
                Pull::Path(extend(keys, &[field])),
                Pull::Constant(select.default.clone()),
            ])
        }
        Aggregate::None => {
            return Err(QueryError::unsupported("none", format!("for select {}", select.name)))
        }
    };
    Ok(pull)
}
