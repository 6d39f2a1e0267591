use serde_json::{json, Map, Value};

use super::{missing_agg, value_source, AggsDecoder, Slot};
use crate::error::{QueryError, QueryResult};
use crate::expr::{number_value, CompareOp, Expr};
use crate::query::EdgeRange;
use crate::request::{AggKind, AggNode, Aggs, Interval, Source};
use crate::response::{join_key, MATCH, MISSING, OTHER};
use crate::schema::Schema;
use crate::walker::Part;

/// Partition boundaries of an algebraic domain.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Steps {
    min: f64,
    max: f64,
    interval: f64,
}

impl Steps {
    /// Rejects domains that are empty, unbounded, or cut into more than
    /// `max_partitions` partitions.
    fn new(min: f64, max: f64, interval: f64, max_partitions: usize) -> QueryResult<Steps> {
        if ![min, max, interval].iter().all(|n| n.is_finite()) {
            return Err(QueryError::InvalidQuery(format!(
                "range domain [{}, {}) with interval {} is not finite",
                min, max, interval
            )));
        }
        if interval <= 0.0 || max < min {
            return Err(QueryError::InvalidQuery(format!(
                "range domain [{}, {}) with interval {} is empty",
                min, max, interval
            )));
        }
        let partitions = ((max - min) / interval).ceil();
        if partitions > max_partitions as f64 {
            return Err(QueryError::InvalidQuery(format!(
                "range domain [{}, {}) with interval {} has {} partitions, more than {}",
                min, max, interval, partitions, max_partitions
            )));
        }
        Ok(Steps { min, max, interval })
    }

    fn count(&self) -> usize {
        ((self.max - self.min) / self.interval).ceil() as usize
    }

    fn lower(&self, i: usize) -> f64 {
        self.min + i as f64 * self.interval
    }

    fn upper(&self, i: usize) -> f64 {
        (self.lower(i) + self.interval).min(self.max)
    }

    fn index_of(&self, from: f64) -> Option<usize> {
        let i = ((from - self.min) / self.interval).round();
        if i >= 0.0 && (i as usize) < self.count() {
            Some(i as usize)
        } else {
            None
        }
    }

    fn describe(&self, domain: &mut Map<String, Value>) {
        domain.insert("type".to_string(), json!("range"));
        domain.insert("min".to_string(), number_value(self.min));
        domain.insert("max".to_string(), number_value(self.max));
        domain.insert("interval".to_string(), number_value(self.interval));
    }
}

/// Single-valued edge over `[min, max)` cut into `interval`-wide partitions.
#[derive(Debug, Clone)]
pub struct RangeDecoder {
    steps: Steps,
    source: Source,
    missing: AggKind,
}

impl RangeDecoder {
    pub fn new(
        value: &Expr,
        min: f64,
        max: f64,
        interval: f64,
        max_partitions: usize,
        schema: &dyn Schema,
    ) -> QueryResult<RangeDecoder> {
        let steps = Steps::new(min, max, interval, max_partitions)?;
        let source = value_source(value, schema)?;
        let missing = missing_agg(&source, value, schema)?;
        Ok(RangeDecoder {
            steps,
            source,
            missing,
        })
    }
}

impl AggsDecoder for RangeDecoder {
    fn encode(&self, inner: Aggs) -> Aggs {
        let ranges = (0..self.steps.count())
            .map(|i| Interval {
                from: Some(self.steps.lower(i)),
                to: Some(self.steps.upper(i)),
            })
            .collect();
        let outside = vec![
            Interval {
                from: None,
                to: Some(self.steps.min),
            },
            Interval {
                from: Some(self.steps.max),
                to: None,
            },
        ];

        let mut out = Aggs::new();
        out.insert(
            MATCH,
            AggNode {
                kind: AggKind::Range {
                    source: self.source.clone(),
                    ranges,
                },
                aggs: inner.clone(),
            },
        );
        out.insert(
            OTHER,
            AggNode {
                kind: AggKind::Range {
                    source: self.source.clone(),
                    ranges: outside,
                },
                aggs: inner.clone(),
            },
        );
        out.insert(
            MISSING,
            AggNode {
                kind: self.missing.clone(),
                aggs: inner,
            },
        );
        out
    }

    fn slot(&self, parts: &[Part<'_>]) -> QueryResult<Slot> {
        Ok(match parts[0] {
            Part::Match { ordinal, bucket } => {
                let index = match bucket.get("from").and_then(Value::as_f64) {
                    Some(from) => self.steps.index_of(from),
                    None => Some(ordinal).filter(|i| *i < self.steps.count()),
                };
                index.map(Slot::Partition).unwrap_or(Slot::Null)
            }
            Part::Other | Part::Missing(_) => Slot::Null,
            Part::Join { .. } => Slot::Unknown,
        })
    }

    fn partition_count(&self) -> usize {
        self.steps.count()
    }

    fn partition_value(&self, index: usize) -> Value {
        number_value(self.steps.lower(index))
    }

    fn describe(&self, domain: &mut Map<String, Value>) {
        self.steps.describe(domain)
    }
}

/// Interval-valued edge: a document with `[range.min, range.max)` counts in
/// every partition it overlaps.
#[derive(Debug, Clone)]
pub struct GeneralRangeDecoder {
    steps: Steps,
    overlaps: Vec<Value>,
    missing: Value,
}

impl GeneralRangeDecoder {
    pub fn new(
        range: &EdgeRange,
        min: f64,
        max: f64,
        interval: f64,
        max_partitions: usize,
        schema: &dyn Schema,
    ) -> QueryResult<GeneralRangeDecoder> {
        let steps = Steps::new(min, max, interval, max_partitions)?;
        let compare = |op, lhs: &Expr, rhs: f64| Expr::Compare {
            op,
            lhs: Box::new(lhs.clone()),
            rhs: Box::new(Expr::Literal(number_value(rhs))),
        };
        let overlaps = (0..steps.count())
            .map(|i| {
                Expr::And(vec![
                    compare(CompareOp::Lt, &range.min, steps.upper(i)),
                    Expr::Or(vec![
                        Expr::Missing(Box::new(range.max.clone())),
                        compare(CompareOp::Gt, &range.max, steps.lower(i)),
                    ]),
                ])
                .partial_eval()
                .to_filter(schema)
            })
            .collect::<QueryResult<_>>()?;
        let missing = Expr::Missing(Box::new(range.min.clone()))
            .partial_eval()
            .to_filter(schema)?;
        Ok(GeneralRangeDecoder {
            steps,
            overlaps,
            missing,
        })
    }
}

impl AggsDecoder for GeneralRangeDecoder {
    fn encode(&self, inner: Aggs) -> Aggs {
        let mut out = Aggs::new();
        for (i, filter) in self.overlaps.iter().enumerate() {
            out.insert(
                join_key(i),
                AggNode {
                    kind: AggKind::Filter(filter.clone()),
                    aggs: inner.clone(),
                },
            );
        }
        out.insert(
            MISSING,
            AggNode {
                kind: AggKind::Filter(self.missing.clone()),
                aggs: inner,
            },
        );
        out
    }

    fn slot(&self, parts: &[Part<'_>]) -> QueryResult<Slot> {
        Ok(match parts[0] {
            Part::Join { index, .. } if index < self.steps.count() => Slot::Partition(index),
            Part::Join { .. } | Part::Match { .. } => Slot::Unknown,
            Part::Missing(_) | Part::Other => Slot::Null,
        })
    }

    fn partition_count(&self) -> usize {
        self.steps.count()
    }

    fn partition_value(&self, index: usize) -> Value {
        number_value(self.steps.lower(index))
    }

    fn describe(&self, domain: &mut Map<String, Value>) {
        self.steps.describe(domain)
    }
}
