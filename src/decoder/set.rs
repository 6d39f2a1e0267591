use std::collections::HashMap;

use serde_json::{Map, Value};

use super::{match_and_missing, value_key, value_source, AggsDecoder, Slot};
use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;
use crate::query::Partition;
use crate::request::{AggKind, AggNode, Aggs, Source};
use crate::response::{join_key, MISSING};
use crate::schema::Schema;
use crate::walker::Part;

/// How partitions are selected.
#[derive(Debug, Clone)]
enum Selection {
    /// By value, through a terms aggregation.
    Terms { source: Source, missing: Value },
    /// By an explicit filter per partition.
    Filters { filters: Vec<Value>, missing: Value },
}

/// Enumerated partitions, known before the request is sent.
#[derive(Debug, Clone)]
pub struct SetDecoder {
    partitions: Vec<Value>,
    lookup: HashMap<String, usize>,
    selection: Selection,
}

impl SetDecoder {
    pub fn new(
        value: Option<&Expr>,
        partitions: &[Partition],
        schema: &dyn Schema,
    ) -> QueryResult<SetDecoder> {
        let values: Vec<Value> = partitions.iter().map(|p| p.value.clone()).collect();
        let lookup = values
            .iter()
            .enumerate()
            .map(|(i, v)| (value_key(v), i))
            .collect();

        let selection = if partitions.iter().any(|p| p.filter.is_some()) {
            let mut wheres = Vec::with_capacity(partitions.len());
            for p in partitions {
                let filter = match (&p.filter, value) {
                    (Some(filter), _) => filter.clone(),
                    (None, Some(value)) => Expr::Compare {
                        op: crate::expr::CompareOp::Eq,
                        lhs: Box::new(value.clone()),
                        rhs: Box::new(Expr::Literal(p.value.clone())),
                    },
                    (None, None) => {
                        return Err(QueryError::InvalidQuery(format!(
                            "partition {} has neither a value expression nor a where clause",
                            p.value
                        )))
                    }
                };
                wheres.push(filter.partial_eval());
            }
            let missing = Expr::Not(Box::new(Expr::Or(wheres.clone())))
                .partial_eval()
                .to_filter(schema)?;
            Selection::Filters {
                filters: wheres
                    .iter()
                    .map(|w| w.to_filter(schema))
                    .collect::<QueryResult<_>>()?,
                missing,
            }
        } else {
            let value = value.ok_or_else(|| {
                QueryError::InvalidQuery("set domain needs a value or partition filters".to_string())
            })?;
            let missing = Expr::Not(Box::new(Expr::In {
                expr: Box::new(value.clone()),
                values: values.clone(),
            }))
            .partial_eval()
            .to_filter(schema)?;
            Selection::Terms {
                source: value_source(value, schema)?,
                missing,
            }
        };

        Ok(SetDecoder {
            partitions: values,
            lookup,
            selection,
        })
    }
}

impl AggsDecoder for SetDecoder {
    fn encode(&self, inner: Aggs) -> Aggs {
        match &self.selection {
            Selection::Terms { source, missing } => {
                let include = match source {
                    Source::Field(_) => Some(self.partitions.clone()),
                    Source::Script(_) => None,
                };
                let matcher = AggKind::Terms {
                    source: source.clone(),
                    size: Some(self.partitions.len().max(1)),
                    include,
                    order: None,
                };
                match_and_missing(inner, matcher, Some(AggKind::Filter(missing.clone())))
            }
            Selection::Filters { filters, missing } => {
                let mut out = Aggs::new();
                for (i, filter) in filters.iter().enumerate() {
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
                        kind: AggKind::Filter(missing.clone()),
                        aggs: inner,
                    },
                );
                out
            }
        }
    }

    fn slot(&self, parts: &[Part<'_>]) -> QueryResult<Slot> {
        Ok(match parts[0] {
            Part::Match { .. } => match self.lookup.get(&value_key(&parts[0].key())) {
                Some(i) => Slot::Partition(*i),
                None => Slot::Null,
            },
            Part::Join { index, .. } if index < self.partitions.len() => Slot::Partition(index),
            Part::Join { .. } => Slot::Unknown,
            Part::Missing(_) | Part::Other => Slot::Null,
        })
    }

    fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn partition_value(&self, index: usize) -> Value {
        self.partitions.get(index).cloned().unwrap_or(Value::Null)
    }

    fn describe(&self, domain: &mut Map<String, Value>) {
        domain.insert("type".to_string(), Value::from("set"));
    }
}
