//! Edge decoders.
//!
//! A decoder is bound to one edge of a query. It encodes the edge's domain
//! into the aggregation request, maps response buckets back to a partition
//! index, and for discovered domains, counts what the response contains
//! before the domain is frozen.
//!
//! | Variant | Domain | Request shape |
//! |---------|--------|---------------|
//! | [`SetDecoder`] | enumerated partitions | `_match` terms with `include`, or one `_join_N` filter per partition |
//! | [`RangeDecoder`] | `min`/`max`/`interval` | `_match` range, `_other` out-of-range, `_missing` |
//! | [`GeneralRangeDecoder`] | interval-valued edge | one `_join_N` overlap filter per partition |
//! | [`DefaultDecoder`] | discovered | unrestricted terms plus `_missing` |
//! | [`FieldListDecoder`] | discovered tuples | one terms level per field |

mod discovery;
mod range;
mod set;

pub use discovery::{DefaultDecoder, FieldListDecoder};
pub use range::{GeneralRangeDecoder, RangeDecoder};
pub use set::SetDecoder;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::aggs::CompileOptions;
use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;
use crate::query::{Domain, Edge};
use crate::request::{AggKind, AggNode, Aggs, Source};
use crate::response::{MATCH, MISSING};
use crate::schema::{JxType, Schema, ROOT};
use crate::walker::Part;

/// What happens to discovered values beyond an edge's limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Rows with those values are dropped.
    #[default]
    Drop,
    /// Rows with those values land in the null partition.
    Other,
}

/// Where a response bucket belongs within an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Partition(usize),
    /// The trailing null/other partition.
    Null,
    /// Not part of the domain; the row is dropped.
    Unknown,
}

/// Capabilities every edge decoder provides.
pub trait AggsDecoder {
    /// Number of path-tuple positions this decoder consumes.
    fn num_columns(&self) -> usize {
        1
    }

    /// Wrap `inner` in this edge's aggregations.
    fn encode(&self, inner: Aggs) -> Aggs;

    /// Partition for this decoder's slice of a row's path tuple.
    fn slot(&self, parts: &[Part<'_>]) -> QueryResult<Slot>;

    /// Record the values in one row (discovered domains only).
    fn count(&mut self, _parts: &[Part<'_>]) {}

    /// Freeze a discovered domain.
    fn done_count(&mut self) {}

    fn is_discovery(&self) -> bool {
        false
    }

    /// A discovered domain is frozen once counting is done.
    fn is_frozen(&self) -> bool {
        true
    }

    fn partition_count(&self) -> usize;

    fn partition_value(&self, index: usize) -> Value;

    /// Domain type reported to callers, plus any extra properties.
    fn describe(&self, domain: &mut Map<String, Value>);

    /// Documents folded into the null partition by the overflow policy.
    fn overflow(&self) -> Option<u64> {
        None
    }
}

/// The decoder variants.
#[derive(Debug, Clone)]
pub enum DecoderKind {
    Set(SetDecoder),
    Range(RangeDecoder),
    GeneralRange(GeneralRangeDecoder),
    Default(DefaultDecoder),
    FieldList(FieldListDecoder),
}

macro_rules! dispatch {
    ($kind:expr, $d:ident => $body:expr) => {
        match $kind {
            DecoderKind::Set($d) => $body,
            DecoderKind::Range($d) => $body,
            DecoderKind::GeneralRange($d) => $body,
            DecoderKind::Default($d) => $body,
            DecoderKind::FieldList($d) => $body,
        }
    };
}

/// The domain of an edge as formatters see it.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDomain {
    pub name: String,
    pub partitions: Vec<Value>,
    pub allow_nulls: bool,
    pub overflow: Option<u64>,
    properties: Map<String, Value>,
}

impl OutputDomain {
    /// Cells along this dimension, including the null partition.
    pub fn size(&self) -> usize {
        self.partitions.len() + usize::from(self.allow_nulls)
    }

    /// Value of a partition index; the null partition is `null`.
    pub fn value(&self, index: usize) -> Value {
        self.partitions.get(index).cloned().unwrap_or(Value::Null)
    }

    pub fn to_json(&self) -> Value {
        let mut domain = self.properties.clone();
        domain.insert(
            "partitions".to_string(),
            Value::Array(
                self.partitions
                    .iter()
                    .enumerate()
                    .map(|(i, v)| json!({"value": v, "dataIndex": i}))
                    .collect(),
            ),
        );
        if let Some(overflow) = self.overflow {
            domain.insert("overflow".to_string(), json!(overflow));
        }
        json!({
            "name": self.name,
            "allowNulls": self.allow_nulls,
            "domain": domain,
        })
    }
}

/// A decoder bound to one query edge.
#[derive(Debug, Clone)]
pub struct Decoder {
    pub name: String,
    /// Position of the edge in the query as written.
    pub edge_index: usize,
    /// Innermost nested path the edge's columns live in.
    pub depth: String,
    /// First path-tuple position owned by this decoder.
    pub start: usize,
    pub allow_nulls: bool,
    pub kind: DecoderKind,
}

impl Decoder {
    /// Choose and build the decoder for an edge.
    pub fn for_edge(
        edge: &Edge,
        edge_index: usize,
        schema: &dyn Schema,
        limit: usize,
        options: &CompileOptions,
    ) -> QueryResult<Decoder> {
        let depth = edge_depth(edge, schema)?;
        let overflow = options.overflow;
        let max_partitions = options.bucket_limit();
        let kind = match (&edge.range, &edge.domain, &edge.value) {
            (Some(range), Domain::Range { min, max, interval }, _) => DecoderKind::GeneralRange(
                GeneralRangeDecoder::new(range, *min, *max, *interval, max_partitions, schema)?,
            ),
            (Some(_), _, _) => {
                return Err(QueryError::InvalidQuery(format!(
                    "edge {} has a range value but no range domain",
                    edge.name
                )))
            }
            (None, Domain::Dimension { fields }, _) => {
                DecoderKind::FieldList(FieldListDecoder::for_dimension(fields, schema, limit, overflow)?)
            }
            (None, Domain::Set { partitions }, value) => {
                DecoderKind::Set(SetDecoder::new(value.as_ref(), partitions, schema)?)
            }
            (None, Domain::Range { min, max, interval }, Some(value)) => {
                DecoderKind::Range(RangeDecoder::new(
                value,
                *min,
                *max,
                *interval,
                max_partitions,
                schema,
            )?)
            }
            (None, Domain::Default { sort }, Some(value)) => {
                let object = value.as_variable().filter(|name| {
                    schema
                        .values(name, &[JxType::Nested])
                        .iter()
                        .any(|c| c.jx_type == JxType::Object)
                });
                match object {
                    Some(name) => DecoderKind::FieldList(FieldListDecoder::for_object(
                        name, *sort, schema, limit, overflow,
                    )?),
                    None => DecoderKind::Default(DefaultDecoder::new(
                        value, *sort, schema, limit, overflow,
                    )?),
                }
            }
            (None, _, None) => {
                return Err(QueryError::InvalidQuery(format!(
                    "edge {} has no value",
                    edge.name
                )))
            }
        };
        Ok(Decoder {
            name: edge.name.clone(),
            edge_index,
            depth,
            start: 0,
            allow_nulls: edge.allow_nulls,
            kind,
        })
    }

    pub fn num_columns(&self) -> usize {
        dispatch!(&self.kind, d => d.num_columns())
    }

    pub fn is_discovery(&self) -> bool {
        dispatch!(&self.kind, d => d.is_discovery())
    }

    /// Wrap `inner` in this edge's aggregations, claiming path positions from `start`.
    pub fn encode(&mut self, inner: Aggs, start: usize) -> Aggs {
        self.start = start;
        dispatch!(&self.kind, d => d.encode(inner))
    }

    fn own_parts<'p, 'a>(&self, parts: &'p [Part<'a>]) -> QueryResult<&'p [Part<'a>]> {
        parts
            .get(self.start..self.start + self.num_columns())
            .ok_or_else(|| QueryError::Formatting {
                row: format!("{} path parts", parts.len()),
                message: format!(
                    "edge {} expects path positions {}..{}",
                    self.name,
                    self.start,
                    self.start + self.num_columns()
                ),
            })
    }

    /// Partition index of a row, `None` when the row falls outside the domain.
    pub fn get_index(&self, parts: &[Part<'_>]) -> QueryResult<Option<usize>> {
        if !dispatch!(&self.kind, d => d.is_frozen()) {
            return Err(QueryError::DomainNotFrozen {
                edge: self.name.clone(),
            });
        }
        let own = self.own_parts(parts)?;
        let slot = dispatch!(&self.kind, d => d.slot(own))?;
        Ok(match slot {
            Slot::Partition(i) => Some(i),
            Slot::Null if self.allow_nulls => Some(self.partition_count()),
            Slot::Null | Slot::Unknown => None,
        })
    }

    pub fn count(&mut self, parts: &[Part<'_>]) -> QueryResult<()> {
        let (start, end) = (self.start, self.start + self.num_columns());
        let own = parts.get(start..end).ok_or_else(|| QueryError::Formatting {
            row: format!("{} path parts", parts.len()),
            message: format!("edge {} expects path positions {}..{}", self.name, start, end),
        })?;
        dispatch!(&mut self.kind, d => d.count(own));
        Ok(())
    }

    pub fn done_count(&mut self) {
        dispatch!(&mut self.kind, d => d.done_count())
    }

    pub fn partition_count(&self) -> usize {
        dispatch!(&self.kind, d => d.partition_count())
    }

    /// Edge value at a partition index; the null partition is `null`.
    pub fn value_at(&self, index: usize) -> Value {
        if index >= self.partition_count() {
            return Value::Null;
        }
        dispatch!(&self.kind, d => d.partition_value(index))
    }

    pub fn output_domain(&self) -> OutputDomain {
        let mut properties = Map::new();
        dispatch!(&self.kind, d => d.describe(&mut properties));
        OutputDomain {
            name: self.name.clone(),
            partitions: (0..self.partition_count()).map(|i| self.value_at(i)).collect(),
            allow_nulls: self.allow_nulls,
            overflow: dispatch!(&self.kind, d => d.overflow()),
            properties,
        }
    }
}

/// The single nested depth an edge's columns live in.
fn edge_depth(edge: &Edge, schema: &dyn Schema) -> QueryResult<String> {
    if let Some(value) = &edge.value {
        for var in value.vars() {
            if var != ROOT && schema.leaves(&var).is_empty() {
                return Err(QueryError::missing_field(var));
            }
        }
    }
    let depths: BTreeSet<String> = edge
        .vars()
        .iter()
        .flat_map(|v| schema.leaves(v))
        .map(|c| c.depth().to_string())
        .collect();
    match depths.len() {
        0 => Ok(ROOT.to_string()),
        1 => Ok(depths.into_iter().next().unwrap_or_else(|| ROOT.to_string())),
        _ => Err(QueryError::CrossPathExpression {
            expr: edge
                .value
                .as_ref()
                .map(Expr::to_string)
                .unwrap_or_else(|| edge.name.clone()),
            paths: depths.into_iter().collect(),
        }),
    }
}

/// A field when the expression is a plain single-column variable, else a script.
pub(crate) fn value_source(value: &Expr, schema: &dyn Schema) -> QueryResult<Source> {
    if let Some(name) = value.as_variable() {
        let columns = schema.values(name, &[JxType::Object, JxType::Nested]);
        if columns.len() == 1 {
            return Ok(Source::Field(columns[0].es_column.clone()));
        }
    }
    Ok(Source::Script(value.partial_eval().to_script(schema)?))
}

/// Aggregation selecting documents where `value` is absent.
pub(crate) fn missing_agg(source: &Source, value: &Expr, schema: &dyn Schema) -> QueryResult<AggKind> {
    Ok(match source {
        Source::Field(field) => AggKind::Missing {
            field: field.clone(),
        },
        Source::Script(_) => AggKind::Filter(Expr::Missing(Box::new(value.clone())).to_filter(schema)?),
    })
}

/// `_match` (and optionally `_missing`), each holding a copy of `inner`.
pub(crate) fn match_and_missing(inner: Aggs, matcher: AggKind, missing: Option<AggKind>) -> Aggs {
    let mut out = Aggs::new();
    out.insert(
        MATCH,
        AggNode {
            kind: matcher,
            aggs: inner.clone(),
        },
    );
    if let Some(missing) = missing {
        out.insert(
            MISSING,
            AggNode {
                kind: missing,
                aggs: inner,
            },
        );
    }
    out
}

/// Lookup key for a value; numerically equal numbers share a key.
pub(crate) fn value_key(value: &Value) -> String {
    match value.as_f64() {
        Some(n) if value.is_number() => crate::expr::number_value(n).to_string(),
        _ => value.to_string(),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Bool(_) => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Array(_) | Value::Object(_) => 3,
        Value::Null => 4,
    }
}

/// Total order over JSON values: booleans, numbers, strings, then nulls.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(p, q)| compare_values(p, q))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => type_rank(a).cmp(&type_rank(b)).then_with(|| a.to_string().cmp(&b.to_string())),
    }
}
