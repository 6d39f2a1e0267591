//! Decoders whose domain is learned from the response.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::{
    compare_values, match_and_missing, missing_agg, value_key, value_source, AggsDecoder,
    OverflowPolicy, Slot,
};
use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;
use crate::query::SortDir;
use crate::request::{AggKind, Aggs, Source};
use crate::schema::{path, JxType, Schema};
use crate::walker::Part;

/// Value counts gathered before a domain is frozen.
#[derive(Debug, Clone, Default)]
struct Tally {
    counts: IndexMap<String, (Value, u64)>,
    frozen: Option<Frozen>,
}

#[derive(Debug, Clone, Default)]
struct Frozen {
    partitions: Vec<Value>,
    lookup: HashMap<String, usize>,
    overflowed: HashSet<String>,
    overflow_docs: u64,
}

impl Tally {
    fn add(&mut self, value: Value, docs: u64) {
        let entry = self
            .counts
            .entry(value_key(&value))
            .or_insert_with(|| (value, 0));
        entry.1 += docs;
    }

    /// Order by key when sorted, otherwise by descending frequency with ties
    /// broken by key, then keep the first `limit`.
    fn freeze(&mut self, sort: Option<SortDir>, limit: usize) {
        let mut entries: Vec<(String, Value, u64)> = self
            .counts
            .drain(..)
            .map(|(key, (value, docs))| (key, value, docs))
            .collect();
        match sort {
            Some(SortDir::Asc) => entries.sort_by(|a, b| compare_values(&a.1, &b.1)),
            Some(SortDir::Desc) => entries.sort_by(|a, b| compare_values(&b.1, &a.1)),
            None => entries.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| compare_values(&a.1, &b.1))),
        }

        let mut frozen = Frozen::default();
        for (i, (key, value, docs)) in entries.into_iter().enumerate() {
            if i < limit {
                frozen.lookup.insert(key, i);
                frozen.partitions.push(value);
            } else {
                frozen.overflowed.insert(key);
                frozen.overflow_docs += docs;
            }
        }
        self.frozen = Some(frozen);
    }

    fn slot(&self, key: &str, overflow: OverflowPolicy) -> Slot {
        let Some(frozen) = &self.frozen else {
            return Slot::Unknown;
        };
        match frozen.lookup.get(key) {
            Some(i) => Slot::Partition(*i),
            None if overflow == OverflowPolicy::Other && frozen.overflowed.contains(key) => {
                Slot::Null
            }
            None => Slot::Unknown,
        }
    }

    fn partitions(&self) -> &[Value] {
        self.frozen
            .as_ref()
            .map(|f| f.partitions.as_slice())
            .unwrap_or(&[])
    }

    fn overflow(&self, policy: OverflowPolicy) -> Option<u64> {
        match (&self.frozen, policy) {
            (Some(f), OverflowPolicy::Other) if !f.overflowed.is_empty() => Some(f.overflow_docs),
            _ => None,
        }
    }
}

/// A single value edge with a discovered domain.
#[derive(Debug, Clone)]
pub struct DefaultDecoder {
    source: Source,
    missing: AggKind,
    sort: Option<SortDir>,
    limit: usize,
    policy: OverflowPolicy,
    tally: Tally,
}

impl DefaultDecoder {
    pub fn new(
        value: &Expr,
        sort: Option<SortDir>,
        schema: &dyn Schema,
        limit: usize,
        policy: OverflowPolicy,
    ) -> QueryResult<DefaultDecoder> {
        let source = value_source(value, schema)?;
        let missing = missing_agg(&source, value, schema)?;
        Ok(DefaultDecoder {
            source,
            missing,
            sort,
            limit,
            policy,
            tally: Tally::default(),
        })
    }
}

impl AggsDecoder for DefaultDecoder {
    fn encode(&self, inner: Aggs) -> Aggs {
        let matcher = AggKind::Terms {
            source: self.source.clone(),
            size: Some(self.limit),
            include: None,
            order: self.sort,
        };
        match_and_missing(inner, matcher, Some(self.missing.clone()))
    }

    fn slot(&self, parts: &[Part<'_>]) -> QueryResult<Slot> {
        Ok(match parts[0] {
            Part::Match { .. } => self.tally.slot(&value_key(&parts[0].key()), self.policy),
            Part::Missing(_) | Part::Other => Slot::Null,
            Part::Join { .. } => Slot::Unknown,
        })
    }

    fn count(&mut self, parts: &[Part<'_>]) {
        if let Part::Match { .. } = parts[0] {
            self.tally.add(parts[0].key(), parts[0].doc_count());
        }
    }

    fn done_count(&mut self) {
        self.tally.freeze(self.sort, self.limit);
        debug!(partitions = self.tally.partitions().len(), "domain discovered");
    }

    fn is_discovery(&self) -> bool {
        true
    }

    fn is_frozen(&self) -> bool {
        self.tally.frozen.is_some()
    }

    fn partition_count(&self) -> usize {
        self.tally.partitions().len()
    }

    fn partition_value(&self, index: usize) -> Value {
        self.tally.partitions().get(index).cloned().unwrap_or(Value::Null)
    }

    fn describe(&self, domain: &mut Map<String, Value>) {
        domain.insert("type".to_string(), json!("set"));
    }

    fn overflow(&self) -> Option<u64> {
        self.tally.overflow(self.policy)
    }
}

/// One field of a multi-field edge.
#[derive(Debug, Clone)]
struct FieldColumn {
    /// Key of this field in the edge's partition objects.
    name: String,
    es_column: String,
}

/// Several fields grouped as one edge: object leaves or explicit dimension
/// fields. Each field gets its own terms level and the domain is the set of
/// value tuples seen.
#[derive(Debug, Clone)]
pub struct FieldListDecoder {
    fields: Vec<FieldColumn>,
    sort: Option<SortDir>,
    limit: usize,
    policy: OverflowPolicy,
    tally: Tally,
}

impl FieldListDecoder {
    /// Group by every leaf below an object column.
    pub fn for_object(
        name: &str,
        sort: Option<SortDir>,
        schema: &dyn Schema,
        limit: usize,
        policy: OverflowPolicy,
    ) -> QueryResult<FieldListDecoder> {
        let mut leaves = schema.leaves(name);
        leaves.retain(|c| c.jx_type != JxType::Exists);
        if leaves.is_empty() {
            return Err(QueryError::missing_field(name));
        }
        let fields = leaves
            .iter()
            .map(|c| FieldColumn {
                name: path::relative(&c.name, name),
                es_column: c.es_column.clone(),
            })
            .collect();
        Ok(FieldListDecoder {
            fields,
            sort,
            limit,
            policy,
            tally: Tally::default(),
        })
    }

    /// Group by an explicit list of fields.
    pub fn for_dimension(
        names: &[String],
        schema: &dyn Schema,
        limit: usize,
        policy: OverflowPolicy,
    ) -> QueryResult<FieldListDecoder> {
        let fields = names
            .iter()
            .map(|name| {
                let columns = schema.values(name, &[JxType::Object, JxType::Nested]);
                columns
                    .first()
                    .map(|c| FieldColumn {
                        name: name.clone(),
                        es_column: c.es_column.clone(),
                    })
                    .ok_or_else(|| QueryError::missing_field(name.as_str()))
            })
            .collect::<QueryResult<_>>()?;
        Ok(FieldListDecoder {
            fields,
            sort: None,
            limit,
            policy,
            tally: Tally::default(),
        })
    }

    fn tuple(parts: &[Part<'_>]) -> Option<Value> {
        let mut values = Vec::with_capacity(parts.len());
        for part in parts {
            match part {
                Part::Other | Part::Join { .. } => return None,
                part => values.push(part.key()),
            }
        }
        Some(Value::Array(values))
    }
}

impl AggsDecoder for FieldListDecoder {
    fn num_columns(&self) -> usize {
        self.fields.len()
    }

    fn encode(&self, inner: Aggs) -> Aggs {
        self.fields.iter().rev().fold(inner, |aggs, field| {
            let matcher = AggKind::Terms {
                source: Source::Field(field.es_column.clone()),
                size: Some(self.limit),
                include: None,
                order: None,
            };
            let missing = AggKind::Missing {
                field: field.es_column.clone(),
            };
            match_and_missing(aggs, matcher, Some(missing))
        })
    }

    fn slot(&self, parts: &[Part<'_>]) -> QueryResult<Slot> {
        let Some(tuple) = Self::tuple(parts) else {
            return Ok(Slot::Null);
        };
        if tuple.as_array().is_some_and(|t| t.iter().all(Value::is_null)) {
            return Ok(Slot::Null);
        }
        Ok(self.tally.slot(&value_key(&tuple), self.policy))
    }

    fn count(&mut self, parts: &[Part<'_>]) {
        let Some(tuple) = Self::tuple(parts) else {
            return;
        };
        if tuple.as_array().is_some_and(|t| t.iter().all(Value::is_null)) {
            return;
        }
        let docs = parts.last().map(Part::doc_count).unwrap_or(0);
        self.tally.add(tuple, docs);
    }

    fn done_count(&mut self) {
        self.tally.freeze(self.sort, self.limit);
        debug!(
            fields = self.fields.len(),
            partitions = self.tally.partitions().len(),
            "tuple domain discovered"
        );
    }

    fn is_discovery(&self) -> bool {
        true
    }

    fn is_frozen(&self) -> bool {
        self.tally.frozen.is_some()
    }

    fn partition_count(&self) -> usize {
        self.tally.partitions().len()
    }

    fn partition_value(&self, index: usize) -> Value {
        let Some(Value::Array(tuple)) = self.tally.partitions().get(index) else {
            return Value::Null;
        };
        let object: Map<String, Value> = self
            .fields
            .iter()
            .zip(tuple)
            .filter(|(_, v)| !v.is_null())
            .map(|(f, v)| (f.name.clone(), v.clone()))
            .collect();
        Value::Object(object)
    }

    fn describe(&self, domain: &mut Map<String, Value>) {
        domain.insert("type".to_string(), json!("set"));
        domain.insert(
            "dimension".to_string(),
            json!({"fields": self.fields.iter().map(|f| f.name.as_str()).collect::<Vec<_>>()}),
        );
    }

    fn overflow(&self) -> Option<u64> {
        self.tally.overflow(self.policy)
    }
}
