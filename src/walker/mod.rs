//! Result-tree walker.
//!
//! Flattens the recursive bucket response into rows. Each row carries the
//! path of buckets it was reached through (outermost first) and the drilled
//! leaf node the select pulls read from. Every decoder then turns its slice
//! of the path into a coordinate.

use serde_json::Value;
use tracing::debug;

use crate::decoder::Decoder;
use crate::error::QueryResult;
use crate::response::{bucket_key, buckets, doc_count, drill, Marker};

/// One step of a row's path through the response.
#[derive(Debug, Clone, Copy)]
pub enum Part<'a> {
    /// The `ordinal`th bucket of a `_match` list.
    Match { ordinal: usize, bucket: &'a Value },
    /// The `_missing` bucket.
    Missing(&'a Value),
    /// A bucket of an `_other` list, holding out-of-domain values.
    Other,
    /// The `_join_N` bucket.
    Join { index: usize, bucket: &'a Value },
}

impl Part<'_> {
    /// Value the bucket stands for; `null` for missing and other buckets.
    pub fn key(&self) -> Value {
        match self {
            Part::Match { bucket, .. } => bucket_key(bucket),
            Part::Join { index, .. } => Value::from(*index),
            Part::Missing(_) | Part::Other => Value::Null,
        }
    }

    pub fn doc_count(&self) -> u64 {
        match self {
            Part::Match { bucket, .. } | Part::Join { bucket, .. } | Part::Missing(bucket) => {
                doc_count(bucket)
            }
            Part::Other => 0,
        }
    }
}

/// A response row before coordinates are resolved.
#[derive(Debug, Clone)]
pub struct PathRow<'a> {
    pub parts: Vec<Part<'a>>,
    pub node: &'a Value,
}

/// A row addressed by one partition index per decoder.
#[derive(Debug, Clone)]
pub struct Row<'a> {
    pub coord: Vec<usize>,
    pub node: &'a Value,
}

/// Path-tuple width needed by the decoders.
pub fn depth(decoders: &[Decoder]) -> usize {
    decoders
        .iter()
        .map(|d| d.start + d.num_columns())
        .max()
        .unwrap_or(0)
}

/// Every leaf `depth` bucket levels below `root`.
pub fn walk(root: &Value, depth: usize) -> Vec<PathRow<'_>> {
    let mut out = Vec::new();
    let mut parts = Vec::with_capacity(depth);
    descend(root, depth, &mut parts, &mut out);
    out
}

fn descend<'a>(node: &'a Value, levels: usize, parts: &mut Vec<Part<'a>>, out: &mut Vec<PathRow<'a>>) {
    let node = drill(node);
    if levels == 0 {
        out.push(PathRow {
            parts: parts.clone(),
            node,
        });
        return;
    }
    let Some(children) = node.as_object() else {
        return;
    };
    for (key, child) in children {
        match Marker::of(key) {
            Marker::Match => {
                for (ordinal, bucket) in buckets(drill(child)).iter().enumerate() {
                    parts.push(Part::Match { ordinal, bucket });
                    descend(bucket, levels - 1, parts, out);
                    parts.pop();
                }
            }
            Marker::Other => {
                for bucket in buckets(child) {
                    parts.push(Part::Other);
                    descend(bucket, levels - 1, parts, out);
                    parts.pop();
                }
            }
            Marker::Missing => {
                let bucket = drill(child);
                parts.push(Part::Missing(bucket));
                descend(bucket, levels - 1, parts, out);
                parts.pop();
            }
            Marker::Join(index) => {
                parts.push(Part::Join {
                    index,
                    bucket: child,
                });
                descend(child, levels - 1, parts, out);
                parts.pop();
            }
            Marker::Filter | Marker::Nested | Marker::Payload => {}
        }
    }
}

/// Rows with coordinates; rows any decoder can not place are dropped.
pub fn rows<'a>(root: &'a Value, decoders: &[Decoder]) -> QueryResult<Vec<Row<'a>>> {
    let mut out = Vec::new();
    let mut dropped = 0usize;
    'rows: for row in walk(root, depth(decoders)) {
        let mut coord = Vec::with_capacity(decoders.len());
        for d in decoders {
            match d.get_index(&row.parts)? {
                Some(i) => coord.push(i),
                None => {
                    dropped += 1;
                    continue 'rows;
                }
            }
        }
        out.push(Row {
            coord,
            node: row.node,
        });
    }
    debug!(rows = out.len(), dropped, "response walked");
    Ok(out)
}

/// Learn the discovered domains from the response, then freeze every domain.
pub fn count_dim(root: &Value, decoders: &mut [Decoder]) -> QueryResult<()> {
    if decoders.iter().any(Decoder::is_discovery) {
        for row in walk(root, depth(decoders)) {
            for d in decoders.iter_mut() {
                d.count(&row.parts)?;
            }
        }
    }
    for d in decoders.iter_mut() {
        d.done_count();
    }
    Ok(())
}
