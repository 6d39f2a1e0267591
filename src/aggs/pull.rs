//! Pull functions: pure extractors from a decoded leaf node.

use serde_json::{Map, Value};

use crate::expr::number_value;

/// How a select's value is read from a row's leaf node.
#[derive(Debug, Clone, PartialEq)]
pub enum Pull {
    Constant(Value),
    /// Follow object keys. Keys are literal; dots in them are not separators.
    Path(Vec<String>),
    /// First non-null.
    Coalesce(Vec<Pull>),
    /// Numeric sum of the non-null values, `null` when all are null.
    Sum(Vec<Pull>),
    /// A percentile out of a `percentiles` aggregation.
    Percentile { path: Vec<String>, percent: f64 },
    /// The full statistics object.
    Stats {
        stats: Vec<String>,
        median: Vec<String>,
    },
    /// Set union of array values.
    Union(Vec<Pull>),
    /// Add up value → count maps.
    MergeCounts(Vec<Pull>),
    /// Keys of a terms aggregation.
    BucketKeys(Vec<String>),
    /// Map of terms-aggregation key to document count.
    BucketCounts(Vec<String>),
}

/// Build a key path.
pub fn path(keys: &[&str]) -> Vec<String> {
    keys.iter().map(|k| k.to_string()).collect()
}

/// Distinct items of values that are arrays or single items, in first-seen order.
pub(crate) fn union_of(values: impl IntoIterator<Item = Value>) -> Value {
    let mut out: Vec<Value> = Vec::new();
    for value in values {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => continue,
            single => vec![single],
        };
        for item in items {
            if !out.contains(&item) {
                out.push(item);
            }
        }
    }
    Value::Array(out)
}

/// Sum value-to-count maps key by key. Non-objects are skipped.
pub(crate) fn merge_counts(values: impl IntoIterator<Item = Value>) -> Value {
    let mut out = Map::new();
    for value in values {
        let Value::Object(counts) = value else {
            continue;
        };
        for (key, count) in counts {
            let total = out.get(&key).and_then(Value::as_f64).unwrap_or(0.0) + count.as_f64().unwrap_or(0.0);
            out.insert(key, number_value(total));
        }
    }
    Value::Object(out)
}

fn follow<'a>(node: &'a Value, keys: &[String]) -> &'a Value {
    let mut current = node;
    for key in keys {
        match current.get(key) {
            Some(next) => current = next,
            None => return &Value::Null,
        }
    }
    current
}

/// Find a percentile however its key was formatted (`50`, `50.0`, `50.000000`).
fn percentile_value(values: &Value, percent: f64) -> Value {
    let mut buffer = ryu::Buffer::new();
    if let Some(v) = values.get(buffer.format(percent)) {
        return v.clone();
    }
    values
        .as_object()
        .and_then(|m| {
            m.iter()
                .find(|(k, _)| {
                    k.parse::<f64>()
                        .map(|p| (p - percent).abs() < 1e-6)
                        .unwrap_or(false)
                })
                .map(|(_, v)| v.clone())
        })
        .unwrap_or(Value::Null)
}

impl Pull {
    pub fn apply(&self, node: &Value) -> Value {
        match self {
            Pull::Constant(v) => v.clone(),
            Pull::Path(keys) => follow(node, keys).clone(),
            Pull::Coalesce(pulls) => pulls
                .iter()
                .map(|p| p.apply(node))
                .find(|v| !v.is_null())
                .unwrap_or(Value::Null),
            Pull::Sum(pulls) => {
                let numbers: Vec<f64> = pulls.iter().filter_map(|p| p.apply(node).as_f64()).collect();
                if numbers.is_empty() {
                    Value::Null
                } else {
                    number_value(numbers.iter().sum())
                }
            }
            Pull::Percentile { path, percent } => {
                percentile_value(follow(node, path).get("values").unwrap_or(&Value::Null), *percent)
            }
            Pull::Stats { stats, median } => {
                let s = follow(node, stats);
                let field = |k: &str| s.get(k).cloned().unwrap_or(Value::Null);
                let median = percentile_value(
                    follow(node, median).get("values").unwrap_or(&Value::Null),
                    50.0,
                );
                let mut out = Map::new();
                out.insert("count".to_string(), field("count"));
                out.insert("sum".to_string(), field("sum"));
                out.insert("min".to_string(), field("min"));
                out.insert("max".to_string(), field("max"));
                out.insert("avg".to_string(), field("avg"));
                out.insert("sos".to_string(), field("sum_of_squares"));
                out.insert("std".to_string(), field("std_deviation"));
                out.insert("var".to_string(), field("variance"));
                out.insert("median".to_string(), median);
                Value::Object(out)
            }
            Pull::Union(pulls) => union_of(pulls.iter().map(|p| p.apply(node))),
            Pull::MergeCounts(pulls) => merge_counts(pulls.iter().map(|p| p.apply(node))),
            Pull::BucketKeys(path) => Value::Array(
                crate::response::buckets(follow(node, path))
                    .iter()
                    .map(crate::response::bucket_key)
                    .collect(),
            ),
            Pull::BucketCounts(path) => Value::Object(
                crate::response::buckets(follow(node, path))
                    .iter()
                    .map(|b| {
                        let key = match crate::response::bucket_key(b) {
                            Value::String(s) => s,
                            other => other.to_string(),
                        };
                        (key, Value::from(crate::response::doc_count(b)))
                    })
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_path_keys_keep_dots() {
        let node = json!({"a.b_count": {"value": 3}});
        assert_eq!(Pull::Path(path(&["a.b_count", "value"])).apply(&node), json!(3));
        assert_eq!(Pull::Path(path(&["a", "b_count"])).apply(&node), json!(null));
    }

    #[test]
    fn test_percentile_key_formats() {
        for key in ["50", "50.0", "50.000000"] {
            let node = json!({"p": {"values": {key: 7.5}}});
            let pull = Pull::Percentile {
                path: path(&["p"]),
                percent: 50.0,
            };
            assert_eq!(pull.apply(&node), json!(7.5), "key {}", key);
        }
    }

    #[test]
    fn test_sum_and_coalesce() {
        let node = json!({"a": {"value": 2}, "b": {"value": null}, "c": {"value": 3}});
        let sum = Pull::Sum(vec![
            Pull::Path(path(&["a", "value"])),
            Pull::Path(path(&["b", "value"])),
            Pull::Path(path(&["c", "value"])),
        ]);
        assert_eq!(sum.apply(&node), json!(5));
        let fallback = Pull::Coalesce(vec![Pull::Path(path(&["b", "value"])), Pull::Constant(json!(0))]);
        assert_eq!(fallback.apply(&node), json!(0));
    }

    #[test]
    fn test_union_and_merge_counts() {
        let node = json!({"x": {"value": [1, 2]}, "y": {"value": [2, 3]}});
        let union = Pull::Union(vec![
            Pull::Path(path(&["x", "value"])),
            Pull::Path(path(&["y", "value"])),
        ]);
        assert_eq!(union.apply(&node), json!([1, 2, 3]));

        let node = json!({"x": {"value": {"a": 1}}, "y": {"value": {"a": 2, "b": 1}}});
        let merged = Pull::MergeCounts(vec![
            Pull::Path(path(&["x", "value"])),
            Pull::Path(path(&["y", "value"])),
        ]);
        assert_eq!(merged.apply(&node), json!({"a": 3, "b": 1}));
    }

    #[test]
    fn test_stats_object() {
        let node = json!({
            "v": {"count": 2, "sum": 4.0, "min": 1.0, "max": 3.0, "avg": 2.0,
                  "sum_of_squares": 10.0, "std_deviation": 1.0, "variance": 1.0},
            "v_percentile": {"values": {"50.0": 2.0}}
        });
        let pull = Pull::Stats {
            stats: path(&["v"]),
            median: path(&["v_percentile"]),
        };
        let stats = pull.apply(&node);
        assert_eq!(stats["sos"], json!(10.0));
        assert_eq!(stats["median"], json!(2.0));
    }
}
