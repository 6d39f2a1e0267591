//! Backend aggregation request tree.
//!
//! Every node is a tagged variant rather than a free-form JSON map, so a
//! misspelled aggregation kind is a compile error. [`Aggs::to_json`] renders
//! the tree in the backend's `aggs` dialect, preserving insertion order.

use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::expr::script_json;
use crate::query::SortDir;

/// Where an aggregation reads its values from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Field(String),
    /// Painless source evaluated per document.
    Script(String),
}

impl Source {
    fn write(&self, body: &mut Map<String, Value>) {
        match self {
            Source::Field(field) => {
                body.insert("field".to_string(), Value::String(field.clone()));
            }
            Source::Script(source) => {
                body.insert("script".to_string(), script_json(source));
            }
        }
    }
}

/// Half-open numeric interval of a range aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub from: Option<f64>,
    pub to: Option<f64>,
}

impl Interval {
    fn to_json(self) -> Value {
        let mut body = Map::new();
        if let Some(from) = self.from {
            body.insert("from".to_string(), json!(from));
        }
        if let Some(to) = self.to {
            body.insert("to".to_string(), json!(to));
        }
        Value::Object(body)
    }
}

/// Name of the bucket key in a terms `order` clause. Backends before 6.0
/// only know `_term`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyOrder {
    #[default]
    Key,
    Term,
}

impl KeyOrder {
    pub fn for_version(version: &str) -> KeyOrder {
        match version.split('.').next().and_then(|major| major.parse::<u32>().ok()) {
            Some(major) if major < 6 => KeyOrder::Term,
            _ => KeyOrder::Key,
        }
    }

    pub fn field(self) -> &'static str {
        match self {
            KeyOrder::Key => "_key",
            KeyOrder::Term => "_term",
        }
    }
}

/// Accumulator scripts run map/reduce style by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedMetric {
    pub init: String,
    pub map: String,
    pub combine: String,
    pub reduce: String,
    pub params: Option<Value>,
}

/// One aggregation kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AggKind {
    Filter(Value),
    Nested {
        path: String,
    },
    /// Back out of nested documents; `None` returns to the root.
    ReverseNested {
        path: Option<String>,
    },
    Terms {
        source: Source,
        size: Option<usize>,
        include: Option<Vec<Value>>,
        order: Option<SortDir>,
    },
    Range {
        source: Source,
        ranges: Vec<Interval>,
    },
    Missing {
        field: String,
    },
    ValueCount(Source),
    Cardinality(Source),
    ExtendedStats(Source),
    Percentiles {
        source: Source,
        percents: Vec<f64>,
    },
    ScriptedMetric(ScriptedMetric),
}

impl AggKind {
    pub fn name(&self) -> &'static str {
        match self {
            AggKind::Filter(_) => "filter",
            AggKind::Nested { .. } => "nested",
            AggKind::ReverseNested { .. } => "reverse_nested",
            AggKind::Terms { .. } => "terms",
            AggKind::Range { .. } => "range",
            AggKind::Missing { .. } => "missing",
            AggKind::ValueCount(_) => "value_count",
            AggKind::Cardinality(_) => "cardinality",
            AggKind::ExtendedStats(_) => "extended_stats",
            AggKind::Percentiles { .. } => "percentiles",
            AggKind::ScriptedMetric(_) => "scripted_metric",
        }
    }

    fn body(&self, key_order: KeyOrder) -> Value {
        let mut body = Map::new();
        match self {
            AggKind::Filter(filter) => return filter.clone(),
            AggKind::Nested { path } => {
                body.insert("path".to_string(), Value::String(path.clone()));
            }
            AggKind::ReverseNested { path } => {
                body.insert(
                    "path".to_string(),
                    path.clone().map(Value::String).unwrap_or(Value::Null),
                );
            }
            AggKind::Terms {
                source,
                size,
                include,
                order,
            } => {
                source.write(&mut body);
                if let Some(size) = size {
                    body.insert("size".to_string(), json!(size));
                }
                if let Some(include) = include {
                    body.insert("include".to_string(), Value::Array(include.clone()));
                }
                if let Some(order) = order {
                    body.insert("order".to_string(), json!({key_order.field(): order.name()}));
                }
            }
            AggKind::Range { source, ranges } => {
                source.write(&mut body);
                body.insert(
                    "ranges".to_string(),
                    Value::Array(ranges.iter().map(|r| r.to_json()).collect()),
                );
            }
            AggKind::Missing { field } => {
                body.insert("field".to_string(), Value::String(field.clone()));
            }
            AggKind::ValueCount(source)
            | AggKind::Cardinality(source)
            | AggKind::ExtendedStats(source) => source.write(&mut body),
            AggKind::Percentiles { source, percents } => {
                source.write(&mut body);
                body.insert("percents".to_string(), json!(percents));
            }
            AggKind::ScriptedMetric(metric) => {
                if let Some(params) = &metric.params {
                    body.insert("params".to_string(), params.clone());
                }
                body.insert("init_script".to_string(), json!(metric.init));
                body.insert("map_script".to_string(), json!(metric.map));
                body.insert("combine_script".to_string(), json!(metric.combine));
                body.insert("reduce_script".to_string(), json!(metric.reduce));
            }
        }
        Value::Object(body)
    }
}

/// An aggregation with its sub-aggregations.
#[derive(Debug, Clone, PartialEq)]
pub struct AggNode {
    pub kind: AggKind,
    pub aggs: Aggs,
}

impl AggNode {
    pub fn leaf(kind: AggKind) -> Self {
        Self {
            kind,
            aggs: Aggs::new(),
        }
    }

    pub fn to_json(&self) -> Value {
        self.render(KeyOrder::default())
    }

    pub fn render(&self, key_order: KeyOrder) -> Value {
        let mut out = Map::new();
        out.insert(self.kind.name().to_string(), self.kind.body(key_order));
        if !self.aggs.is_empty() {
            out.insert("aggs".to_string(), self.aggs.render(key_order));
        }
        Value::Object(out)
    }
}

/// Ordered mapping from aggregation name to node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggs {
    nodes: IndexMap<String, AggNode>,
}

impl Aggs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, name: &str) -> Option<&AggNode> {
        self.nodes.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Add a node, replacing any previous node of the same name.
    pub fn insert(&mut self, name: impl Into<String>, node: AggNode) {
        self.nodes.insert(name.into(), node);
    }

    /// Add a childless aggregation.
    pub fn insert_leaf(&mut self, name: impl Into<String>, kind: AggKind) {
        self.insert(name, AggNode::leaf(kind));
    }

    /// Add a percentile to a percentiles aggregation, creating it if needed.
    pub fn add_percentile(&mut self, name: &str, source: Source, percent: f64) {
        match self.nodes.get_mut(name) {
            Some(AggNode {
                kind: AggKind::Percentiles { percents, .. },
                ..
            }) => {
                if !percents.contains(&percent) {
                    percents.push(percent);
                }
            }
            _ => self.insert_leaf(
                name,
                AggKind::Percentiles {
                    source,
                    percents: vec![percent],
                },
            ),
        }
    }

    /// A new tree holding one node `name` whose children are `self`.
    pub fn wrap(self, name: impl Into<String>, kind: AggKind) -> Aggs {
        let mut out = Aggs::new();
        out.insert(name, AggNode { kind, aggs: self });
        out
    }

    pub fn to_json(&self) -> Value {
        self.render(KeyOrder::default())
    }

    /// The tree in the request dialect of one backend generation.
    pub fn render(&self, key_order: KeyOrder) -> Value {
        Value::Object(
            self.nodes
                .iter()
                .map(|(name, node)| (name.clone(), node.render(key_order)))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_nests_children() {
        let mut inner = Aggs::new();
        inner.insert_leaf("n", AggKind::ValueCount(Source::Field("a".into())));
        let outer = inner.wrap("_nested", AggKind::Nested { path: "c".into() });
        assert_eq!(
            outer.to_json(),
            json!({"_nested": {"nested": {"path": "c"}, "aggs": {"n": {"value_count": {"field": "a"}}}}})
        );
    }

    #[test]
    fn test_reverse_nested_to_root_is_null() {
        let aggs = Aggs::new().wrap("_nested", AggKind::ReverseNested { path: None });
        assert_eq!(aggs.to_json(), json!({"_nested": {"reverse_nested": {"path": null}}}));
    }

    #[test]
    fn test_percentiles_merge() {
        let mut aggs = Aggs::new();
        aggs.add_percentile("v percentile", Source::Field("v".into()), 50.0);
        aggs.add_percentile("v percentile", Source::Field("v".into()), 90.0);
        aggs.add_percentile("v percentile", Source::Field("v".into()), 50.0);
        assert_eq!(
            aggs.to_json(),
            json!({"v percentile": {"percentiles": {"field": "v", "percents": [50.0, 90.0]}}})
        );
    }

    #[test]
    fn test_terms_options() {
        let kind = AggKind::Terms {
            source: Source::Script("doc['a'].value".into()),
            size: Some(3),
            include: None,
            order: Some(SortDir::Desc),
        };
        assert_eq!(
            AggNode::leaf(kind).to_json(),
            json!({"terms": {
                "script": {"source": "doc['a'].value", "lang": "painless"},
                "size": 3,
                "order": {"_key": "desc"}
            }})
        );
    }

    #[test]
    fn test_key_order_by_version() {
        assert_eq!(KeyOrder::for_version("1.7.5"), KeyOrder::Term);
        assert_eq!(KeyOrder::for_version("5.6.16"), KeyOrder::Term);
        assert_eq!(KeyOrder::for_version("6.0.0"), KeyOrder::Key);
        assert_eq!(KeyOrder::for_version("7.10.2"), KeyOrder::Key);
        assert_eq!(KeyOrder::for_version("unknown"), KeyOrder::Key);

        let mut aggs = Aggs::new();
        aggs.insert_leaf(
            "_match",
            AggKind::Terms {
                source: Source::Field("a".into()),
                size: None,
                include: None,
                order: Some(SortDir::Asc),
            },
        );
        assert_eq!(
            aggs.wrap("_nested", AggKind::Nested { path: "c".into() }).render(KeyOrder::Term)["_nested"]["aggs"]["_match"],
            json!({"terms": {"field": "a", "order": {"_term": "asc"}}})
        );
    }
}
