//! JSON query normalisation.

use serde_json::{Map, Value};

use super::{
    Aggregate, Domain, Edge, EdgeRange, Format, Partition, Query, QueryMeta, Select, SelectShape,
    SortDir, SortTerm,
};
use crate::error::{QueryError, QueryResult};
use crate::expr::Expr;
use crate::schema::ROOT;

impl Aggregate {
    /// Parse an aggregate name, accepting the usual aliases.
    pub fn parse(name: &str) -> QueryResult<Aggregate> {
        let aggregate = match name {
            "none" => Aggregate::None,
            "count" | "N" | "s0" | "one" | "value_count" => Aggregate::Count,
            "sum" | "add" | "s1" => Aggregate::Sum,
            "min" | "minimum" => Aggregate::Min,
            "max" | "maximum" => Aggregate::Max,
            "avg" | "mean" | "average" => Aggregate::Avg,
            "std" | "stddev" => Aggregate::Std,
            "var" | "variance" => Aggregate::Var,
            "s2" | "sum_of_squares" => Aggregate::SumOfSquares,
            "median" => Aggregate::Median,
            "percentile" => Aggregate::Percentile,
            "cardinality" => Aggregate::Cardinality,
            "stats" => Aggregate::Stats,
            "union" => Aggregate::Union,
            "count_values" => Aggregate::CountValues,
            other => return Err(QueryError::unsupported(other, "as an aggregate")),
        };
        Ok(aggregate)
    }
}

impl Format {
    pub fn parse(name: &str) -> QueryResult<Format> {
        match name {
            "list" => Ok(Format::List),
            "table" => Ok(Format::Table),
            "cube" => Ok(Format::Cube),
            other => Err(QueryError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl SortDir {
    fn parse(value: &Value) -> QueryResult<SortDir> {
        match value {
            Value::String(s) if s == "asc" => Ok(SortDir::Asc),
            Value::String(s) if s == "desc" => Ok(SortDir::Desc),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(SortDir::Asc),
            Value::Number(n) if n.as_i64() == Some(-1) => Ok(SortDir::Desc),
            other => Err(QueryError::InvalidQuery(format!(
                "expecting sort direction, got {}",
                other
            ))),
        }
    }
}

/// One value or a list of values.
fn listwrap(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(single) => vec![single],
    }
}

fn get_str<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

fn get_f64(map: &Map<String, Value>, key: &str) -> QueryResult<f64> {
    map.get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| QueryError::InvalidQuery(format!("expecting numeric {:?} in domain", key)))
}

fn default_name(value: &Expr) -> String {
    match value {
        Expr::Variable(name) | Expr::Leaves(name) => name.clone(),
        other => other.to_string(),
    }
}

impl Select {
    pub fn from_json(value: &Value) -> QueryResult<Select> {
        match value {
            Value::String(_) => {
                let expr = Expr::from_json(value)?;
                Ok(Select {
                    name: default_name(&expr),
                    value: expr,
                    aggregate: Aggregate::None,
                    percentile: None,
                    default: Value::Null,
                })
            }
            Value::Object(map) => {
                let aggregate = match get_str(map, "aggregate") {
                    Some(name) => Aggregate::parse(name)?,
                    None => Aggregate::None,
                };
                let expr = match map.get("value") {
                    Some(v) => Expr::from_json(v)?,
                    None if aggregate == Aggregate::Count => Expr::root(),
                    None => {
                        return Err(QueryError::InvalidQuery(format!(
                            "select {} has no value",
                            value
                        )))
                    }
                };
                let name = match get_str(map, "name") {
                    Some(name) => name.to_string(),
                    None if expr.as_variable() == Some(ROOT) => aggregate.name().to_string(),
                    None => default_name(&expr),
                };
                let percentile = match aggregate {
                    Aggregate::Median => Some(0.5),
                    Aggregate::Percentile => Some(
                        map.get("percentile")
                            .and_then(Value::as_f64)
                            .ok_or_else(|| {
                                QueryError::unsupported(
                                    "percentile",
                                    "without a percentile between 0.0 and 1.0",
                                )
                            })?,
                    ),
                    _ => None,
                };
                Ok(Select {
                    name,
                    value: expr,
                    aggregate,
                    percentile,
                    default: map
                        .get("default")
                        .cloned()
                        .unwrap_or_else(|| aggregate.default_value()),
                })
            }
            other => Err(QueryError::InvalidQuery(format!(
                "can not understand select {}",
                other
            ))),
        }
    }
}

impl Partition {
    fn from_json(value: &Value) -> QueryResult<Partition> {
        match value {
            Value::Object(map) if map.contains_key("value") || map.contains_key("where") => {
                Ok(Partition {
                    name: get_str(map, "name").map(str::to_string),
                    value: map
                        .get("value")
                        .cloned()
                        .or_else(|| map.get("name").cloned())
                        .unwrap_or(Value::Null),
                    filter: map.get("where").map(Expr::from_json).transpose()?,
                })
            }
            scalar => Ok(Partition::of(scalar.clone())),
        }
    }
}

impl Domain {
    fn from_json(value: Option<&Value>) -> QueryResult<(Domain, Option<usize>)> {
        let map = match value {
            None | Some(Value::Null) => return Ok((Domain::default(), None)),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(QueryError::InvalidQuery(format!(
                    "can not understand domain {}",
                    other
                )))
            }
        };
        let limit = map.get("limit").and_then(Value::as_u64).map(|l| l as usize);
        if let Some(Value::Object(dimension)) = map.get("dimension") {
            let fields = listwrap(dimension.get("fields"))
                .into_iter()
                .map(|f| {
                    f.as_str().map(str::to_string).ok_or_else(|| {
                        QueryError::InvalidQuery(format!("dimension field {} is not a name", f))
                    })
                })
                .collect::<QueryResult<Vec<_>>>()?;
            return Ok((Domain::Dimension { fields }, limit));
        }
        let domain = match get_str(map, "type") {
            Some("set") => Domain::Set {
                partitions: listwrap(map.get("partitions"))
                    .into_iter()
                    .map(Partition::from_json)
                    .collect::<QueryResult<Vec<_>>>()?,
            },
            Some("range") | Some("numeric") => {
                let interval = get_f64(map, "interval")?;
                if interval <= 0.0 {
                    return Err(QueryError::InvalidQuery(
                        "range domain needs a positive interval".to_string(),
                    ));
                }
                Domain::Range {
                    min: get_f64(map, "min")?,
                    max: get_f64(map, "max")?,
                    interval,
                }
            }
            Some("default") | None => Domain::Default {
                sort: map.get("sort").map(SortDir::parse).transpose()?,
            },
            Some(other) => {
                return Err(QueryError::InvalidQuery(format!(
                    "domain type {:?} is not known",
                    other
                )))
            }
        };
        Ok((domain, limit))
    }
}

impl Edge {
    pub fn from_json(value: &Value) -> QueryResult<Edge> {
        match value {
            Value::String(name) => Ok(Edge::field(name)),
            Value::Object(map) => {
                let (domain, limit) = Domain::from_json(map.get("domain"))?;
                let expr = map.get("value").map(Expr::from_json).transpose()?;
                let range = match map.get("range") {
                    Some(Value::Object(r)) => Some(EdgeRange {
                        min: Expr::from_json(r.get("min").unwrap_or(&Value::Null))?,
                        max: Expr::from_json(r.get("max").unwrap_or(&Value::Null))?,
                    }),
                    _ => None,
                };
                let name = match (get_str(map, "name"), &expr) {
                    (Some(name), _) => name.to_string(),
                    (None, Some(e)) => default_name(e),
                    (None, None) => {
                        return Err(QueryError::InvalidQuery(format!(
                            "edge {} needs a name",
                            value
                        )))
                    }
                };
                let allow_nulls = map
                    .get("allowNulls")
                    .or_else(|| map.get("allow_nulls"))
                    .and_then(Value::as_bool)
                    .unwrap_or(true);
                Ok(Edge {
                    name,
                    value: expr,
                    range,
                    domain,
                    limit: limit.or_else(|| map.get("limit").and_then(Value::as_u64).map(|l| l as usize)),
                    allow_nulls,
                })
            }
            other => Err(QueryError::InvalidQuery(format!(
                "can not understand edge {}",
                other
            ))),
        }
    }
}

impl SortTerm {
    fn from_json(value: &Value) -> QueryResult<Vec<SortTerm>> {
        match value {
            Value::String(_) => Ok(vec![SortTerm {
                value: Expr::from_json(value)?,
                dir: SortDir::Asc,
            }]),
            Value::Object(map) if map.contains_key("value") => Ok(vec![SortTerm {
                value: Expr::from_json(&map["value"])?,
                dir: map
                    .get("sort")
                    .map(SortDir::parse)
                    .transpose()?
                    .unwrap_or_default(),
            }]),
            Value::Object(map) => map
                .iter()
                .map(|(field, dir)| {
                    Ok(SortTerm {
                        value: Expr::var(field),
                        dir: SortDir::parse(dir)?,
                    })
                })
                .collect(),
            other => Err(QueryError::InvalidQuery(format!(
                "can not understand sort {}",
                other
            ))),
        }
    }
}

impl Query {
    /// Read a query from the JSON query format.
    pub fn from_json(value: &Value) -> QueryResult<Query> {
        let map = value
            .as_object()
            .ok_or_else(|| QueryError::InvalidQuery(format!("expecting a query object, got {}", value)))?;

        let from = get_str(map, "from")
            .ok_or_else(|| QueryError::InvalidQuery("query needs a \"from\"".to_string()))?;
        let mut query = Query::over(from);
        query.source = Some(value.clone());

        query.edges = listwrap(map.get("edges"))
            .into_iter()
            .map(Edge::from_json)
            .collect::<QueryResult<_>>()?;
        query.groupby = listwrap(map.get("groupby"))
            .into_iter()
            .map(Edge::from_json)
            .collect::<QueryResult<_>>()?;
        if !query.edges.is_empty() && !query.groupby.is_empty() {
            return Err(QueryError::InvalidQuery(
                "edges and groupby can not be used together".to_string(),
            ));
        }
        // groupby domains are exhaustive and unsorted; sort comes from the query
        for edge in &mut query.groupby {
            if let Domain::Default { sort } = &mut edge.domain {
                *sort = None;
            }
        }

        match map.get("select") {
            None | Some(Value::Null) => {
                if query.grouping().is_empty() {
                    query.select = vec![Select {
                        name: ROOT.to_string(),
                        value: Expr::Leaves(ROOT.to_string()),
                        aggregate: Aggregate::None,
                        percentile: None,
                        default: Value::Null,
                    }];
                    query.select_shape = SelectShape::Single;
                } else {
                    query.select = vec![Select::count()];
                }
            }
            Some(Value::Array(items)) => {
                query.select = items.iter().map(Select::from_json).collect::<QueryResult<_>>()?;
            }
            Some(single) => {
                query.select = vec![Select::from_json(single)?];
                query.select_shape = SelectShape::Single;
            }
        }

        if let Some(w) = map.get("where") {
            query.where_ = Expr::from_json(w)?;
        }
        for term in listwrap(map.get("sort")) {
            query.sort.extend(SortTerm::from_json(term)?);
        }
        query.limit = map.get("limit").and_then(Value::as_u64).map(|l| l as usize);
        if let Some(format) = get_str(map, "format") {
            query.format = Format::parse(format)?;
        }
        if let Some(Value::Object(meta)) = map.get("meta") {
            query.meta = QueryMeta {
                save: meta.get("save").and_then(Value::as_bool).unwrap_or(false),
            };
        }
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_shapes() {
        let q = Query::from_json(&json!({"from": "t", "select": "a"})).unwrap();
        assert_eq!(q.select_shape, SelectShape::Single);
        assert_eq!(q.select[0].name, "a");

        let q = Query::from_json(&json!({"from": "t", "select": ["a", "b"]})).unwrap();
        assert_eq!(q.select_shape, SelectShape::List);
        assert_eq!(q.select.len(), 2);
    }

    #[test]
    fn test_groupby_defaults_to_count() {
        let q = Query::from_json(&json!({"from": "t", "groupby": "a", "sort": "a"})).unwrap();
        assert_eq!(q.select, vec![Select::count()]);
        assert!(q.is_groupby());
        assert_eq!(q.sort[0].dir, SortDir::Asc);
    }

    #[test]
    fn test_sort_forms() {
        let q = Query::from_json(&json!({
            "from": "t",
            "sort": [{"b": "desc"}, {"value": "a", "sort": -1}, "c"]
        }))
        .unwrap();
        let dirs: Vec<SortDir> = q.sort.iter().map(|s| s.dir).collect();
        assert_eq!(dirs, vec![SortDir::Desc, SortDir::Desc, SortDir::Asc]);
    }

    #[test]
    fn test_domains() {
        let e = Edge::from_json(&json!({
            "name": "size",
            "value": "v",
            "domain": {"type": "range", "min": 0, "max": 10, "interval": 5}
        }))
        .unwrap();
        assert_eq!(e.domain, Domain::Range { min: 0.0, max: 10.0, interval: 5.0 });

        let e = Edge::from_json(&json!({
            "value": "s",
            "domain": {"type": "set", "partitions": ["x", {"value": "y", "name": "Why"}]}
        }))
        .unwrap();
        match e.domain {
            Domain::Set { partitions } => {
                assert_eq!(partitions[0].value, json!("x"));
                assert_eq!(partitions[1].name.as_deref(), Some("Why"));
            }
            other => panic!("unexpected domain {:?}", other),
        }
    }

    #[test]
    fn test_percentile_and_format_errors() {
        let err = Select::from_json(&json!({"value": "a", "aggregate": "percentile"})).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedAggregate { .. }));

        let err = Query::from_json(&json!({"from": "t", "format": "csv"})).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedFormat(ref f) if f == "csv"));

        let err = Query::from_json(&json!({"from": "t", "edges": ["a"], "groupby": ["b"]})).unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
    }
}
