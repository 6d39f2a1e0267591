//! JSON expression normalisation.

use serde_json::{Map, Value};

use super::{ArithOp, CompareOp, Expr};
use crate::error::{QueryError, QueryResult};
use crate::schema::ROOT;

impl Expr {
    /// Parse an expression written in the JSON query format.
    ///
    /// Strings name fields, other scalars are literals, arrays are tuples and
    /// single-key objects are operators.
    pub fn from_json(value: &Value) -> QueryResult<Expr> {
        match value {
            Value::String(s) => Ok(parse_name(s)),
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(Expr::Literal(value.clone())),
            Value::Array(items) => Ok(Expr::Tuple(parse_all(items)?)),
            Value::Object(map) => parse_operator(map),
        }
    }
}

fn parse_name(name: &str) -> Expr {
    if name == "*" {
        Expr::Leaves(ROOT.to_string())
    } else if let Some(prefix) = name.strip_suffix(".*") {
        Expr::Leaves(prefix.to_string())
    } else {
        Expr::Variable(name.to_string())
    }
}

fn parse_all(items: &[Value]) -> QueryResult<Vec<Expr>> {
    items.iter().map(Expr::from_json).collect()
}

fn invalid(op: &str, arg: &Value) -> QueryError {
    QueryError::InvalidQuery(format!("can not understand {{{:?}: {}}}", op, arg))
}

fn parse_operator(map: &Map<String, Value>) -> QueryResult<Expr> {
    let mut entries = map.iter();
    let (op, arg) = match (entries.next(), entries.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(QueryError::InvalidQuery(format!(
                "expecting a single operator, got {}",
                Value::Object(map.clone())
            )))
        }
    };

    let expr = match op.as_str() {
        "literal" => Expr::Literal(arg.clone()),
        "tuple" => match arg {
            Value::Array(items) => Expr::Tuple(parse_all(items)?),
            _ => return Err(invalid(op, arg)),
        },
        "eq" | "term" => parse_compare(CompareOp::Eq, op, arg)?,
        "ne" | "neq" => parse_compare(CompareOp::Ne, op, arg)?,
        "gt" => parse_compare(CompareOp::Gt, op, arg)?,
        "gte" => parse_compare(CompareOp::Gte, op, arg)?,
        "lt" => parse_compare(CompareOp::Lt, op, arg)?,
        "lte" => parse_compare(CompareOp::Lte, op, arg)?,
        "and" => Expr::And(parse_list(op, arg)?),
        "or" => Expr::Or(parse_list(op, arg)?),
        "not" => Expr::Not(Box::new(Expr::from_json(arg)?)),
        "exists" => Expr::Exists(Box::new(parse_field(op, arg)?)),
        "missing" => Expr::Missing(Box::new(parse_field(op, arg)?)),
        "prefix" => {
            let (expr, prefix) = parse_pair(op, arg)?;
            match prefix {
                Value::String(prefix) => Expr::Prefix {
                    expr: Box::new(expr),
                    prefix,
                },
                other => return Err(invalid(op, &other)),
            }
        }
        "in" | "terms" => {
            let (expr, values) = parse_pair(op, arg)?;
            match values {
                Value::Array(values) => Expr::In {
                    expr: Box::new(expr),
                    values,
                },
                single => Expr::In {
                    expr: Box::new(expr),
                    values: vec![single],
                },
            }
        }
        "add" | "sum" => parse_arith(ArithOp::Add, op, arg)?,
        "sub" | "subtract" => parse_arith(ArithOp::Sub, op, arg)?,
        "mul" | "mult" => parse_arith(ArithOp::Mul, op, arg)?,
        "div" => parse_arith(ArithOp::Div, op, arg)?,
        "coalesce" => Expr::Coalesce(parse_list(op, arg)?),
        _ => {
            return Err(QueryError::InvalidQuery(format!(
                "{:?} is not a known operator",
                op
            )))
        }
    };
    Ok(expr)
}

fn parse_list(op: &str, arg: &Value) -> QueryResult<Vec<Expr>> {
    match arg {
        Value::Array(items) => parse_all(items),
        Value::Null => Err(invalid(op, arg)),
        single => Ok(vec![Expr::from_json(single)?]),
    }
}

fn parse_field(op: &str, arg: &Value) -> QueryResult<Expr> {
    match arg {
        Value::String(name) => Ok(Expr::Variable(name.clone())),
        Value::Object(map) => match map.get("field") {
            Some(Value::String(name)) => Ok(Expr::Variable(name.clone())),
            _ => Expr::from_json(arg),
        },
        _ => Err(invalid(op, arg)),
    }
}

/// `{field: literal}` or `[expr, literal]`.
fn parse_pair(op: &str, arg: &Value) -> QueryResult<(Expr, Value)> {
    match arg {
        Value::Object(map) if map.len() == 1 => {
            let (field, value) = map.iter().next().ok_or_else(|| invalid(op, arg))?;
            Ok((Expr::Variable(field.clone()), value.clone()))
        }
        Value::Array(items) if items.len() == 2 => {
            let value = match &items[1] {
                Value::Object(m) if m.contains_key("literal") => m["literal"].clone(),
                v => v.clone(),
            };
            Ok((Expr::from_json(&items[0])?, value))
        }
        _ => Err(invalid(op, arg)),
    }
}

/// `{field: literal, ...}` (and-ed) or `[lhs, rhs]`.
fn parse_compare(cmp: CompareOp, op: &str, arg: &Value) -> QueryResult<Expr> {
    match arg {
        Value::Object(map) if !map.is_empty() => {
            let mut terms: Vec<Expr> = map
                .iter()
                .map(|(field, value)| Expr::Compare {
                    op: cmp,
                    lhs: Box::new(Expr::Variable(field.clone())),
                    rhs: Box::new(Expr::Literal(value.clone())),
                })
                .collect();
            if terms.len() == 1 {
                Ok(terms.remove(0))
            } else {
                Ok(Expr::And(terms))
            }
        }
        Value::Array(items) if items.len() == 2 => Ok(Expr::Compare {
            op: cmp,
            lhs: Box::new(Expr::from_json(&items[0])?),
            rhs: Box::new(Expr::from_json(&items[1])?),
        }),
        _ => Err(invalid(op, arg)),
    }
}

fn parse_arith(arith: ArithOp, op: &str, arg: &Value) -> QueryResult<Expr> {
    let terms = parse_list(op, arg)?;
    if terms.is_empty() {
        return Err(invalid(op, arg));
    }
    Ok(Expr::Arith { op: arith, terms })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_names_and_leaves() {
        assert_eq!(Expr::from_json(&json!("a.b")).unwrap(), Expr::var("a.b"));
        assert_eq!(Expr::from_json(&json!("*")).unwrap(), Expr::Leaves(".".into()));
        assert_eq!(Expr::from_json(&json!("a.*")).unwrap(), Expr::Leaves("a".into()));
    }

    #[test]
    fn test_short_form_compare() {
        let e = Expr::from_json(&json!({"eq": {"a": "x", "b": 2}})).unwrap();
        assert_eq!(e.conjuncts().len(), 2);
        let e = Expr::from_json(&json!({"term": {"status": "open"}})).unwrap();
        assert_eq!(
            e,
            Expr::Compare {
                op: CompareOp::Eq,
                lhs: Box::new(Expr::var("status")),
                rhs: Box::new(Expr::lit("open")),
            }
        );
    }

    #[test]
    fn test_prefix_and_in() {
        let e = Expr::from_json(&json!({"prefix": {"a": "test"}})).unwrap();
        assert!(matches!(e, Expr::Prefix { ref prefix, .. } if prefix == "test"));
        let e = Expr::from_json(&json!({"in": {"a": [1, 2]}})).unwrap();
        assert!(matches!(e, Expr::In { ref values, .. } if values.len() == 2));
    }

    #[test]
    fn test_round_trip_through_json() {
        let source = json!({"and": [{"gt": ["a", 3]}, {"not": {"missing": "b"}}]});
        let e = Expr::from_json(&source).unwrap();
        assert_eq!(Expr::from_json(&e.to_json()).unwrap(), e);
    }

    #[test]
    fn test_unknown_operator() {
        let err = Expr::from_json(&json!({"frobnicate": "a"})).unwrap_err();
        assert!(matches!(err, QueryError::InvalidQuery(_)));
        assert!(Expr::from_json(&json!({"eq": 1, "ne": 2})).is_err());
    }
}
