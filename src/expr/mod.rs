//! Expression tree adapter.
//!
//! Queries arrive as JSON expressions (`{"eq": {"a": 1}}`, `"field"`,
//! `{"literal": 3}`). This module normalises them into [`Expr`] and offers
//! exactly what the compilers need: free variables, constant folding, and
//! code generation into the backend's filter and script dialects.

mod filter;
mod parse;
mod script;

pub use script::{painless_literal, quote, script_json};

use std::collections::BTreeSet;
use std::fmt;

use serde_json::{json, Value};

use crate::schema::ROOT;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }

    fn fold(self, a: f64, b: f64) -> f64 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
        }
    }
}

/// A query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Variable(String),
    /// All leaves at or below a path (`*`, `a.*`).
    Leaves(String),
    Tuple(Vec<Expr>),
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Exists(Box<Expr>),
    Missing(Box<Expr>),
    Prefix {
        expr: Box<Expr>,
        prefix: String,
    },
    In {
        expr: Box<Expr>,
        values: Vec<Value>,
    },
    Arith {
        op: ArithOp,
        terms: Vec<Expr>,
    },
    Coalesce(Vec<Expr>),
}

impl Expr {
    pub fn var(name: &str) -> Self {
        Expr::Variable(name.to_string())
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn null() -> Self {
        Expr::Literal(Value::Null)
    }

    pub fn truth() -> Self {
        Expr::Literal(Value::Bool(true))
    }

    /// The whole document.
    pub fn root() -> Self {
        Expr::Variable(ROOT.to_string())
    }

    pub fn is_true(&self) -> bool {
        matches!(self, Expr::Literal(Value::Bool(true)))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, Expr::Literal(Value::Bool(false)))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Expr::Literal(Value::Null))
    }

    /// The variable name when this is a plain field reference.
    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Expr::Variable(name) => Some(name),
            _ => None,
        }
    }

    /// Free field references.
    pub fn vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_vars(&mut out);
        out
    }

    fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Variable(name) | Expr::Leaves(name) => {
                out.insert(name.clone());
            }
            Expr::Compare { lhs, rhs, .. } => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            Expr::Not(e) | Expr::Exists(e) | Expr::Missing(e) => e.collect_vars(out),
            Expr::Prefix { expr, .. } | Expr::In { expr, .. } => expr.collect_vars(out),
            Expr::Tuple(terms)
            | Expr::And(terms)
            | Expr::Or(terms)
            | Expr::Coalesce(terms)
            | Expr::Arith { terms, .. } => {
                for t in terms {
                    t.collect_vars(out);
                }
            }
        }
    }

    /// Conjuncts of this expression (itself when it is not an `and`).
    pub fn conjuncts(&self) -> Vec<Expr> {
        match self {
            Expr::And(terms) => terms.iter().flat_map(Expr::conjuncts).collect(),
            e if e.is_true() => Vec::new(),
            e => vec![e.clone()],
        }
    }

    /// Constant-fold without any variable bindings.
    pub fn partial_eval(&self) -> Expr {
        match self {
            Expr::Literal(_) | Expr::Variable(_) | Expr::Leaves(_) => self.clone(),
            Expr::Tuple(terms) => Expr::Tuple(terms.iter().map(Expr::partial_eval).collect()),
            Expr::Compare { op, lhs, rhs } => {
                let lhs = lhs.partial_eval();
                let rhs = rhs.partial_eval();
                match (&lhs, &rhs) {
                    (Expr::Literal(a), Expr::Literal(b)) => fold_compare(*op, a, b),
                    _ => Expr::Compare {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                }
            }
            Expr::And(terms) => {
                let mut kept = Vec::new();
                for term in terms.iter().map(Expr::partial_eval) {
                    if term.is_false() || term.is_null() {
                        return Expr::lit(false);
                    }
                    match term {
                        Expr::And(inner) => kept.extend(inner),
                        t if t.is_true() => {}
                        t => kept.push(t),
                    }
                }
                match kept.len() {
                    0 => Expr::truth(),
                    1 => kept.remove(0),
                    _ => Expr::And(kept),
                }
            }
            Expr::Or(terms) => {
                let mut kept = Vec::new();
                for term in terms.iter().map(Expr::partial_eval) {
                    if term.is_true() {
                        return Expr::truth();
                    }
                    match term {
                        Expr::Or(inner) => kept.extend(inner),
                        t if t.is_false() || t.is_null() => {}
                        t => kept.push(t),
                    }
                }
                match kept.len() {
                    0 => Expr::lit(false),
                    1 => kept.remove(0),
                    _ => Expr::Or(kept),
                }
            }
            Expr::Not(inner) => match inner.partial_eval() {
                Expr::Literal(Value::Bool(b)) => Expr::lit(!b),
                Expr::Literal(Value::Null) => Expr::null(),
                Expr::Not(e) => *e,
                e => Expr::Not(Box::new(e)),
            },
            Expr::Exists(inner) => match inner.partial_eval() {
                Expr::Literal(v) => Expr::lit(!v.is_null()),
                e => Expr::Exists(Box::new(e)),
            },
            Expr::Missing(inner) => match inner.partial_eval() {
                Expr::Literal(v) => Expr::lit(v.is_null()),
                e => Expr::Missing(Box::new(e)),
            },
            Expr::Prefix { expr, prefix } => match expr.partial_eval() {
                Expr::Literal(Value::String(s)) => Expr::lit(s.starts_with(prefix.as_str())),
                Expr::Literal(_) => Expr::lit(false),
                e => Expr::Prefix {
                    expr: Box::new(e),
                    prefix: prefix.clone(),
                },
            },
            Expr::In { expr, values } => {
                if values.is_empty() {
                    return Expr::lit(false);
                }
                match expr.partial_eval() {
                    Expr::Literal(v) => Expr::lit(values.contains(&v)),
                    e => Expr::In {
                        expr: Box::new(e),
                        values: values.clone(),
                    },
                }
            }
            Expr::Arith { op, terms } => {
                let terms: Vec<Expr> = terms.iter().map(Expr::partial_eval).collect();
                let numbers: Option<Vec<f64>> = terms
                    .iter()
                    .map(|t| match t {
                        Expr::Literal(v) => v.as_f64(),
                        _ => None,
                    })
                    .collect();
                match numbers {
                    Some(ns) if !ns.is_empty() => {
                        let folded = ns[1..].iter().fold(ns[0], |acc, n| op.fold(acc, *n));
                        Expr::Literal(number_value(folded))
                    }
                    _ => Expr::Arith { op: *op, terms },
                }
            }
            Expr::Coalesce(terms) => {
                let mut kept = Vec::new();
                for term in terms.iter().map(Expr::partial_eval) {
                    if term.is_null() {
                        continue;
                    }
                    let literal = matches!(term, Expr::Literal(_));
                    kept.push(term);
                    if literal {
                        break;
                    }
                }
                match kept.len() {
                    0 => Expr::null(),
                    1 => kept.remove(0),
                    _ => Expr::Coalesce(kept),
                }
            }
        }
    }

    /// Render back to the JSON expression format.
    pub fn to_json(&self) -> Value {
        match self {
            Expr::Literal(v) => match v {
                Value::Object(_) | Value::Array(_) | Value::String(_) => json!({ "literal": v }),
                v => v.clone(),
            },
            Expr::Variable(name) => Value::String(name.clone()),
            Expr::Leaves(name) if name == ROOT => Value::String("*".to_string()),
            Expr::Leaves(name) => Value::String(format!("{}.*", name)),
            Expr::Tuple(terms) => json!({ "tuple": terms.iter().map(Expr::to_json).collect::<Vec<_>>() }),
            Expr::Compare { op, lhs, rhs } => json!({ op.name(): [lhs.to_json(), rhs.to_json()] }),
            Expr::And(terms) => json!({ "and": terms.iter().map(Expr::to_json).collect::<Vec<_>>() }),
            Expr::Or(terms) => json!({ "or": terms.iter().map(Expr::to_json).collect::<Vec<_>>() }),
            Expr::Not(e) => json!({ "not": e.to_json() }),
            Expr::Exists(e) => json!({ "exists": e.to_json() }),
            Expr::Missing(e) => json!({ "missing": e.to_json() }),
            Expr::Prefix { expr, prefix } => json!({ "prefix": [expr.to_json(), prefix] }),
            Expr::In { expr, values } => json!({ "in": [expr.to_json(), values] }),
            Expr::Arith { op, terms } => {
                json!({ op.name(): terms.iter().map(Expr::to_json).collect::<Vec<_>>() })
            }
            Expr::Coalesce(terms) => {
                json!({ "coalesce": terms.iter().map(Expr::to_json).collect::<Vec<_>>() })
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

fn fold_compare(op: CompareOp, a: &Value, b: &Value) -> Expr {
    if a.is_null() || b.is_null() {
        return match op {
            CompareOp::Eq => Expr::lit(a.is_null() && b.is_null()),
            CompareOp::Ne => Expr::lit(a.is_null() != b.is_null()),
            _ => Expr::null(),
        };
    }
    let ordering = match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64().partial_cmp(&y.as_f64()),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    };
    let result = match (op, ordering) {
        (CompareOp::Eq, _) => a == b,
        (CompareOp::Ne, _) => a != b,
        (_, None) => return Expr::null(),
        (CompareOp::Gt, Some(o)) => o.is_gt(),
        (CompareOp::Gte, Some(o)) => o.is_ge(),
        (CompareOp::Lt, Some(o)) => o.is_lt(),
        (CompareOp::Lte, Some(o)) => o.is_le(),
    };
    Expr::lit(result)
}

/// Integral floats become JSON integers.
pub(crate) fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}
