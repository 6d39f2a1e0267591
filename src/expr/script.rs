//! Expression → painless script source.
//!
//! The scripting language is an external, untyped target: this only emits
//! text, it never models what the backend does with it.

use serde_json::{json, Value};

use super::{CompareOp, Expr};
use crate::error::{QueryError, QueryResult};
use crate::schema::{JxType, Schema};

/// Wrap script source in the backend's script object.
pub fn script_json(source: &str) -> Value {
    json!({"source": source, "lang": "painless"})
}

/// Quote a string as a painless string literal.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// A JSON scalar as painless source.
pub fn painless_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => format!(
            "Arrays.asList({})",
            items.iter().map(painless_literal).collect::<Vec<_>>().join(", ")
        ),
        Value::Object(_) => quote(&value.to_string()),
    }
}

fn doc_value(es_column: &str) -> String {
    let field = quote(es_column);
    format!("(doc[{f}].size()==0 ? null : doc[{f}].value)", f = field)
}

impl Expr {
    /// Compile to painless source evaluating this expression per document.
    pub fn to_script(&self, schema: &dyn Schema) -> QueryResult<String> {
        let source = match self {
            Expr::Literal(value) => painless_literal(value),
            Expr::Variable(name) => {
                let columns = schema.values(name, &[JxType::Object, JxType::Nested]);
                let columns = if columns.is_empty() {
                    schema.leaves(name)
                } else {
                    columns
                };
                match columns.len() {
                    0 => return Err(QueryError::missing_field(name.as_str())),
                    1 => doc_value(&columns[0].es_column),
                    _ => coalesce(columns.iter().map(|c| doc_value(&c.es_column)).collect()),
                }
            }
            Expr::Leaves(name) => {
                return Err(QueryError::InvalidQuery(format!(
                    "can not script all leaves of {}",
                    name
                )))
            }
            Expr::Tuple(terms) => format!("new Object[]{{{}}}", scripts(terms, schema)?.join(", ")),
            Expr::Compare { op, lhs, rhs } => {
                let (l, r) = (lhs.to_script(schema)?, rhs.to_script(schema)?);
                match op {
                    CompareOp::Eq | CompareOp::Ne => format!("({} {} {})", l, op.symbol(), r),
                    _ => format!(
                        "({l} != null && {r} != null && {l} {} {r})",
                        op.symbol(),
                        l = l,
                        r = r
                    ),
                }
            }
            Expr::And(terms) => join_or_default(scripts(terms, schema)?, " && ", "true"),
            Expr::Or(terms) => join_or_default(scripts(terms, schema)?, " || ", "false"),
            Expr::Not(inner) => format!("!({})", inner.to_script(schema)?),
            Expr::Exists(inner) => format!("({} != null)", inner.to_script(schema)?),
            Expr::Missing(inner) => format!("({} == null)", inner.to_script(schema)?),
            Expr::Prefix { expr, prefix } => {
                let s = expr.to_script(schema)?;
                format!("({s} != null && {s}.toString().startsWith({}))", quote(prefix), s = s)
            }
            Expr::In { expr, values } => format!(
                "{}.contains({})",
                painless_literal(&Value::Array(values.clone())),
                expr.to_script(schema)?
            ),
            Expr::Arith { op, terms } => {
                format!("({})", scripts(terms, schema)?.join(&format!(" {} ", op.symbol())))
            }
            Expr::Coalesce(terms) => coalesce(scripts(terms, schema)?),
        };
        Ok(source)
    }
}

fn scripts(terms: &[Expr], schema: &dyn Schema) -> QueryResult<Vec<String>> {
    terms.iter().map(|t| t.to_script(schema)).collect()
}

fn join_or_default(parts: Vec<String>, sep: &str, empty: &str) -> String {
    if parts.is_empty() {
        empty.to_string()
    } else {
        format!("({})", parts.join(sep))
    }
}

fn coalesce(mut parts: Vec<String>) -> String {
    let last = parts.pop().unwrap_or_else(|| "null".to_string());
    parts
        .into_iter()
        .rev()
        .fold(last, |acc, p| format!("({p} != null ? {p} : {acc})", p = p, acc = acc))
}
