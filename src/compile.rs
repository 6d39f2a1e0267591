//! End-to-end compilation from a query to a backend request.
//!
//! ```text
//! Query → classify → { aggregation builder | set-operation compiler } → request
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tessera::compile::{compile, CompileOptions};
//! use tessera::query::Query;
//! use tessera::schema::Catalog;
//!
//! let query = Query::from_json(&json!({"from": "bugs", "groupby": "status"}))?;
//! let compiled = compile(&query, &catalog, "6.8.2", &CompileOptions::default())?;
//! println!("{}", compiled.request());
//! ```

use serde_json::Value;
use tracing::{debug, instrument};

use crate::aggs::{compile_aggs, AggsPlan};
use crate::backend;
use crate::error::{QueryError, QueryResult};
use crate::query::{Aggregate, Query};
use crate::schema::{Schema, ROOT};
use crate::setop::{compile_setop, SetOpPlan};

pub use crate::aggs::CompileOptions;

// ============================================================================
// Classification
// ============================================================================

/// Which compiler a query goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Grouped or aggregated; answered from `aggs` buckets.
    Aggregation,
    /// Plain selects; answered from hits.
    SetOp,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Aggregation => "aggregation",
            Operation::SetOp => "setop",
        }
    }
}

/// Decide how `query` is answered by a backend reporting `version`.
///
/// Any grouping or any select with an aggregate makes it an aggregation.
/// Everything else is a set operation.
pub fn classify(query: &Query, version: &str) -> QueryResult<Operation> {
    if !backend::is_supported(version) {
        return Err(QueryError::InvalidQuery(format!(
            "backend version {} is not supported",
            version
        )));
    }
    let aggregated = !query.grouping().is_empty()
        || query.select.iter().any(|s| s.aggregate != Aggregate::None);
    Ok(if aggregated {
        Operation::Aggregation
    } else {
        Operation::SetOp
    })
}

// ============================================================================
// Compilation
// ============================================================================

/// A compiled query, ready to send.
#[derive(Debug, Clone)]
pub enum Compiled {
    Aggs(AggsPlan),
    SetOp(SetOpPlan),
}

impl Compiled {
    pub fn operation(&self) -> Operation {
        match self {
            Compiled::Aggs(_) => Operation::Aggregation,
            Compiled::SetOp(_) => Operation::SetOp,
        }
    }

    /// The backend request body.
    pub fn request(&self) -> &Value {
        match self {
            Compiled::Aggs(plan) => &plan.request,
            Compiled::SetOp(plan) => &plan.request,
        }
    }
}

/// Classify and compile `query` against `schema`.
#[instrument(skip_all, fields(from = %query.from, version = %version))]
pub fn compile(
    query: &Query,
    schema: &dyn Schema,
    version: &str,
    options: &CompileOptions,
) -> QueryResult<Compiled> {
    let operation = classify(query, version)?;
    debug!(
        operation = operation.name(),
        deep = schema.query_depth() != ROOT,
        "query classified"
    );
    let options = options.clone().with_backend_version(version);
    match operation {
        Operation::Aggregation => compile_aggs(query, schema, &options).map(Compiled::Aggs),
        Operation::SetOp => compile_setop(query, schema, &options).map(Compiled::SetOp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Select;
    use crate::schema::{Catalog, Column, JxType};
    use serde_json::json;

    fn schema() -> Catalog {
        Catalog::new("t", vec![Column::new("a", "a.~n~", JxType::Number)])
    }

    #[test]
    fn test_grouping_is_aggregation() {
        let q = Query::from_json(&json!({"from": "t", "groupby": "a"})).unwrap();
        assert_eq!(classify(&q, "6.8.2").unwrap(), Operation::Aggregation);
    }

    #[test]
    fn test_aggregate_select_is_aggregation() {
        let q = Query::from_json(&json!({"from": "t", "select": {"value": "a", "aggregate": "sum"}})).unwrap();
        assert_eq!(classify(&q, "7.10.1").unwrap(), Operation::Aggregation);
    }

    #[test]
    fn test_plain_select_is_setop() {
        let q = Query::from_json(&json!({"from": "t", "select": ["a"]})).unwrap();
        assert_eq!(classify(&q, "5.6.0").unwrap(), Operation::SetOp);

        let mut q = Query::over("t");
        q.select = vec![Select::field("a")];
        assert_eq!(classify(&q, "1.7.5").unwrap(), Operation::SetOp);
    }

    #[test]
    fn test_unsupported_version() {
        let q = Query::from_json(&json!({"from": "t"})).unwrap();
        assert!(matches!(
            classify(&q, "0.90.1").unwrap_err(),
            QueryError::InvalidQuery(_)
        ));
    }

    #[test]
    fn test_compile_dispatches() {
        let q = Query::from_json(&json!({"from": "t", "groupby": "a"})).unwrap();
        let compiled = compile(&q, &schema(), "6.8.2", &CompileOptions::default()).unwrap();
        assert_eq!(compiled.operation(), Operation::Aggregation);
        assert_eq!(compiled.request()["size"], json!(0));

        let q = Query::from_json(&json!({"from": "t", "select": "a"})).unwrap();
        let compiled = compile(&q, &schema(), "6.8.2", &CompileOptions::default()).unwrap();
        assert_eq!(compiled.operation(), Operation::SetOp);
        assert_eq!(compiled.request()["stored_fields"], json!(["a.~n~"]));
    }
}
