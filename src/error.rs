//! Error taxonomy for queries.
//!
//! Every variant aborts the whole query; nothing is downgraded to a partial
//! result.

use serde_json::Value;

use crate::backend::BackendError;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors that can occur while compiling, running or formatting a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// A referenced field has no backing column in the schema.
    #[error("{field} does not exist in schema")]
    SchemaResolution { field: String },

    /// The aggregate is not valid for the operand shape.
    #[error("{aggregate} is not supported {context}")]
    UnsupportedAggregate { aggregate: String, context: String },

    /// A single expression references columns at more than one nested depth.
    #[error("expression {expr} spans nested paths {paths:?}, can not handle")]
    CrossPathExpression { expr: String, paths: Vec<String> },

    /// Sort references something other than an edge.
    #[error("can not sort by {expr}, can only sort by an existing edge expression")]
    UnknownSortTarget { expr: String },

    /// Requested output format has no formatter.
    #[error("format {0:?} not supported yet")]
    UnsupportedFormat(String),

    /// The backend call failed. Never retried here.
    #[error("backend call failed: {source}")]
    BackendCall {
        #[source]
        source: BackendError,
        /// The request that was attempted.
        request: Box<Value>,
    },

    /// Decoding or formatting the response failed.
    #[error("problem formatting row {row}: {message}")]
    Formatting { row: String, message: String },

    /// A discovery decoder was asked for an index before its domain was frozen.
    #[error("domain of edge {edge:?} is not known until counting is done")]
    DomainNotFrozen { edge: String },

    /// The query or one of its expressions is malformed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl QueryError {
    pub fn unsupported(aggregate: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnsupportedAggregate {
            aggregate: aggregate.into(),
            context: context.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::SchemaResolution {
            field: field.into(),
        }
    }

    pub fn formatting(row: &Value, message: impl Into<String>) -> Self {
        Self::Formatting {
            row: row.to_string(),
            message: message.into(),
        }
    }

    /// The request attached to a backend failure, for diagnostics.
    pub fn attempted_request(&self) -> Option<&Value> {
        match self {
            Self::BackendCall { request, .. } => Some(request),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidQuery(err.to_string())
    }
}
