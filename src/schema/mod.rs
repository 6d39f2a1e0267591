//! Column catalog consumed by the compilers.
//!
//! A logical field name may be backed by several physical columns (one per
//! JSON type), and each column knows the chain of nested documents it lives
//! in. The compilers only ever talk to the catalog through [`Schema`].

mod infer;
pub mod path;

pub use infer::infer_columns;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};

/// Name of the document root in nested paths.
pub const ROOT: &str = ".";

/// Type of a column as seen by queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JxType {
    String,
    Number,
    Boolean,
    Object,
    Nested,
    Exists,
}

impl JxType {
    /// Object and nested columns are containers, everything else holds values.
    pub fn is_leaf(self) -> bool {
        !matches!(self, JxType::Object | JxType::Nested)
    }

    /// Backend mapping type used when a catalog is inferred.
    pub fn es_type(self) -> &'static str {
        match self {
            JxType::String => "keyword",
            JxType::Number => "double",
            JxType::Boolean => "boolean",
            JxType::Object => "object",
            JxType::Nested => "nested",
            JxType::Exists => "long",
        }
    }
}

/// One physical column backing a logical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Logical name, relative to the document root.
    pub name: String,
    /// Physical field identifier used in backend requests.
    pub es_column: String,
    #[serde(default)]
    pub es_type: String,
    pub jx_type: JxType,
    /// Nested documents containing this column, innermost first, ending at `.`.
    #[serde(default = "root_path")]
    pub nested_path: Vec<String>,
}

fn root_path() -> Vec<String> {
    vec![ROOT.to_string()]
}

impl Column {
    pub fn new(name: &str, es_column: &str, jx_type: JxType) -> Self {
        Self {
            name: name.to_string(),
            es_column: es_column.to_string(),
            es_type: jx_type.es_type().to_string(),
            jx_type,
            nested_path: root_path(),
        }
    }

    /// Place the column under nested documents (innermost first, root implied).
    pub fn nested_in(mut self, paths: &[&str]) -> Self {
        let mut nested_path: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        nested_path.push(ROOT.to_string());
        self.nested_path = nested_path;
        self
    }

    /// Innermost nested document holding this column.
    pub fn depth(&self) -> &str {
        self.nested_path.first().map(String::as_str).unwrap_or(ROOT)
    }

    /// Name as seen from inside the nested document `nested`.
    pub fn name_relative_to(&self, nested: &str) -> String {
        path::relative(&self.name, nested)
    }
}

/// The catalog queries resolve field references against.
pub trait Schema: Send + Sync {
    /// Leaf columns at or below `name`.
    fn leaves(&self, name: &str) -> Vec<Column>;

    /// Columns backing exactly `name`, skipping the given types.
    fn values(&self, name: &str, exclude: &[JxType]) -> Vec<Column>;

    /// Nested path the query runs over, innermost first.
    fn query_path(&self) -> &[String];

    /// Innermost query path.
    fn query_depth(&self) -> &str {
        self.query_path().first().map(String::as_str).unwrap_or(ROOT)
    }
}

/// In-memory catalog for one table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub table: String,
    pub columns: Vec<Column>,
    #[serde(default = "root_path")]
    pub query_path: Vec<String>,
}

impl Catalog {
    pub fn new(table: &str, columns: Vec<Column>) -> Self {
        Self {
            table: table.to_string(),
            columns,
            query_path: root_path(),
        }
    }

    /// Build a catalog by inspecting sample documents.
    pub fn from_documents(table: &str, docs: &[serde_json::Value]) -> Self {
        Self::new(table, infer_columns(docs))
    }

    /// The same catalog, queried from inside the nested document `nested`.
    pub fn scoped_to(&self, nested: &str) -> QueryResult<Catalog> {
        if nested == ROOT {
            return Ok(Catalog::new(&self.table, self.columns.clone()));
        }
        let column = self
            .columns
            .iter()
            .find(|c| c.jx_type == JxType::Nested && c.name == nested)
            .ok_or_else(|| QueryError::missing_field(format!("{}.{}", self.table, nested)))?;
        Ok(Catalog {
            table: self.table.clone(),
            columns: self.columns.clone(),
            query_path: column.nested_path.clone(),
        })
    }

    /// Candidate absolute names for a reference made from the query path.
    fn absolute_names(&self, name: &str) -> Vec<String> {
        let depth = self.query_depth();
        if depth == ROOT || name == ROOT {
            vec![name.to_string()]
        } else {
            vec![path::join(depth, name), name.to_string()]
        }
    }
}

impl Schema for Catalog {
    fn leaves(&self, name: &str) -> Vec<Column> {
        for candidate in self.absolute_names(name) {
            let found: Vec<Column> = self
                .columns
                .iter()
                .filter(|c| c.jx_type.is_leaf() && path::is_prefix(&candidate, &c.name))
                .cloned()
                .collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    fn values(&self, name: &str, exclude: &[JxType]) -> Vec<Column> {
        for candidate in self.absolute_names(name) {
            let found: Vec<Column> = self
                .columns
                .iter()
                .filter(|c| c.name == candidate && !exclude.contains(&c.jx_type))
                .cloned()
                .collect();
            if !found.is_empty() {
                return found;
            }
        }
        Vec::new()
    }

    fn query_path(&self) -> &[String] {
        &self.query_path
    }
}
