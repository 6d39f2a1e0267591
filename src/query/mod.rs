//! Query model.
//!
//! A query projects selects over a table, optionally grouped by edges (a
//! complete cross product, cube-shaped) or by groupby (only the combinations
//! that occur). Built from the JSON query format with [`Query::from_json`].

mod parse;

use serde_json::Value;

use crate::expr::Expr;
use crate::schema::ROOT;

/// Rows returned when a query does not say.
pub const DEFAULT_LIMIT: usize = 10;

/// Output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    List,
    Table,
    Cube,
}

impl Format {
    pub fn name(self) -> &'static str {
        match self {
            Format::List => "list",
            Format::Table => "table",
            Format::Cube => "cube",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

impl SortDir {
    pub fn name(self) -> &'static str {
        match self {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        }
    }

    /// `1` ascending, `-1` descending.
    pub fn sign(self) -> i32 {
        match self {
            SortDir::Asc => 1,
            SortDir::Desc => -1,
        }
    }
}

/// An aggregate applied to a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    None,
    Count,
    Sum,
    Min,
    Max,
    Avg,
    Std,
    Var,
    SumOfSquares,
    Median,
    Percentile,
    Cardinality,
    Stats,
    Union,
    CountValues,
}

impl Aggregate {
    pub fn name(self) -> &'static str {
        match self {
            Aggregate::None => "none",
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Avg => "avg",
            Aggregate::Std => "std",
            Aggregate::Var => "var",
            Aggregate::SumOfSquares => "sum_of_squares",
            Aggregate::Median => "median",
            Aggregate::Percentile => "percentile",
            Aggregate::Cardinality => "cardinality",
            Aggregate::Stats => "stats",
            Aggregate::Union => "union",
            Aggregate::CountValues => "count_values",
        }
    }

    /// Sub-field of the backend's extended statistics holding this aggregate.
    pub fn stats_field(self) -> Option<&'static str> {
        match self {
            Aggregate::Count => Some("count"),
            Aggregate::Sum => Some("sum"),
            Aggregate::Min => Some("min"),
            Aggregate::Max => Some("max"),
            Aggregate::Avg => Some("avg"),
            Aggregate::Std => Some("std_deviation"),
            Aggregate::Var => Some("variance"),
            Aggregate::SumOfSquares => Some("sum_of_squares"),
            _ => None,
        }
    }

    /// Results of this aggregate over disjoint buckets can be added.
    pub fn is_additive(self) -> bool {
        matches!(self, Aggregate::Count | Aggregate::Sum | Aggregate::SumOfSquares)
    }

    /// Value reported for empty cells.
    pub fn default_value(self) -> Value {
        match self {
            Aggregate::Count | Aggregate::Cardinality => Value::from(0),
            _ => Value::Null,
        }
    }
}

/// One projected column.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub name: String,
    pub value: Expr,
    pub aggregate: Aggregate,
    /// Fraction in `[0, 1]` for percentile aggregates.
    pub percentile: Option<f64>,
    /// Value used when the aggregate is null.
    pub default: Value,
}

impl Select {
    /// `count` of documents.
    pub fn count() -> Self {
        Self {
            name: "count".to_string(),
            value: Expr::root(),
            aggregate: Aggregate::Count,
            percentile: None,
            default: Value::from(0),
        }
    }

    /// Plain projection of a field.
    pub fn field(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Expr::var(name),
            aggregate: Aggregate::None,
            percentile: None,
            default: Value::Null,
        }
    }

    pub fn with_aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = aggregate;
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Counts the documents themselves rather than a field.
    pub fn is_count_of_root(&self) -> bool {
        self.aggregate == Aggregate::Count && self.value.as_variable() == Some(ROOT)
    }
}

/// Whether the query selected a single expression or a list of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectShape {
    Single,
    #[default]
    List,
}

/// A partition of an enumerated domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub name: Option<String>,
    pub value: Value,
    /// Documents belonging to this partition, when not matched by value.
    pub filter: Option<Expr>,
}

impl Partition {
    pub fn of(value: impl Into<Value>) -> Self {
        Self {
            name: None,
            value: value.into(),
            filter: None,
        }
    }
}

/// Values an edge can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Domain {
    /// Unknown until the response is seen.
    Default { sort: Option<SortDir> },
    /// Enumerated up front.
    Set { partitions: Vec<Partition> },
    /// Continuous, cut into `interval`-wide partitions over `[min, max)`.
    Range { min: f64, max: f64, interval: f64 },
    /// Several fields grouped together; values discovered.
    Dimension { fields: Vec<String> },
}

impl Default for Domain {
    fn default() -> Self {
        Domain::Default { sort: None }
    }
}

/// Interval-valued edge: each document spans `[min, max)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeRange {
    pub min: Expr,
    pub max: Expr,
}

/// A grouping dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub name: String,
    pub value: Option<Expr>,
    pub range: Option<EdgeRange>,
    pub domain: Domain,
    pub limit: Option<usize>,
    /// Adds a trailing partition for missing and out-of-domain values.
    pub allow_nulls: bool,
}

impl Edge {
    /// Group by a field with a discovered domain.
    pub fn field(name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: Some(Expr::var(name)),
            range: None,
            domain: Domain::default(),
            limit: None,
            allow_nulls: true,
        }
    }

    pub fn with_domain(mut self, domain: Domain) -> Self {
        self.domain = domain;
        self
    }

    /// Field references this edge depends on.
    pub fn vars(&self) -> Vec<String> {
        let mut vars = std::collections::BTreeSet::new();
        if let Some(value) = &self.value {
            vars.extend(value.vars());
        }
        if let Some(range) = &self.range {
            vars.extend(range.min.vars());
            vars.extend(range.max.vars());
        }
        match &self.domain {
            Domain::Dimension { fields } => vars.extend(fields.iter().cloned()),
            Domain::Set { partitions } => {
                for p in partitions {
                    if let Some(filter) = &p.filter {
                        vars.extend(filter.vars());
                    }
                }
            }
            _ => {}
        }
        vars.into_iter().collect()
    }
}

/// One sort term.
#[derive(Debug, Clone, PartialEq)]
pub struct SortTerm {
    pub value: Expr,
    pub dir: SortDir,
}

/// Query metadata.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryMeta {
    /// Persist the query and report its id.
    pub save: bool,
}

/// An analytic query.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub from: String,
    pub select: Vec<Select>,
    pub select_shape: SelectShape,
    pub edges: Vec<Edge>,
    pub groupby: Vec<Edge>,
    pub where_: Expr,
    pub sort: Vec<SortTerm>,
    pub limit: Option<usize>,
    pub format: Format,
    pub meta: QueryMeta,
    /// The JSON this query was read from, kept for saving.
    pub source: Option<Value>,
}

impl Query {
    /// A query over `from` with no clauses.
    pub fn over(from: &str) -> Self {
        Self {
            from: from.to_string(),
            select: Vec::new(),
            select_shape: SelectShape::List,
            edges: Vec::new(),
            groupby: Vec::new(),
            where_: Expr::truth(),
            sort: Vec::new(),
            limit: None,
            format: Format::List,
            meta: QueryMeta::default(),
            source: None,
        }
    }

    /// Edges, or groupby treated as edges.
    pub fn grouping(&self) -> &[Edge] {
        if self.edges.is_empty() {
            &self.groupby
        } else {
            &self.edges
        }
    }

    pub fn is_groupby(&self) -> bool {
        self.edges.is_empty() && !self.groupby.is_empty()
    }

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT)
    }
}
