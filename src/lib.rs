//! # Tessera
//!
//! Compiles analytic queries into search-backend requests and decodes the
//! bucket responses back into tabular shapes.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Query                             │
//! │     (select, edges/groupby, where, sort, limit)          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [compile::classify]
//! ┌───────────────────────────┐   ┌─────────────────────────┐
//! │  aggs (bucket tree        │   │  setop (filtered hits,  │
//! │  + edge decoders)         │   │  stored/script fields)  │
//! └───────────────────────────┘   └─────────────────────────┘
//!                          │
//!                          ▼ [backend::Backend::search]
//! ┌─────────────────────────────────────────────────────────┐
//! │                   Response tree                          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [walker + domain discovery]
//! ┌─────────────────────────────────────────────────────────┐
//! │           Rows (coordinate, leaf bucket)                 │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [format]
//! ┌─────────────────────────────────────────────────────────┐
//! │                list | table | cube                       │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod aggs;
pub mod backend;
pub mod compile;
pub mod config;
pub mod decoder;
pub mod error;
pub mod executor;
pub mod expr;
pub mod format;
pub mod logging;
pub mod query;
pub mod request;
pub mod response;
pub mod saved;
pub mod schema;
pub mod setop;
pub mod walker;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::backend::{Backend, BackendError, StaticBackend};
    pub use crate::compile::{classify, compile, CompileOptions, Compiled, Operation};
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::executor::Executor;
    pub use crate::expr::Expr;
    pub use crate::format::QueryOutput;
    pub use crate::query::{Aggregate, Domain, Edge, Format, Query, Select, SortDir};
    pub use crate::schema::{Catalog, Column, JxType, Schema};
}

pub use error::{QueryError, QueryResult};
pub use executor::Executor;
pub use query::Query;
