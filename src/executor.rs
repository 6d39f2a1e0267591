//! Query execution against a backend.
//!
//! ```text
//! Query → compile → Backend::search → decode → format → QueryOutput
//! ```
//!
//! The only await is the backend call, so one [`Executor`] can serve many
//! queries at once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::backend::{Backend, BackendError};
use crate::compile::{compile, CompileOptions, Compiled};
use crate::error::{QueryError, QueryResult};
use crate::format::{format_aggs, Formatted, QueryOutput, Timing};
use crate::query::Query;
use crate::response::aggregations_root;
use crate::saved::SavedQueryStore;
use crate::schema::{path, Catalog};
use crate::setop::format_hits;
use crate::walker;

/// Runs queries through one backend.
pub struct Executor {
    backend: Arc<dyn Backend>,
    options: CompileOptions,
    index_prefix: String,
    timeout: Option<Duration>,
    store: Option<Arc<dyn SavedQueryStore>>,
}

impl Executor {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            options: CompileOptions::default(),
            index_prefix: String::new(),
            timeout: None,
            store: None,
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    /// Prepended to the table name to get the index searched.
    pub fn with_index_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.index_prefix = prefix.into();
        self
    }

    /// Give up on a search after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Where queries marked `meta.save` are kept.
    pub fn with_store(mut self, store: Arc<dyn SavedQueryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run one query over `catalog`.
    #[instrument(skip_all, fields(query_id = %Uuid::new_v4(), from = %query.from))]
    pub async fn execute(&self, query: &Query, catalog: &Catalog) -> QueryResult<QueryOutput> {
        let (table, nested) = path::split_table(&query.from);
        let schema = catalog.scoped_to(nested)?;
        let compiled = compile(query, &schema, self.backend.version(), &self.options)?;
        let request = compiled.request().clone();
        let index = format!("{}{}", self.index_prefix, table);

        let started = Instant::now();
        let response = self
            .search(&index, &request)
            .await
            .map_err(|source| QueryError::BackendCall {
                source,
                request: Box::new(request.clone()),
            })?;
        let backend_time = started.elapsed();

        let started = Instant::now();
        let formatted = decode(query, compiled, &response)?;
        let formatting_time = started.elapsed();

        let timing = Timing {
            backend: backend_time.as_secs_f64(),
            formatting: formatting_time.as_secs_f64(),
        };
        info!(
            operation = formatted.format,
            backend = timing.backend,
            formatting = timing.formatting,
            "query done"
        );

        let mut output = QueryOutput::new(formatted, request, timing);
        output.meta.saved_as = self.save(query).await?;
        Ok(output)
    }

    /// Run several queries concurrently; the first failure wins.
    pub async fn execute_all(&self, queries: &[Query], catalog: &Catalog) -> QueryResult<Vec<QueryOutput>> {
        futures::future::try_join_all(queries.iter().map(|q| self.execute(q, catalog))).await
    }

    async fn search(&self, index: &str, request: &Value) -> Result<Value, BackendError> {
        let call = self.backend.search(index, request);
        match self.timeout {
            None => call.await,
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| BackendError::Timeout(limit.as_secs()))?,
        }
    }

    async fn save(&self, query: &Query) -> QueryResult<Option<String>> {
        let (Some(store), Some(source)) = (&self.store, &query.source) else {
            return Ok(None);
        };
        if !query.meta.save {
            return Ok(None);
        }
        let id = store.save(source).await?;
        debug!(id = %id, "query saved");
        Ok(Some(id))
    }
}

/// Turn a raw response into the query's output shape.
pub fn decode(query: &Query, compiled: Compiled, response: &Value) -> QueryResult<Formatted> {
    match compiled {
        Compiled::Aggs(mut plan) => {
            let root = aggregations_root(response);
            walker::count_dim(&root, &mut plan.decoders)?;
            let rows = walker::rows(&root, &plan.decoders)?;
            format_aggs(query, &plan, &rows)
        }
        Compiled::SetOp(plan) => format_hits(query, &plan, response),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StaticBackend;
    use crate::saved::MemoryStore;
    use crate::schema::{Column, JxType};
    use serde_json::json;

    fn catalog() -> Catalog {
        Catalog::new("t", vec![Column::new("a", "a.~n~", JxType::Number)])
    }

    #[tokio::test]
    async fn test_count_value() {
        let backend = StaticBackend::new("6.8.2").with_response(json!({
            "hits": {"total": 2, "hits": []},
            "aggregations": {}
        }));
        let executor = Executor::new(Arc::new(backend));
        let query = Query::from_json(&json!({"from": "t", "select": {"aggregate": "count"}})).unwrap();
        let output = executor.execute(&query, &catalog()).await.unwrap();
        assert_eq!(output.meta.format, "value");
        assert_eq!(output.data, json!(2));
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_request() {
        let backend = StaticBackend::new("6.8.2").with_error(BackendError::remote(503, "busy"));
        let executor = Executor::new(Arc::new(backend));
        let query = Query::from_json(&json!({"from": "t", "select": "a"})).unwrap();
        let err = executor.execute(&query, &catalog()).await.unwrap_err();
        assert!(matches!(err, QueryError::BackendCall { .. }));
        assert_eq!(err.attempted_request().unwrap()["size"], json!(10));
    }

    #[tokio::test]
    async fn test_saved_as() {
        let backend = StaticBackend::new("6.8.2").with_response(json!({"hits": {"total": 0, "hits": []}}));
        let executor = Executor::new(Arc::new(backend)).with_store(Arc::new(MemoryStore::new()));
        let source = json!({"from": "t", "select": "a", "meta": {"save": true}});
        let query = Query::from_json(&source).unwrap();
        let output = executor.execute(&query, &catalog()).await.unwrap();
        assert_eq!(output.meta.saved_as, Some(crate::saved::query_hash(&source)));
    }
}
