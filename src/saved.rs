//! Saved queries.
//!
//! A saved query is addressed by a short id derived from its content, so
//! saving the same query twice yields the same id.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use tokio::sync::RwLock;

use crate::error::QueryResult;

/// Bytes of the digest kept in an id.
const ID_BYTES: usize = 6;

/// Keys sorted at every level, so equal queries serialize equally.
fn canonical(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let sorted: Map<String, Value> = keys
                .into_iter()
                .map(|k| (k.clone(), canonical(&map[k])))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        other => other.clone(),
    }
}

/// Stable id of a query: base64 of the first bytes of its SHA-1 digest,
/// made path-safe.
pub fn query_hash(query: &Value) -> String {
    let json = canonical(query).to_string();
    let mut hasher = Sha1::new();
    hasher.update(json.as_bytes());
    let digest = hasher.finalize();
    BASE64.encode(&digest[..ID_BYTES]).replace('/', "_")
}

/// Somewhere to keep saved queries.
#[async_trait]
pub trait SavedQueryStore: Send + Sync {
    /// Save `query` and return its id.
    async fn save(&self, query: &Value) -> QueryResult<String>;

    async fn find(&self, id: &str) -> QueryResult<Option<Value>>;
}

/// Saved queries kept in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    queries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SavedQueryStore for MemoryStore {
    async fn save(&self, query: &Value) -> QueryResult<String> {
        let id = query_hash(query);
        self.queries
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| query.clone());
        Ok(id)
    }

    async fn find(&self, id: &str) -> QueryResult<Option<Value>> {
        Ok(self.queries.read().await.get(id).cloned())
    }
}
