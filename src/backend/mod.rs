//! Backend abstraction.
//!
//! The compiler never talks to a search cluster directly. Everything it
//! needs goes through [`Backend`]: the reported version, used to choose a
//! compiler, and a single `search` call per query.

mod error;
mod recorded;

pub use error::{BackendError, BackendResult};
pub use recorded::StaticBackend;

use async_trait::async_trait;
use serde_json::Value;

/// Versions both the aggregation and set-operation compilers support.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.4.", "1.5.", "1.6.", "1.7.", "5.", "6.", "7."];

/// `true` when requests can be compiled for a cluster reporting `version`.
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_VERSIONS.iter().any(|v| version.starts_with(v))
}

/// A search backend.
///
/// # Example
///
/// ```ignore
/// use tessera::backend::Backend;
///
/// async fn example(backend: &impl Backend) -> BackendResult<()> {
///     let response = backend.search("bugs", &json!({"size": 0})).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait Backend: Send + Sync {
    /// Version string the cluster reports, e.g. `"6.8.2"`.
    fn version(&self) -> &str;

    /// Run one request against `index` and return the raw response.
    async fn search(&self, index: &str, request: &Value) -> BackendResult<Value>;

    /// Run several requests.
    ///
    /// Default implementation sends them concurrently using `join_all`.
    async fn search_batch(&self, requests: &[(String, Value)]) -> BackendResult<Vec<Value>> {
        let futures: Vec<_> = requests
            .iter()
            .map(|(index, request)| self.search(index, request))
            .collect();

        let results = futures::future::join_all(futures).await;

        results.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supported_versions() {
        assert!(is_supported("6.8.2"));
        assert!(is_supported("1.7.5"));
        assert!(!is_supported("1.3.0"));
        assert!(!is_supported("8.1.0"));
        assert!(!is_supported("15.0"));
    }
}
