//! A backend that answers from a queue of recorded responses.

use std::collections::VecDeque;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Backend, BackendError, BackendResult};

/// Replays canned responses in order and keeps every request it was sent.
#[derive(Debug)]
pub struct StaticBackend {
    version: String,
    responses: Mutex<VecDeque<BackendResult<Value>>>,
    requests: Mutex<Vec<(String, Value)>>,
}

impl StaticBackend {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response.
    pub fn with_response(mut self, response: Value) -> Self {
        self.responses.get_mut().push_back(Ok(response));
        self
    }

    /// Queue a failure.
    pub fn with_error(mut self, error: BackendError) -> Self {
        self.responses.get_mut().push_back(Err(error));
        self
    }

    /// Requests received so far, oldest first.
    pub async fn requests(&self) -> Vec<(String, Value)> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl Backend for StaticBackend {
    fn version(&self) -> &str {
        &self.version
    }

    async fn search(&self, index: &str, request: &Value) -> BackendResult<Value> {
        self.requests
            .lock()
            .await
            .push((index.to_string(), request.clone()));
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Exhausted(index.to_string())))
    }
}
