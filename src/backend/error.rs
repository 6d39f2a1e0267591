//! Backend-specific error types.

use thiserror::Error;

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors a backend call can end with.
#[derive(Error, Debug)]
pub enum BackendError {
    /// The call did not finish in time.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// The connection failed before a response arrived.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The backend answered with an error.
    #[error("backend error: {reason} (status: {status})")]
    Remote {
        /// HTTP-like status reported by the backend.
        status: u16,
        /// Error description from the backend.
        reason: String,
    },

    /// The response body was not valid JSON.
    #[error("failed to deserialize response: {0}")]
    DeserializeFailed(#[source] serde_json::Error),

    /// A recorded backend ran out of responses.
    #[error("no recorded response left for index {0}")]
    Exhausted(String),
}

impl BackendError {
    /// Create a remote error from an error response.
    pub fn remote(status: u16, reason: impl Into<String>) -> Self {
        Self::Remote {
            status,
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable. Callers decide; nothing here retries.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) => true,
            Self::Remote { status, .. } => *status == 429 || *status >= 500,
            Self::DeserializeFailed(_) | Self::Exhausted(_) => false,
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::DeserializeFailed(err)
    }
}
