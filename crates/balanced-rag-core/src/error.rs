//! Error kinds shared by the ingestion pipeline and the retriever.
//!
//! Gateways and stores map their native failures onto these variants so
//! that callers (the HTTP layer in particular) can tell a client error from
//! a retriable timeout from a hard upstream failure.

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    /// Empty or oversized user input.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// An embedding, completion, or store call exceeded its deadline.
    #[error("{operation} timed out after {timeout_ms}ms")]
    UpstreamTimeout {
        operation: String,
        timeout_ms: u64,
    },

    /// A non-timeout failure reported by an external gateway or the store.
    #[error("{operation} failed: {message}")]
    UpstreamFailure { operation: String, message: String },

    /// A dataset could not be read or parsed.
    #[error("dataset error: {0}")]
    Dataset(String),
}

impl RagError {
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::UpstreamTimeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn upstream(operation: impl Into<String>, message: impl ToString) -> Self {
        Self::UpstreamFailure {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Whether re-issuing the same call may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::UpstreamTimeout { .. })
    }
}
