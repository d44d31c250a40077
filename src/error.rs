//! Failure taxonomy for the retrieval core.
//!
//! Errors are split by how callers must react: [`RetrievalError::Transient`]
//! and [`RetrievalError::RateLimited`] are retryable; everything else is not.
//! The application boundary (CLI, MCP tools) converts these into `anyhow`
//! errors with context.

use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the retrieval core.
pub type Result<T> = std::result::Result<T, RetrievalError>;

/// Classified failure from the retrieval core.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Retryable failure from an external dependency: network error,
    /// timeout, or a 5xx response from the embedding API.
    #[error("transient failure: {reason}")]
    Transient { reason: String },

    /// The embedding API signalled a rate limit. Retryable after a cooldown;
    /// `retry_after` carries the server-suggested wait when present.
    #[error("rate limited by embedding API")]
    RateLimited { retry_after: Option<Duration> },

    /// Non-retryable input failure: malformed document, auth rejection,
    /// or an embedding dimension that does not match the configured corpus
    /// dimension.
    #[error("permanent input failure: {reason}")]
    PermanentInput { reason: String },

    /// A chunk exists in one index but not the other. Should be unreachable
    /// under correct operation; logged at ERROR and repaired by rollback.
    #[error("index inconsistency: {vector_only} chunk(s) only in vector store, {lexical_only} only in lexical index")]
    Inconsistent {
        vector_only: usize,
        lexical_only: usize,
    },

    /// Backpressure: the embedding admission gate (or another bounded
    /// resource) could not admit the call before its deadline. No data loss.
    #[error("resource exhausted: {reason}")]
    Exhausted { reason: String },

    /// An external call exceeded its deadline.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Storage backend failure (SQLite, in-memory poisoning).
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl RetrievalError {
    /// Whether the retry loop may attempt this operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RetrievalError::Transient { .. }
                | RetrievalError::RateLimited { .. }
                | RetrievalError::Timeout(_)
        )
    }

    pub fn transient(reason: impl Into<String>) -> Self {
        RetrievalError::Transient {
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        RetrievalError::PermanentInput {
            reason: reason.into(),
        }
    }
}
