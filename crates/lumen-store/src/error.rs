//! Error types for the record store and catalog clients.

use thiserror::Error;

use crate::RecordKind;

/// Errors that can occur when talking to a record store or content source.
#[derive(Debug, Error)]
pub enum StoreError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record not found.
    #[error("record not found: {kind}/{id}")]
    NotFound { kind: RecordKind, id: String },

    /// The concurrency token supplied with a write is stale.
    #[error("concurrency conflict on {kind}/{id}")]
    Conflict { kind: RecordKind, id: String },

    /// Rate limited.
    #[error("rate limited{}", match retry_after_secs {
        Some(secs) => format!(" (retry after {}s)", secs),
        None => String::new(),
    })]
    RateLimited {
        /// Seconds to wait before retrying (from Retry-After header, optional).
        retry_after_secs: Option<u64>,
    },

    /// Structured error returned by the store.
    #[error("store error: {error} - {message}")]
    Remote { error: String, message: String },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The backing store could not be validated or provisioned.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether this error is a stale-token rejection.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
