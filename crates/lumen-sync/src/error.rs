//! Error types for cache synchronization.

use lumen_store::{RecordKind, StoreError};
use thiserror::Error;

/// Errors raised inside the synchronization engine.
///
/// None of these cross the coordinator surface: coordinators convert them to
/// `None`/`false` results or state transitions after logging.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote catalog could not be fetched; retried on the next refresh.
    #[error("catalog unavailable for source {source_id} ({language})")]
    TransientFetch { source_id: String, language: String },

    /// A persisted record did not parse; it has been deleted so it regenerates.
    #[error("malformed {kind} record {id}")]
    MalformedRecord { kind: RecordKind, id: String },

    /// A write presented a stale concurrency token.
    #[error("concurrency conflict writing {kind} record {id}")]
    Conflict { kind: RecordKind, id: String },

    /// A single migration step failed; its input was kept.
    #[error("migration of {kind} from v{from} failed: {message}")]
    MigrationStep {
        kind: &'static str,
        from: u32,
        message: String,
    },

    /// The backing store could not be validated or created.
    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),

    /// Store error.
    #[error("store error: {0}")]
    Store(StoreError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { kind, id } => SyncError::Conflict { kind, id },
            StoreError::Unavailable(msg) => SyncError::ConfigurationInvalid(msg),
            other => SyncError::Store(other),
        }
    }
}
