//! The record store contract.
//!
//! A record store holds small JSON blobs keyed by (kind, source, language)
//! with an opaque concurrency token per record. Writers must present the
//! token they last read; a stale token is rejected with
//! [`StoreError::Conflict`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{RecordKind, SchemaVersion, StoreError};

/// A persisted record as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredRecord {
    pub id: String,
    pub kind: RecordKind,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub concurrency_token: String,
    pub schema_version: SchemaVersion,
    pub payload_json: String,
    pub last_updated: DateTime<Utc>,
}

impl StoredRecord {
    /// Decode the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.payload_json)
    }
}

/// Versioned payload for a create or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayload {
    pub schema_version: SchemaVersion,
    pub payload_json: String,
}

impl RecordPayload {
    /// Serialize `value` as a payload stamped with `schema_version`.
    pub fn encode<T: Serialize>(
        schema_version: SchemaVersion,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            schema_version,
            payload_json: serde_json::to_string(value)?,
        })
    }
}

/// A record to be created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub kind: RecordKind,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(flatten)]
    pub payload: RecordPayload,
}

/// Response from creating a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRecord {
    pub id: String,
    pub concurrency_token: String,
}

/// Read/write access to persisted records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Validate that the backing store exists and is usable.
    async fn ensure_ready(&self) -> Result<(), StoreError>;

    /// Read the singleton record for (kind, source, language).
    async fn read(
        &self,
        kind: RecordKind,
        source_id: &str,
        language: Option<&str>,
    ) -> Result<Option<StoredRecord>, StoreError>;

    /// List every record of `kind` for a source.
    async fn list(&self, kind: RecordKind, source_id: &str)
    -> Result<Vec<StoredRecord>, StoreError>;

    /// Create a record.
    async fn create(&self, record: NewRecord) -> Result<CreatedRecord, StoreError>;

    /// Replace a record's payload, returning the new concurrency token.
    async fn update(
        &self,
        kind: RecordKind,
        id: &str,
        payload: RecordPayload,
        concurrency_token: &str,
    ) -> Result<String, StoreError>;

    /// Delete a record.
    async fn delete(&self, kind: RecordKind, id: &str) -> Result<(), StoreError>;
}
