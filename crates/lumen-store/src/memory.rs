//! In-memory record store and catalog fetcher.
//!
//! Implements the full [`RecordStore`] contract, including concurrency
//! tokens, and keeps counters so callers can assert how many writes
//! actually reached the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::trace;

use crate::{
    CatalogFetcher, CatalogSnapshot, CreatedRecord, NewRecord, RecordKind, RecordPayload,
    RecordStore, StoreError, StoredRecord,
};

/// Thread-safe in-memory [`RecordStore`].
pub struct MemoryRecordStore {
    records: DashMap<String, StoredRecord>,
    next_token: AtomicU64,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    unavailable: AtomicBool,
}

impl MemoryRecordStore {
    /// Create a new empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn mint_token(&self) -> String {
        (self.next_token.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Make [`RecordStore::ensure_ready`] fail, as if the backing store could
    /// not be provisioned.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful creates and updates.
    pub fn write_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst) + self.updates.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get a record by id.
    pub fn get(&self, id: &str) -> Option<StoredRecord> {
        self.records.get(id).map(|r| r.value().clone())
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self {
            records: DashMap::new(),
            next_token: AtomicU64::new(0),
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
        }
    }
}

fn language_matches(record: Option<&str>, wanted: Option<&str>) -> bool {
    match (record, wanted) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn ensure_ready(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    async fn read(
        &self,
        kind: RecordKind,
        source_id: &str,
        language: Option<&str>,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let found = self
            .records
            .iter()
            .filter(|r| {
                r.kind == kind
                    && r.source_id == source_id
                    && language_matches(r.language.as_deref(), language)
            })
            .max_by_key(|r| r.last_updated)
            .map(|r| r.value().clone());
        Ok(found)
    }

    async fn list(
        &self,
        kind: RecordKind,
        source_id: &str,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let mut records: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.kind == kind && r.source_id == source_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.last_updated
                .cmp(&b.last_updated)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn create(&self, record: NewRecord) -> Result<CreatedRecord, StoreError> {
        let id = uuid::Uuid::new_v4().to_string();
        let token = self.mint_token();
        let stored = StoredRecord {
            id: id.clone(),
            kind: record.kind,
            source_id: record.source_id,
            language: record.language,
            concurrency_token: token.clone(),
            schema_version: record.payload.schema_version,
            payload_json: record.payload.payload_json,
            last_updated: Utc::now(),
        };
        trace!(kind = %stored.kind, id = %id, "memory store: record created");
        self.records.insert(id.clone(), stored);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(CreatedRecord {
            id,
            concurrency_token: token,
        })
    }

    async fn update(
        &self,
        kind: RecordKind,
        id: &str,
        payload: RecordPayload,
        concurrency_token: &str,
    ) -> Result<String, StoreError> {
        let mut entry = self
            .records
            .get_mut(id)
            .filter(|r| r.kind == kind)
            .ok_or_else(|| StoreError::NotFound {
                kind,
                id: id.to_string(),
            })?;

        if entry.concurrency_token != concurrency_token {
            return Err(StoreError::Conflict {
                kind,
                id: id.to_string(),
            });
        }

        let token = self.mint_token();
        entry.concurrency_token = token.clone();
        entry.schema_version = payload.schema_version;
        entry.payload_json = payload.payload_json;
        entry.last_updated = Utc::now();
        drop(entry);

        trace!(kind = %kind, id = %id, "memory store: record updated");
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(token)
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<(), StoreError> {
        match self.records.remove_if(id, |_, r| r.kind == kind) {
            Some(_) => {
                self.deletes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }
}

/// [`CatalogFetcher`] serving snapshots registered in memory.
pub struct MemoryCatalogFetcher {
    catalogs: DashMap<(String, String), CatalogSnapshot>,
    fetches: AtomicUsize,
    delay_ms: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryCatalogFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register the snapshot served for (`base_url`, `language`).
    pub fn insert(&self, base_url: &str, language: &str, snapshot: CatalogSnapshot) {
        self.catalogs.insert(
            (base_url.to_string(), language.to_ascii_lowercase()),
            snapshot,
        );
    }

    /// Fail every fetch, as if the remote endpoint were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Sleep this long before answering each fetch.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of fetches attempted, successful or not.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for MemoryCatalogFetcher {
    fn default() -> Self {
        Self {
            catalogs: DashMap::new(),
            fetches: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl CatalogFetcher for MemoryCatalogFetcher {
    async fn fetch(&self, base_url: &str, language: &str) -> Option<CatalogSnapshot> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            trace!(base_url, language, "memory fetcher: unavailable");
            return None;
        }
        self.catalogs
            .get(&(base_url.to_string(), language.to_ascii_lowercase()))
            .map(|c| c.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SchemaVersion;

    fn payload(json: &str) -> RecordPayload {
        RecordPayload {
            schema_version: SchemaVersion(4),
            payload_json: json.to_string(),
        }
    }

    fn new_record(kind: RecordKind, language: Option<&str>, json: &str) -> NewRecord {
        NewRecord {
            kind,
            source_id: "Default".to_string(),
            language: language.map(String::from),
            payload: payload(json),
        }
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let store = MemoryRecordStore::new();
        let created = store
            .create(new_record(RecordKind::Cache, Some("en-us"), "{}"))
            .await
            .unwrap();

        let read = store
            .read(RecordKind::Cache, "Default", Some("EN-US"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.id, created.id);
        assert_eq!(read.concurrency_token, created.concurrency_token);

        // Language-scoped records are not visible to language-less reads.
        assert!(
            store
                .read(RecordKind::Cache, "Default", None)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_update_rotates_token() {
        let store = MemoryRecordStore::new();
        let created = store
            .create(new_record(RecordKind::Overrides, None, "{}"))
            .await
            .unwrap();

        let token = store
            .update(
                RecordKind::Overrides,
                &created.id,
                payload("{\"a\":1}"),
                &created.concurrency_token,
            )
            .await
            .unwrap();
        assert_ne!(token, created.concurrency_token);
        assert_eq!(store.get(&created.id).unwrap().payload_json, "{\"a\":1}");
        assert_eq!(store.write_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_token_conflicts() {
        let store = MemoryRecordStore::new();
        let created = store
            .create(new_record(RecordKind::Overrides, None, "{}"))
            .await
            .unwrap();
        store
            .update(
                RecordKind::Overrides,
                &created.id,
                payload("{}"),
                &created.concurrency_token,
            )
            .await
            .unwrap();

        let err = store
            .update(
                RecordKind::Overrides,
                &created.id,
                payload("{}"),
                &created.concurrency_token,
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_delete_and_list() {
        let store = MemoryRecordStore::new();
        let a = store
            .create(new_record(RecordKind::Playlist, None, "{}"))
            .await
            .unwrap();
        store
            .create(new_record(RecordKind::Playlist, None, "{}"))
            .await
            .unwrap();
        store
            .create(new_record(RecordKind::Asset, None, "{}"))
            .await
            .unwrap();

        assert_eq!(
            store
                .list(RecordKind::Playlist, "Default")
                .await
                .unwrap()
                .len(),
            2
        );

        store.delete(RecordKind::Playlist, &a.id).await.unwrap();
        assert_eq!(store.delete_count(), 1);
        assert!(matches!(
            store.delete(RecordKind::Playlist, &a.id).await,
            Err(StoreError::NotFound { .. })
        ));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_validation() {
        let store = MemoryRecordStore::new();
        assert!(store.ensure_ready().await.is_ok());
        store.set_unavailable(true);
        assert!(matches!(
            store.ensure_ready().await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_fetcher_counts_and_fails() {
        let fetcher = MemoryCatalogFetcher::new();
        let snapshot = CatalogSnapshot {
            schema_version: "v4".to_string(),
            categories: vec![],
            technologies: vec![],
            supported_languages: vec!["en-us".to_string()],
            telemetry_key: String::new(),
            asset_origins: vec![],
            playlists: vec![],
            assets: vec![],
        };
        fetcher.insert("https://cdn.test", "en-us", snapshot.clone());

        assert_eq!(
            fetcher.fetch("https://cdn.test", "EN-US").await,
            Some(snapshot)
        );
        assert_eq!(fetcher.fetch("https://cdn.test", "fr-fr").await, None);

        fetcher.set_unavailable(true);
        assert_eq!(fetcher.fetch("https://cdn.test", "en-us").await, None);
        assert_eq!(fetcher.fetch_count(), 3);
    }
}
