//! Catalog + overrides merge for one (content source, language) pair.
//!
//! [`merge`] is a pure function over already-fetched inputs. The
//! [`CacheSynchronizer`] around it owns the I/O: loading the catalog, the
//! tenant's overrides and tenant items, persisting the result with the
//! record's concurrency token, and deciding when a persisted cache is fresh
//! enough to reuse.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use lumen_store::{
    Asset, CatalogFetcher, CatalogSnapshot, ContentSource, ItemSource, MergedCache, NewRecord,
    Overrides, Playlist, RecordKind, RecordPayload, RecordStore, SchemaVersion, StoredRecord,
};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::text::{has_translation, localize_asset, localize_playlist, localize_tree};
use crate::tree::{
    ABANDONED_SUB_CATEGORY_ID, abandoned_bucket, assign_counts, collect_ids, compute_paths,
    hide_sub_categories, inject_custom,
};

/// Everything a merge reads.
#[derive(Debug, Clone)]
pub struct SyncInputs {
    /// Shared, never mutated; the merge clones what it transforms.
    pub catalog: Arc<CatalogSnapshot>,
    pub overrides: Overrides,
    pub tenant_playlists: Vec<Playlist>,
    pub tenant_assets: Vec<Asset>,
}

/// Which inputs a refresh reloads before re-merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    Full,
    PlaylistsOnly,
    AssetsOnly,
    CustomOnly,
}

impl RefreshScope {
    fn reloads_catalog(self) -> bool {
        self == RefreshScope::Full
    }

    fn reloads_overrides(self) -> bool {
        matches!(self, RefreshScope::Full | RefreshScope::CustomOnly)
    }

    fn reloads_playlists(self) -> bool {
        matches!(self, RefreshScope::Full | RefreshScope::PlaylistsOnly)
    }

    fn reloads_assets(self) -> bool {
        matches!(self, RefreshScope::Full | RefreshScope::AssetsOnly)
    }
}

/// Merge catalog and overrides into the cache document for `language`.
///
/// The returned cache has no record id or token; [`CacheSynchronizer`]
/// fills those in when it persists.
pub fn merge(inputs: &SyncInputs, language: &str, config: &SyncConfig) -> MergedCache {
    let catalog = inputs.catalog.as_ref();
    let overrides = &inputs.overrides;
    let default_language = config.default_language.as_str();

    let mut categories = catalog.categories.clone();
    compute_paths(&mut categories);
    inject_custom(&mut categories, &overrides.custom_sub_categories);
    compute_paths(&mut categories);

    // Orphans are judged against the tree before anything is hidden.
    let live_ids = collect_ids(&categories);

    let technologies = catalog
        .technologies
        .iter()
        .filter(|t| !overrides.hidden_technology_ids.contains(&t.id))
        .cloned()
        .map(|mut t| {
            t.subjects
                .retain(|s| !overrides.hidden_subject_ids.contains(&s.id));
            t
        })
        .collect();

    let mut categories = hide_sub_categories(categories, &overrides.hidden_sub_category_ids);

    let tenant_playlists = inputs
        .tenant_playlists
        .iter()
        .filter(|p| has_translation(&p.title, language, default_language));
    let mut playlists: Vec<Playlist> = catalog
        .playlists
        .iter()
        .chain(tenant_playlists)
        .map(|p| localize_playlist(p, language, default_language))
        .collect();

    let tenant_assets = inputs
        .tenant_assets
        .iter()
        .filter(|a| has_translation(&a.title, language, default_language));
    let assets: Vec<Asset> = catalog
        .assets
        .iter()
        .chain(tenant_assets)
        .map(|a| localize_asset(a, language, default_language))
        .filter(|a| is_visible(&a.technology_id, &a.subject_id, overrides))
        .collect();

    let mut orphaned = 0;
    for playlist in &mut playlists {
        if !live_ids.contains(&playlist.category_id) {
            debug!(
                playlist = %playlist.id,
                category = %playlist.category_id,
                "playlist category no longer exists"
            );
            playlist.category_id = ABANDONED_SUB_CATEGORY_ID.to_string();
            orphaned += 1;
        }
    }

    playlists.retain(|p| {
        !overrides.hidden_playlist_ids.contains(&p.id)
            && is_visible(&p.technology_id, &p.subject_id, overrides)
    });

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for playlist in &playlists {
        *counts.entry(playlist.category_id.as_str()).or_default() += 1;
    }
    assign_counts(&mut categories, &counts);
    localize_tree(&mut categories, language, default_language);

    if orphaned > 0 {
        let bucket = abandoned_bucket(counts.get(ABANDONED_SUB_CATEGORY_ID).copied().unwrap_or(0));
        categories.insert(0, bucket);
    }

    MergedCache {
        id: None,
        concurrency_token: None,
        language: language.to_string(),
        schema_version: config.schema_version,
        catalog_version: catalog.schema_version.clone(),
        categories,
        technologies,
        cached_playlists: playlists,
        cached_assets: assets,
        asset_origins: catalog.asset_origins.clone(),
        telemetry_key: catalog.telemetry_key.clone(),
        last_updated: Utc::now(),
    }
}

/// Empty ids never match a hidden entry.
fn is_visible(technology_id: &str, subject_id: &str, overrides: &Overrides) -> bool {
    let tech_hidden =
        !technology_id.is_empty() && overrides.hidden_technology_ids.contains(technology_id);
    let subject_hidden =
        !subject_id.is_empty() && overrides.hidden_subject_ids.contains(subject_id);
    !tech_hidden && !subject_hidden
}

/// Builds, persists and reloads the merged cache for one source and language.
pub struct CacheSynchronizer {
    source: ContentSource,
    language: String,
    config: Arc<SyncConfig>,
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn CatalogFetcher>,
    inputs: Mutex<Option<SyncInputs>>,
}

impl CacheSynchronizer {
    pub fn new(
        source: ContentSource,
        language: impl Into<String>,
        config: Arc<SyncConfig>,
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn CatalogFetcher>,
    ) -> Self {
        Self {
            source,
            language: language.into(),
            config,
            store,
            fetcher,
            inputs: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Schema stamp of the persisted cache, without decoding its payload.
    pub async fn persisted_version(&self) -> Result<Option<SchemaVersion>, SyncError> {
        let record = self
            .store
            .read(RecordKind::Cache, &self.source.id, Some(&self.language))
            .await?;
        Ok(record.map(|r| r.schema_version))
    }

    /// The persisted cache, if one exists and parses.
    pub async fn load_cache(&self) -> Result<Option<MergedCache>, SyncError> {
        let Some(record) = self
            .store
            .read(RecordKind::Cache, &self.source.id, Some(&self.language))
            .await?
        else {
            return Ok(None);
        };

        let Some(mut cache) = self.decode_or_heal::<MergedCache>(&record).await? else {
            return Ok(None);
        };
        cache.id = Some(record.id);
        cache.concurrency_token = Some(record.concurrency_token);
        Ok(Some(cache))
    }

    /// The tenant's overrides; absent or malformed records yield the defaults.
    pub async fn load_overrides(&self) -> Result<Overrides, SyncError> {
        let record = self
            .store
            .read(RecordKind::Overrides, &self.source.id, None)
            .await?;
        match record {
            Some(record) => Ok(self.decode_or_heal(&record).await?.unwrap_or_default()),
            None => Ok(Overrides::default()),
        }
    }

    pub async fn load_tenant_playlists(&self) -> Result<Vec<Playlist>, SyncError> {
        let items = self
            .load_items::<Playlist>(RecordKind::Playlist)
            .await?
            .into_iter()
            .map(|(mut p, token)| {
                p.source = ItemSource::Tenant;
                p.concurrency_token = Some(token);
                p
            })
            .collect();
        Ok(items)
    }

    pub async fn load_tenant_assets(&self) -> Result<Vec<Asset>, SyncError> {
        let items = self
            .load_items::<Asset>(RecordKind::Asset)
            .await?
            .into_iter()
            .map(|(mut a, token)| {
                a.source = ItemSource::Tenant;
                a.concurrency_token = Some(token);
                a
            })
            .collect();
        Ok(items)
    }

    async fn load_items<T: DeserializeOwned>(
        &self,
        kind: RecordKind,
    ) -> Result<Vec<(T, String)>, SyncError> {
        let records = self.store.list(kind, &self.source.id).await?;
        let mut items = Vec::with_capacity(records.len());
        for record in records {
            if let Some(item) = self.decode_or_heal::<T>(&record).await? {
                items.push((item, record.concurrency_token));
            }
        }
        Ok(items)
    }

    /// Decode a record's payload. A payload that does not parse is deleted
    /// so the next write regenerates it.
    async fn decode_or_heal<T: DeserializeOwned>(
        &self,
        record: &StoredRecord,
    ) -> Result<Option<T>, SyncError> {
        match record.decode() {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                let err = SyncError::MalformedRecord {
                    kind: record.kind,
                    id: record.id.clone(),
                };
                warn!(error = %e, "{}; deleting", err);
                if let Err(e) = self.store.delete(record.kind, &record.id).await {
                    warn!(kind = %record.kind, id = %record.id, error = %e, "failed to delete malformed record");
                }
                Ok(None)
            }
        }
    }

    async fn fetch_catalog(&self) -> Result<Arc<CatalogSnapshot>, SyncError> {
        self.fetcher
            .fetch(&self.source.base_url, &self.language)
            .await
            .map(Arc::new)
            .ok_or_else(|| SyncError::TransientFetch {
                source_id: self.source.id.clone(),
                language: self.language.clone(),
            })
    }

    /// Load the inputs `scope` asks for, reusing the rest from the last run.
    /// A failed load leaves the held inputs untouched.
    async fn gather(&self, scope: RefreshScope) -> Result<SyncInputs, SyncError> {
        let mut held = self.inputs.lock().await;

        let inputs = match held.as_ref() {
            Some(previous) => {
                let mut inputs = previous.clone();
                if scope.reloads_catalog() {
                    inputs.catalog = self.fetch_catalog().await?;
                }
                if scope.reloads_overrides() {
                    inputs.overrides = self.load_overrides().await?;
                }
                if scope.reloads_playlists() {
                    inputs.tenant_playlists = self.load_tenant_playlists().await?;
                }
                if scope.reloads_assets() {
                    inputs.tenant_assets = self.load_tenant_assets().await?;
                }
                inputs
            }
            None => SyncInputs {
                catalog: self.fetch_catalog().await?,
                overrides: self.load_overrides().await?,
                tenant_playlists: self.load_tenant_playlists().await?,
                tenant_assets: self.load_tenant_assets().await?,
            },
        };

        *held = Some(inputs.clone());
        Ok(inputs)
    }

    /// Merge and persist. `previous` supplies the record id and token to
    /// update; without one a new record is created.
    pub async fn refresh(
        &self,
        scope: RefreshScope,
        previous: Option<&MergedCache>,
    ) -> Result<MergedCache, SyncError> {
        let inputs = self.gather(scope).await?;
        let mut cache = merge(&inputs, &self.language, &self.config);
        self.persist(&mut cache, previous).await?;
        info!(
            source_id = %self.source.id,
            language = %self.language,
            playlists = cache.cached_playlists.len(),
            assets = cache.cached_assets.len(),
            ?scope,
            "cache rebuilt"
        );
        Ok(cache)
    }

    async fn persist(
        &self,
        cache: &mut MergedCache,
        previous: Option<&MergedCache>,
    ) -> Result<(), SyncError> {
        let payload = RecordPayload::encode(self.config.schema_version, &*cache)?;
        let existing = previous.and_then(|p| p.id.clone().zip(p.concurrency_token.clone()));

        match existing {
            Some((id, token)) => {
                let token = self
                    .store
                    .update(RecordKind::Cache, &id, payload, &token)
                    .await?;
                cache.id = Some(id);
                cache.concurrency_token = Some(token);
            }
            None => {
                let created = self
                    .store
                    .create(NewRecord {
                        kind: RecordKind::Cache,
                        source_id: self.source.id.clone(),
                        language: Some(self.language.clone()),
                        payload,
                    })
                    .await?;
                cache.id = Some(created.id);
                cache.concurrency_token = Some(created.concurrency_token);
            }
        }
        Ok(())
    }

    /// Whether a persisted cache can be served without rebuilding.
    pub fn is_fresh(&self, cache: &MergedCache) -> bool {
        if cache.schema_version != self.config.schema_version {
            return false;
        }
        (Utc::now() - cache.last_updated)
            .to_std()
            .map(|age| age < self.config.cache_ttl)
            .unwrap_or(true)
    }

    /// Rebuild unconditionally, updating the persisted cache if one exists.
    /// `None` when the catalog cannot be fetched.
    pub async fn rebuild(&self) -> Result<Option<MergedCache>, SyncError> {
        let previous = self.load_cache().await?;
        match self.refresh(RefreshScope::Full, previous.as_ref()).await {
            Ok(cache) => Ok(Some(cache)),
            Err(err @ SyncError::TransientFetch { .. }) => {
                warn!(error = %err, "rebuild skipped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// The persisted cache when fresh, otherwise a full rebuild.
    ///
    /// When the catalog cannot be fetched, a persisted cache of the current
    /// schema is served stale; with none, the result is `None`.
    pub async fn get_or_build(&self) -> Result<Option<MergedCache>, SyncError> {
        let previous = self.load_cache().await?;
        if let Some(cache) = previous.as_ref().filter(|c| self.is_fresh(c)) {
            debug!(source_id = %self.source.id, language = %self.language, "serving persisted cache");
            return Ok(Some(cache.clone()));
        }

        match self.refresh(RefreshScope::Full, previous.as_ref()).await {
            Ok(cache) => Ok(Some(cache)),
            Err(err @ SyncError::TransientFetch { .. }) => {
                let stale =
                    previous.filter(|c| c.schema_version == self.config.schema_version);
                warn!(error = %err, serving_stale = stale.is_some(), "rebuild skipped");
                Ok(stale)
            }
            Err(err) => Err(err),
        }
    }
}
