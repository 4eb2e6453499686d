//! Per-content-source lifecycle.
//!
//! A [`SourceCacheCoordinator`] exists once per source id (see
//! [`CoordinatorRegistry`]) and owns that source's initialization state
//! machine:
//!
//! ```text
//! Uninitialized -> Initializing -> Ready
//!                               -> Invalid          (store unusable)
//!                               -> UpgradeRequired  (persisted schema is older)
//!                               -> Unavailable      (no catalog and no cache; retried by do_init)
//! ```
//!
//! Only one initialization runs at a time. A `do_init` that finds another one
//! in flight returns [`InitOutcome::AlreadyRunning`] immediately; callers
//! wait with [`SourceCacheCoordinator::is_ready`].

use std::sync::Arc;

use dashmap::DashMap;
use lumen_store::{CatalogFetcher, ContentSource, MergedCache, RecordStore, SchemaVersion};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;
use crate::languages::{ItemTranslation, LanguageCoordinator};
use crate::tree::{FlatCategory, flatten_categories};

/// Initialization state of a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Uninitialized,
    Initializing,
    Ready,
    Invalid,
    UpgradeRequired,
    Unavailable,
}

impl CoordinatorState {
    /// Whether an initialization attempt has finished.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            CoordinatorState::Ready
                | CoordinatorState::Invalid
                | CoordinatorState::UpgradeRequired
                | CoordinatorState::Unavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CoordinatorState::Uninitialized => "uninitialized",
            CoordinatorState::Initializing => "initializing",
            CoordinatorState::Ready => "ready",
            CoordinatorState::Invalid => "invalid",
            CoordinatorState::UpgradeRequired => "upgrade-required",
            CoordinatorState::Unavailable => "unavailable",
        }
    }
}

/// Persisted schema older than the running code expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionGap {
    pub persisted: SchemaVersion,
    pub expected: SchemaVersion,
}

/// Result of [`SourceCacheCoordinator::do_init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Ready,
    /// Run the tenant upgrade before anything is merged.
    UpgradeRequired(VersionGap),
    /// Another initialization is in flight.
    AlreadyRunning,
    Invalid,
    /// Neither a catalog nor a persisted cache could be loaded.
    Unavailable,
}

struct Binding {
    source: ContentSource,
    languages: Arc<LanguageCoordinator>,
}

/// Holds the `Initializing` claim. Dropped unsettled, for instance when the
/// caller's future is cancelled, it hands the state back to `Uninitialized`
/// so a later `do_init` can run.
struct InitClaim<'a> {
    state: &'a watch::Sender<CoordinatorState>,
    settled: bool,
}

impl InitClaim<'_> {
    fn settle(mut self, state: CoordinatorState) {
        self.settled = true;
        self.state.send_replace(state);
    }
}

impl Drop for InitClaim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("initialization cancelled before settling");
            self.state.send_replace(CoordinatorState::Uninitialized);
        }
    }
}

/// Lifecycle owner for one content source's caches.
pub struct SourceCacheCoordinator {
    source_id: String,
    config: Arc<SyncConfig>,
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn CatalogFetcher>,
    state: watch::Sender<CoordinatorState>,
    binding: RwLock<Option<Binding>>,
    version_gap: Mutex<Option<VersionGap>>,
    flat: Mutex<Option<(Arc<MergedCache>, Arc<Vec<FlatCategory>>)>>,
}

impl SourceCacheCoordinator {
    pub fn new(
        source_id: impl Into<String>,
        config: Arc<SyncConfig>,
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn CatalogFetcher>,
    ) -> Self {
        let (state, _) = watch::channel(CoordinatorState::Uninitialized);
        Self {
            source_id: source_id.into(),
            config,
            store,
            fetcher,
            state,
            binding: RwLock::new(None),
            version_gap: Mutex::new(None),
            flat: Mutex::new(None),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    /// False once the backing store has been found unusable.
    pub fn is_valid(&self) -> bool {
        self.state() != CoordinatorState::Invalid
    }

    pub async fn upgrade_required(&self) -> Option<VersionGap> {
        *self.version_gap.lock().await
    }

    /// Initialize for `source` with `language` as the primary language.
    ///
    /// Runs at most once at a time. Once settled, calling again with the
    /// same source returns the settled outcome without doing any work;
    /// a different source re-points the coordinator and initializes again.
    pub async fn do_init(&self, source: ContentSource, language: &str) -> InitOutcome {
        let repoint = self
            .binding
            .read()
            .await
            .as_ref()
            .is_some_and(|b| b.source != source);

        let claimed = self.state.send_if_modified(|state| {
            let claim = match *state {
                CoordinatorState::Uninitialized | CoordinatorState::Unavailable => true,
                CoordinatorState::Initializing => false,
                CoordinatorState::Ready
                | CoordinatorState::Invalid
                | CoordinatorState::UpgradeRequired => repoint,
            };
            if claim {
                *state = CoordinatorState::Initializing;
            }
            claim
        });

        if !claimed {
            return match self.state() {
                CoordinatorState::Initializing => {
                    debug!(source_id = %self.source_id, "initialization already in flight");
                    InitOutcome::AlreadyRunning
                }
                CoordinatorState::Ready => InitOutcome::Ready,
                CoordinatorState::Invalid => InitOutcome::Invalid,
                CoordinatorState::UpgradeRequired => match self.upgrade_required().await {
                    Some(gap) => InitOutcome::UpgradeRequired(gap),
                    None => InitOutcome::Invalid,
                },
                CoordinatorState::Uninitialized | CoordinatorState::Unavailable => {
                    InitOutcome::Unavailable
                }
            };
        }

        if repoint {
            info!(source_id = %self.source_id, base_url = %source.base_url, "re-pointing content source");
        }
        let claim = InitClaim {
            state: &self.state,
            settled: false,
        };
        let (outcome, state) = self.initialize(source, language, repoint).await;
        claim.settle(state);
        outcome
    }

    async fn initialize(
        &self,
        source: ContentSource,
        language: &str,
        rebuild: bool,
    ) -> (InitOutcome, CoordinatorState) {
        *self.binding.write().await = None;
        *self.version_gap.lock().await = None;
        *self.flat.lock().await = None;

        if let Err(e) = self.store.ensure_ready().await {
            error!(source_id = %self.source_id, error = %e, "record store failed validation");
            return (InitOutcome::Invalid, CoordinatorState::Invalid);
        }

        let config = Arc::new(self.config.as_ref().clone().with_default_language(language));
        let languages = LanguageCoordinator::new(
            source.clone(),
            config.clone(),
            self.store.clone(),
            self.fetcher.clone(),
        );

        match languages.primary().persisted_version().await {
            Ok(Some(persisted)) if persisted < config.schema_version => {
                let gap = VersionGap {
                    persisted,
                    expected: config.schema_version,
                };
                warn!(
                    source_id = %self.source_id,
                    persisted = %persisted,
                    expected = %config.schema_version,
                    "persisted cache needs an upgrade"
                );
                *self.version_gap.lock().await = Some(gap);
                *self.binding.write().await = Some(Binding { source, languages });
                return (
                    InitOutcome::UpgradeRequired(gap),
                    CoordinatorState::UpgradeRequired,
                );
            }
            Ok(_) => {}
            Err(e) => {
                error!(source_id = %self.source_id, error = %e, "failed to read persisted cache");
                return (InitOutcome::Invalid, CoordinatorState::Invalid);
            }
        }

        let result = languages.init(rebuild).await;
        *self.binding.write().await = Some(Binding { source, languages });
        match result {
            Ok(Some(_)) => {
                info!(source_id = %self.source_id, language, "content source ready");
                (InitOutcome::Ready, CoordinatorState::Ready)
            }
            Ok(None) => {
                warn!(source_id = %self.source_id, "no catalog and no persisted cache");
                (InitOutcome::Unavailable, CoordinatorState::Unavailable)
            }
            Err(e) => {
                warn!(source_id = %self.source_id, error = %e, "initialization failed");
                (InitOutcome::Unavailable, CoordinatorState::Unavailable)
            }
        }
    }

    /// Wait, up to the configured timeout, for initialization to settle.
    /// True only when it settled as ready.
    pub async fn is_ready(&self) -> bool {
        let mut rx = self.state.subscribe();
        let settled = tokio::time::timeout(
            self.config.ready_timeout,
            rx.wait_for(|s| s.is_settled()),
        )
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false);
        settled && self.state() == CoordinatorState::Ready
    }

    /// Return to `Uninitialized` so the next `do_init` runs again, for
    /// example after a tenant upgrade. Ignored while initializing.
    pub async fn reset(&self) -> bool {
        let reset = self.state.send_if_modified(|state| {
            if state.is_settled() {
                *state = CoordinatorState::Uninitialized;
                true
            } else {
                false
            }
        });
        if reset {
            *self.binding.write().await = None;
            *self.version_gap.lock().await = None;
            *self.flat.lock().await = None;
        }
        reset
    }

    async fn languages(&self) -> Option<Arc<LanguageCoordinator>> {
        if self.state() != CoordinatorState::Ready {
            return None;
        }
        self.binding
            .read()
            .await
            .as_ref()
            .map(|b| b.languages.clone())
    }

    /// The bound content source, once initialization has run.
    pub async fn source(&self) -> Option<ContentSource> {
        self.binding.read().await.as_ref().map(|b| b.source.clone())
    }

    /// The primary-language cache.
    pub async fn cache_config(&self) -> Option<Arc<MergedCache>> {
        self.languages().await?.primary_cache()
    }

    /// The cache for `language`, building it on first use.
    pub async fn cache_for(&self, language: &str) -> Option<Arc<MergedCache>> {
        self.languages().await?.cache_for(language).await
    }

    /// The primary cache's category tree flattened in pre-order. Recomputed
    /// only when the cache has been replaced.
    pub async fn flat_category(&self) -> Option<Arc<Vec<FlatCategory>>> {
        let cache = self.cache_config().await?;
        let mut memo = self.flat.lock().await;
        if let Some((source, flat)) = memo.as_ref() {
            if Arc::ptr_eq(source, &cache) {
                return Some(flat.clone());
            }
        }
        let flat = Arc::new(flatten_categories(&cache.categories));
        *memo = Some((cache, flat.clone()));
        Some(flat)
    }

    pub async fn refresh(&self) -> Option<Arc<MergedCache>> {
        self.languages().await?.refresh().await
    }

    pub async fn refresh_playlists_only(&self) -> Option<Arc<MergedCache>> {
        self.languages().await?.refresh_playlists_only().await
    }

    pub async fn refresh_assets_only(&self) -> Option<Arc<MergedCache>> {
        self.languages().await?.refresh_assets_only().await
    }

    pub async fn refresh_custom_only(&self) -> Option<Arc<MergedCache>> {
        self.languages().await?.refresh_custom_only().await
    }

    /// Wait for background language work to finish.
    pub async fn languages_ready(&self) -> bool {
        match self.languages().await {
            Some(languages) => languages.wait_ready().await,
            None => false,
        }
    }

    pub async fn get_playlist_translations(&self, id: &str) -> Vec<ItemTranslation> {
        match self.languages().await {
            Some(languages) => languages.get_playlist_translations(id),
            None => Vec::new(),
        }
    }

    pub async fn get_asset_translations(&self, id: &str) -> Vec<ItemTranslation> {
        match self.languages().await {
            Some(languages) => languages.get_asset_translations(id),
            None => Vec::new(),
        }
    }
}

/// Process-wide coordinators, one per source id. The first call for an id
/// creates its coordinator; later calls reuse it.
pub struct CoordinatorRegistry {
    config: Arc<SyncConfig>,
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn CatalogFetcher>,
    coordinators: DashMap<String, Arc<SourceCacheCoordinator>>,
}

impl CoordinatorRegistry {
    pub fn new(
        config: Arc<SyncConfig>,
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn CatalogFetcher>,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            coordinators: DashMap::new(),
        }
    }

    pub fn get_or_create(&self, source_id: &str) -> Arc<SourceCacheCoordinator> {
        self.coordinators
            .entry(source_id.to_string())
            .or_insert_with(|| {
                debug!(source_id, "creating coordinator");
                Arc::new(SourceCacheCoordinator::new(
                    source_id,
                    self.config.clone(),
                    self.store.clone(),
                    self.fetcher.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<SourceCacheCoordinator>> {
        self.coordinators.get(source_id).map(|c| c.value().clone())
    }

    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_store::{MemoryCatalogFetcher, MemoryRecordStore};

    fn registry() -> CoordinatorRegistry {
        CoordinatorRegistry::new(
            Arc::new(SyncConfig::default()),
            MemoryRecordStore::new(),
            MemoryCatalogFetcher::new(),
        )
    }

    #[test]
    fn test_registry_first_call_wins() {
        let registry = registry();
        let a = registry.get_or_create("Default");
        let b = registry.get_or_create("Default");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.get("Other").is_none());
        registry.get_or_create("Other");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_settled_states() {
        assert!(!CoordinatorState::Uninitialized.is_settled());
        assert!(!CoordinatorState::Initializing.is_settled());
        assert!(CoordinatorState::Ready.is_settled());
        assert!(CoordinatorState::Invalid.is_settled());
        assert!(CoordinatorState::UpgradeRequired.is_settled());
        assert!(CoordinatorState::Unavailable.is_settled());
    }

    #[tokio::test]
    async fn test_reads_before_init_are_empty() {
        let registry = registry();
        let coordinator = registry.get_or_create("Default");
        assert!(coordinator.is_valid());
        assert!(coordinator.cache_config().await.is_none());
        assert!(coordinator.flat_category().await.is_none());
        assert!(coordinator.refresh().await.is_none());
        assert!(!coordinator.reset().await);
    }
}
