//! Multi-language orchestration for one content source.
//!
//! The default language is primary: it is built eagerly and every refresh
//! updates it first. Secondary languages are built lazily and refreshed by a
//! background task that walks them one at a time. A [`ReadyGate`] serializes
//! refreshes so a new one never starts while background work is in flight.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use lumen_store::{
    Asset, CatalogFetcher, ContentSource, LocalizedText, MergedCache, Playlist, RecordStore,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::synchronizer::{CacheSynchronizer, RefreshScope};

/// Cooperative gate between refreshes. `true` means idle.
#[derive(Clone)]
pub struct ReadyGate {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ReadyGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadyGate {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(true);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_ready(&self) -> bool {
        *self.tx.borrow()
    }

    /// Close the gate if it is open.
    pub fn try_acquire(&self) -> Option<GateGuard> {
        let acquired = self.tx.send_if_modified(|ready| {
            if *ready {
                *ready = false;
                true
            } else {
                false
            }
        });
        acquired.then(|| GateGuard {
            tx: self.tx.clone(),
        })
    }

    /// Wait up to `timeout` for the gate to open, then close it.
    pub async fn acquire(&self, timeout: Duration) -> Option<GateGuard> {
        let deadline = Instant::now() + timeout;
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(guard) = self.try_acquire() {
                return Some(guard);
            }
            let opened = tokio::time::timeout_at(deadline, rx.wait_for(|ready| *ready))
                .await
                .map(|r| r.is_ok());
            if !matches!(opened, Ok(true)) {
                return None;
            }
        }
    }

    /// Wait up to `timeout` for the gate to open without closing it.
    pub async fn wait_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.tx.subscribe();
        tokio::time::timeout(timeout, rx.wait_for(|ready| *ready))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }
}

/// Holds the gate closed; reopens it on drop.
pub struct GateGuard {
    tx: Arc<watch::Sender<bool>>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        self.tx.send_replace(true);
    }
}

/// One language's rendition of a tenant item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTranslation {
    pub language: String,
    pub title: LocalizedText,
    pub description: LocalizedText,
}

/// Per-language synchronizers and caches for one content source.
pub struct LanguageCoordinator {
    source: ContentSource,
    config: Arc<SyncConfig>,
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn CatalogFetcher>,
    primary: Arc<CacheSynchronizer>,
    secondaries: OnceLock<Vec<Arc<CacheSynchronizer>>>,
    /// Loaded caches keyed by lowercased language code.
    caches: DashMap<String, Arc<MergedCache>>,
    gate: ReadyGate,
}

impl LanguageCoordinator {
    pub fn new(
        source: ContentSource,
        config: Arc<SyncConfig>,
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn CatalogFetcher>,
    ) -> Arc<Self> {
        let primary = Arc::new(CacheSynchronizer::new(
            source.clone(),
            config.default_language.clone(),
            config.clone(),
            store.clone(),
            fetcher.clone(),
        ));
        Arc::new(Self {
            source,
            config,
            store,
            fetcher,
            primary,
            secondaries: OnceLock::new(),
            caches: DashMap::new(),
            gate: ReadyGate::new(),
        })
    }

    pub fn source(&self) -> &ContentSource {
        &self.source
    }

    pub fn primary(&self) -> &CacheSynchronizer {
        &self.primary
    }

    /// Languages in entry order, primary first.
    pub fn languages(&self) -> Vec<String> {
        self.entries().map(|s| s.language().to_string()).collect()
    }

    fn entries(&self) -> impl Iterator<Item = &Arc<CacheSynchronizer>> {
        std::iter::once(&self.primary).chain(self.secondary_entries())
    }

    fn secondary_entries(&self) -> impl Iterator<Item = &Arc<CacheSynchronizer>> {
        self.secondaries.get().into_iter().flatten()
    }

    fn entry(&self, language: &str) -> Option<&Arc<CacheSynchronizer>> {
        self.entries()
            .find(|s| s.language().eq_ignore_ascii_case(language))
    }

    fn key(language: &str) -> String {
        language.to_ascii_lowercase()
    }

    /// Load or build the primary cache, then register the secondary
    /// languages without synchronizing them. With `rebuild` the persisted
    /// primary cache is never reused.
    pub async fn init(&self, rebuild: bool) -> Result<Option<Arc<MergedCache>>, SyncError> {
        let cache = if rebuild {
            self.primary.rebuild().await?
        } else {
            self.primary.get_or_build().await?
        }
        .map(Arc::new);
        if let Some(cache) = &cache {
            self.caches
                .insert(Self::key(self.primary.language()), cache.clone());
        }

        let secondaries = self
            .config
            .secondary_languages()
            .into_iter()
            .map(|language| {
                Arc::new(CacheSynchronizer::new(
                    self.source.clone(),
                    language,
                    self.config.clone(),
                    self.store.clone(),
                    self.fetcher.clone(),
                ))
            })
            .collect::<Vec<_>>();
        if !secondaries.is_empty() {
            debug!(
                source_id = %self.source.id,
                languages = secondaries.len(),
                "registered secondary languages"
            );
        }
        // A second init keeps the first registration.
        let _ = self.secondaries.set(secondaries);

        Ok(cache)
    }

    pub fn primary_cache(&self) -> Option<Arc<MergedCache>> {
        self.loaded(self.primary.language())
    }

    fn loaded(&self, language: &str) -> Option<Arc<MergedCache>> {
        self.caches.get(&Self::key(language)).map(|c| c.value().clone())
    }

    /// The in-memory cache for `language`, falling back to the persisted one.
    async fn current(&self, sync: &CacheSynchronizer) -> Option<Arc<MergedCache>> {
        if let Some(cache) = self.loaded(sync.language()) {
            return Some(cache);
        }
        match sync.load_cache().await {
            Ok(cache) => cache.map(Arc::new),
            Err(e) => {
                warn!(language = %sync.language(), error = %e, "failed to load persisted cache");
                None
            }
        }
    }

    /// The cache for `language`, building a secondary one on first use.
    pub async fn cache_for(&self, language: &str) -> Option<Arc<MergedCache>> {
        if let Some(cache) = self.loaded(language) {
            return Some(cache);
        }
        let sync = self.entry(language)?.clone();

        let _guard = self.gate.acquire(self.config.language_gate_timeout).await?;
        if let Some(cache) = self.loaded(language) {
            return Some(cache);
        }
        match sync.get_or_build().await {
            Ok(Some(cache)) => {
                let cache = Arc::new(cache);
                self.caches.insert(Self::key(language), cache.clone());
                Some(cache)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(language, error = %e, "failed to build language cache");
                None
            }
        }
    }

    /// Whether no refresh is in flight.
    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    /// Wait for in-flight refreshes, bounded by the gate timeout.
    pub async fn wait_ready(&self) -> bool {
        self.gate.wait_ready(self.config.language_gate_timeout).await
    }

    pub async fn refresh(self: &Arc<Self>) -> Option<Arc<MergedCache>> {
        self.refresh_scope(RefreshScope::Full).await
    }

    pub async fn refresh_playlists_only(self: &Arc<Self>) -> Option<Arc<MergedCache>> {
        self.refresh_scope(RefreshScope::PlaylistsOnly).await
    }

    pub async fn refresh_assets_only(self: &Arc<Self>) -> Option<Arc<MergedCache>> {
        self.refresh_scope(RefreshScope::AssetsOnly).await
    }

    pub async fn refresh_custom_only(self: &Arc<Self>) -> Option<Arc<MergedCache>> {
        self.refresh_scope(RefreshScope::CustomOnly).await
    }

    /// Refresh the primary language and return its cache. Secondary
    /// languages are refreshed afterwards in a background task that keeps
    /// the gate closed until it finishes.
    pub async fn refresh_scope(self: &Arc<Self>, scope: RefreshScope) -> Option<Arc<MergedCache>> {
        let Some(guard) = self.gate.acquire(self.config.language_gate_timeout).await else {
            warn!(source_id = %self.source.id, ?scope, "refresh skipped: previous refresh still running");
            return None;
        };

        let cache = self.refresh_one(&self.primary, scope).await?;

        if self.secondary_entries().next().is_some() {
            let this = self.clone();
            tokio::spawn(async move {
                this.refresh_secondaries(scope).await;
                drop(guard);
            });
        }
        Some(cache)
    }

    /// Refresh every secondary language in order, waiting for the gate.
    pub async fn refresh_alt_languages(&self) -> bool {
        let Some(_guard) = self.gate.acquire(self.config.language_gate_timeout).await else {
            return false;
        };
        self.refresh_secondaries(RefreshScope::Full).await;
        true
    }

    async fn refresh_secondaries(&self, scope: RefreshScope) {
        for sync in self.secondary_entries() {
            self.refresh_one(sync, scope).await;
        }
        info!(source_id = %self.source.id, "secondary languages refreshed");
    }

    async fn refresh_one(
        &self,
        sync: &CacheSynchronizer,
        scope: RefreshScope,
    ) -> Option<Arc<MergedCache>> {
        let previous = self.current(sync).await;
        match sync.refresh(scope, previous.as_deref()).await {
            Ok(cache) => {
                let cache = Arc::new(cache);
                self.caches.insert(Self::key(sync.language()), cache.clone());
                Some(cache)
            }
            Err(e) => {
                warn!(
                    source_id = %self.source.id,
                    language = %sync.language(),
                    error = %e,
                    "language refresh failed"
                );
                if matches!(e, SyncError::Conflict { .. }) {
                    self.reload_after_conflict(sync).await;
                }
                None
            }
        }
    }

    /// Replace the held copy, whose token is stale, with the record another
    /// writer left so the next refresh merges against it.
    async fn reload_after_conflict(&self, sync: &CacheSynchronizer) {
        let key = Self::key(sync.language());
        match sync.load_cache().await {
            Ok(Some(latest)) => {
                self.caches.insert(key, Arc::new(latest));
            }
            Ok(None) => {
                self.caches.remove(&key);
            }
            Err(e) => {
                warn!(
                    language = %sync.language(),
                    error = %e,
                    "failed to reload cache after conflict"
                );
                self.caches.remove(&key);
            }
        }
    }

    /// Titles and descriptions of playlist `id` in every loaded language.
    pub fn get_playlist_translations(&self, id: &str) -> Vec<ItemTranslation> {
        self.translations(|cache| {
            cache
                .cached_playlists
                .iter()
                .find(|p| p.id == id)
                .map(|p: &Playlist| (p.title.clone(), p.description.clone()))
        })
    }

    /// Titles and descriptions of asset `id` in every loaded language.
    pub fn get_asset_translations(&self, id: &str) -> Vec<ItemTranslation> {
        self.translations(|cache| {
            cache
                .cached_assets
                .iter()
                .find(|a| a.id == id)
                .map(|a: &Asset| (a.title.clone(), a.description.clone()))
        })
    }

    fn translations(
        &self,
        find: impl Fn(&MergedCache) -> Option<(LocalizedText, LocalizedText)>,
    ) -> Vec<ItemTranslation> {
        self.entries()
            .filter_map(|sync| {
                let cache = self.loaded(sync.language())?;
                let (title, description) = find(&cache)?;
                Some(ItemTranslation {
                    language: sync.language().to_string(),
                    title,
                    description,
                })
            })
            .collect()
    }
}
