//! Sync, sources and translations commands.

use std::sync::Arc;

use lumen_store::MergedCache;
use lumen_sync::{
    CoordinatorRegistry, InitOutcome, ItemTranslation, SourceCacheCoordinator,
    load_content_sources,
};
use miette::Result;
use tracing::info;

use crate::migrate::resolve_source;
use crate::{Connection, RefreshArg, Settings, connect};

/// Options for the sync command.
pub struct SyncOptions {
    /// `None` syncs every configured source.
    pub source: Option<String>,
    pub refresh: Option<RefreshArg>,
    pub tree: bool,
}

/// Item to look up in the translations command.
pub enum TranslatedItem {
    Playlist(String),
    Asset(String),
}

/// Run the sync command.
pub async fn run(connection: &Connection, settings: &Settings, options: SyncOptions) -> Result<()> {
    let (store, fetcher) = connect(connection)?;
    let sources = load_content_sources(&*store, &connection.catalog_url)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    let selected: Vec<_> = match &options.source {
        Some(id) => vec![
            sources
                .into_iter()
                .find(|s| &s.id == id)
                .ok_or_else(|| miette::miette!("Unknown content source: {}", id))?,
        ],
        None => sources,
    };

    let config = Arc::new(settings.sync_config());
    let registry = CoordinatorRegistry::new(config, store, fetcher);
    let mut failed = 0;

    for source in selected {
        let coordinator = registry.get_or_create(&source.id);
        println!("=== {} ({}) ===", source.id, source.base_url);

        match coordinator.do_init(source, &settings.language).await {
            InitOutcome::Ready | InitOutcome::AlreadyRunning => {}
            InitOutcome::UpgradeRequired(gap) => {
                println!(
                    "  Upgrade required: records at {}, expected {}. Run `lumen migrate`.",
                    gap.persisted, gap.expected
                );
                failed += 1;
                continue;
            }
            InitOutcome::Invalid => {
                println!("  Record store is not usable");
                failed += 1;
                continue;
            }
            InitOutcome::Unavailable => {
                println!("  No catalog and no persisted cache");
                failed += 1;
                continue;
            }
        }

        if !coordinator.is_ready().await {
            println!("  Timed out waiting for initialization");
            failed += 1;
            continue;
        }

        if let Some(scope) = options.refresh {
            info!(source_id = coordinator.source_id(), ?scope, "refreshing");
            let refreshed = match scope {
                RefreshArg::Full => coordinator.refresh().await,
                RefreshArg::Playlists => coordinator.refresh_playlists_only().await,
                RefreshArg::Assets => coordinator.refresh_assets_only().await,
                RefreshArg::Custom => coordinator.refresh_custom_only().await,
            };
            if refreshed.is_none() {
                println!("  Warning: refresh failed; serving the previous cache");
            }
            if !coordinator.languages_ready().await {
                println!("  Warning: secondary languages still refreshing");
            }
        }

        print_source(&coordinator, settings, options.tree).await;
    }

    if failed > 0 {
        return Err(miette::miette!("{} source(s) did not become ready", failed));
    }
    Ok(())
}

async fn print_source(coordinator: &SourceCacheCoordinator, settings: &Settings, tree: bool) {
    if let Some(cache) = coordinator.cache_config().await {
        print_summary(&cache);
    }

    for language in settings.sync_config().secondary_languages() {
        match coordinator.cache_for(&language).await {
            Some(cache) => print_summary(&cache),
            None => println!("  [{}] not loaded", language),
        }
    }

    if tree {
        if let Some(rows) = coordinator.flat_category().await {
            println!("  Categories:");
            for row in rows.iter() {
                println!(
                    "  {}{} ({}) [{}]",
                    "  ".repeat(row.depth + 1),
                    row.name,
                    row.id,
                    row.count
                );
            }
        }
    }
}

fn print_summary(cache: &MergedCache) {
    println!(
        "  [{}] schema {}, catalog {}: {} categories, {} playlists, {} assets (updated {})",
        cache.language,
        cache.schema_version,
        cache.catalog_version,
        cache.categories.len(),
        cache.cached_playlists.len(),
        cache.cached_assets.len(),
        cache.last_updated.format("%Y-%m-%d %H:%M:%S UTC"),
    );
}

/// Run the sources command.
pub async fn run_sources(connection: &Connection) -> Result<()> {
    let (store, _) = connect(connection)?;
    let sources = load_content_sources(&*store, &connection.catalog_url)
        .await
        .map_err(|e| miette::miette!("{}", e))?;

    println!("Content sources:");
    for source in sources {
        let marker = if source.is_default() { " (default)" } else { "" };
        println!("  {}{}: {} <{}>", source.id, marker, source.name, source.base_url);
    }
    Ok(())
}

/// Run the translations command.
pub async fn run_translations(
    connection: &Connection,
    settings: &Settings,
    source_id: &str,
    item: TranslatedItem,
) -> Result<()> {
    let (store, fetcher) = connect(connection)?;
    let source = resolve_source(&*store, &connection.catalog_url, source_id).await?;

    let config = Arc::new(settings.sync_config());
    let coordinator = SourceCacheCoordinator::new(source_id, config, store, fetcher);
    match coordinator.do_init(source, &settings.language).await {
        InitOutcome::Ready => {}
        other => return Err(miette::miette!("Source not ready: {:?}", other)),
    }

    // Translations come from every loaded language, so fill the secondaries first.
    coordinator.refresh().await;
    coordinator.languages_ready().await;

    let translations: Vec<ItemTranslation> = match &item {
        TranslatedItem::Playlist(id) => coordinator.get_playlist_translations(id).await,
        TranslatedItem::Asset(id) => coordinator.get_asset_translations(id).await,
    };

    if translations.is_empty() {
        println!("No tenant item found");
        return Ok(());
    }
    let json = serde_json::to_string_pretty(&translations).map_err(|e| miette::miette!("{}", e))?;
    println!("{}", json);
    Ok(())
}
