//! Coordinator behavior against the in-memory store and fetcher.

use std::sync::Arc;
use std::time::Duration;

use lumen_store::{
    CatalogSnapshot, CategoryNode, ContentSource, ItemSource, LocalizedText, MemoryCatalogFetcher,
    MemoryRecordStore, NewRecord, Playlist, RecordKind, RecordPayload, RecordStore, SchemaVersion,
};
use lumen_sync::{
    CoordinatorRegistry, CoordinatorState, InitOutcome, SourceCacheCoordinator, SyncConfig,
    TenantUpgrade, VersionGap,
};
use serde_json::json;

const BASE: &str = "https://cdn.test";

// Helper to create a catalog playlist
fn playlist(id: &str, category: &str) -> Playlist {
    Playlist {
        id: id.to_string(),
        title: LocalizedText::from(id),
        description: LocalizedText::default(),
        image: None,
        category_id: category.to_string(),
        technology_id: String::new(),
        subject_id: String::new(),
        asset_ids: vec![],
        source: ItemSource::Catalog,
        concurrency_token: None,
    }
}

// Helper to create a small catalog with one category and one playlist
fn catalog(category_name: &str) -> CatalogSnapshot {
    CatalogSnapshot {
        schema_version: "v4".to_string(),
        categories: vec![
            CategoryNode::new("A", category_name)
                .with_children(vec![CategoryNode::new("A1", category_name)]),
        ],
        technologies: vec![],
        supported_languages: vec!["en-us".to_string(), "fr-fr".to_string(), "de-de".to_string()],
        telemetry_key: "key".to_string(),
        asset_origins: vec![],
        playlists: vec![playlist("P1", "A1")],
        assets: vec![],
    }
}

struct Fixture {
    store: Arc<MemoryRecordStore>,
    fetcher: Arc<MemoryCatalogFetcher>,
    coordinator: SourceCacheCoordinator,
}

fn fixture(config: SyncConfig) -> Fixture {
    let store = MemoryRecordStore::new();
    let fetcher = MemoryCatalogFetcher::new();
    fetcher.insert(BASE, "en-us", catalog("Office"));
    fetcher.insert(BASE, "fr-fr", catalog("Bureautique"));
    fetcher.insert(BASE, "de-de", catalog("Buero"));
    let coordinator = SourceCacheCoordinator::new(
        "Default",
        Arc::new(config),
        store.clone(),
        fetcher.clone(),
    );
    Fixture {
        store,
        fetcher,
        coordinator,
    }
}

fn default_source() -> ContentSource {
    ContentSource::default_source(BASE)
}

mod init {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn concurrent_init_runs_once() {
        let f = fixture(SyncConfig::default());
        f.fetcher.set_delay(Duration::from_secs(2));

        let (a, b) = tokio::join!(
            f.coordinator.do_init(default_source(), "en-us"),
            f.coordinator.do_init(default_source(), "en-us"),
        );

        let mut outcomes = vec![a, b];
        outcomes.sort_by_key(|o| matches!(o, InitOutcome::AlreadyRunning));
        assert_eq!(outcomes, vec![InitOutcome::Ready, InitOutcome::AlreadyRunning]);
        assert_eq!(f.fetcher.fetch_count(), 1);
        assert_eq!(f.store.write_count(), 1);
        assert!(f.coordinator.is_ready().await);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_init_can_be_retried() {
        let f = fixture(SyncConfig::default());
        f.fetcher.set_delay(Duration::from_secs(10));

        let first = tokio::time::timeout(
            Duration::from_secs(1),
            f.coordinator.do_init(default_source(), "en-us"),
        )
        .await;
        assert!(first.is_err());
        assert_eq!(f.coordinator.state(), CoordinatorState::Uninitialized);

        f.fetcher.set_delay(Duration::ZERO);
        assert_eq!(
            f.coordinator.do_init(default_source(), "en-us").await,
            InitOutcome::Ready
        );
        assert!(f.coordinator.is_ready().await);
    }

    #[tokio::test]
    async fn settled_init_is_not_repeated() {
        let f = fixture(SyncConfig::default());
        assert_eq!(
            f.coordinator.do_init(default_source(), "en-us").await,
            InitOutcome::Ready
        );
        assert_eq!(
            f.coordinator.do_init(default_source(), "en-us").await,
            InitOutcome::Ready
        );
        assert_eq!(f.fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn waiter_sees_ready_after_init() {
        let f = Arc::new(fixture(SyncConfig::default()));
        let waiter = {
            let f = f.clone();
            tokio::spawn(async move { f.coordinator.is_ready().await })
        };
        f.coordinator.do_init(default_source(), "en-us").await;
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn is_ready_times_out_without_init() {
        let f = fixture(SyncConfig::default().with_ready_timeout(Duration::from_secs(5)));
        assert!(!f.coordinator.is_ready().await);
        assert_eq!(f.coordinator.state(), CoordinatorState::Uninitialized);
    }

    #[tokio::test]
    async fn unusable_store_is_invalid() {
        let f = fixture(SyncConfig::default());
        f.store.set_unavailable(true);

        assert_eq!(
            f.coordinator.do_init(default_source(), "en-us").await,
            InitOutcome::Invalid
        );
        assert!(!f.coordinator.is_valid());
        assert!(!f.coordinator.is_ready().await);
        assert!(f.coordinator.cache_config().await.is_none());
        assert_eq!(f.fetcher.fetch_count(), 0);
    }

    #[tokio::test]
    async fn missing_catalog_is_retried() {
        let f = fixture(SyncConfig::default());
        f.fetcher.set_unavailable(true);

        assert_eq!(
            f.coordinator.do_init(default_source(), "en-us").await,
            InitOutcome::Unavailable
        );
        assert!(f.coordinator.is_valid());
        assert!(f.coordinator.cache_config().await.is_none());

        f.fetcher.set_unavailable(false);
        assert_eq!(
            f.coordinator.do_init(default_source(), "en-us").await,
            InitOutcome::Ready
        );
        assert!(f.coordinator.cache_config().await.is_some());
    }

    #[tokio::test]
    async fn different_source_repoints() {
        let f = fixture(SyncConfig::default());
        f.fetcher.insert("https://mirror.test", "en-us", catalog("Mirror"));
        f.coordinator.do_init(default_source(), "en-us").await;

        let mirror = ContentSource::default_source("https://mirror.test");
        assert_eq!(
            f.coordinator.do_init(mirror.clone(), "en-us").await,
            InitOutcome::Ready
        );
        assert_eq!(f.coordinator.source().await, Some(mirror));
        assert_eq!(f.fetcher.fetch_count(), 2);
    }
}

mod upgrade {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn seed_v3_cache(store: &MemoryRecordStore) {
        let payload = json!({
            "language": "en-us",
            "schemaVersion": "v3",
            "categories": [{ "id": "A", "name": "Office", "subCategories": [{ "id": "A1" }] }],
            "lastUpdated": "2024-01-01T00:00:00Z",
        });
        store
            .create(NewRecord {
                kind: RecordKind::Cache,
                source_id: "Default".to_string(),
                language: Some("en-us".to_string()),
                payload: RecordPayload::encode(SchemaVersion(3), &payload).unwrap(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn older_cache_blocks_merge() {
        let f = fixture(SyncConfig::default());
        seed_v3_cache(&f.store).await;

        let gap = VersionGap {
            persisted: SchemaVersion(3),
            expected: SchemaVersion(4),
        };
        assert_eq!(
            f.coordinator.do_init(default_source(), "en-us").await,
            InitOutcome::UpgradeRequired(gap)
        );
        assert_eq!(f.coordinator.upgrade_required().await, Some(gap));
        assert_eq!(f.fetcher.fetch_count(), 0);
        assert_eq!(f.store.write_count(), 1);
        assert!(!f.coordinator.is_ready().await);
        assert!(f.coordinator.cache_config().await.is_none());
    }

    #[tokio::test]
    async fn upgrade_then_reset_reaches_ready() {
        let f = fixture(SyncConfig::default());
        seed_v3_cache(&f.store).await;
        f.coordinator.do_init(default_source(), "en-us").await;

        let report = TenantUpgrade::new(
            default_source(),
            Arc::new(SyncConfig::default()),
            f.store.clone(),
            f.fetcher.clone(),
        )
        .run(false)
        .await
        .unwrap();
        assert_eq!(report.records_updated, 1);

        assert!(f.coordinator.reset().await);
        assert_eq!(
            f.coordinator.do_init(default_source(), "en-us").await,
            InitOutcome::Ready
        );
        let cache = f.coordinator.cache_config().await.unwrap();
        assert_eq!(cache.schema_version, SchemaVersion(4));
        assert_eq!(cache.categories[0].sub_categories[0].count, 1);
    }
}

mod languages {
    use super::*;
    use pretty_assertions::assert_eq;

    fn multilingual() -> SyncConfig {
        SyncConfig::default().with_languages(["fr-fr", "de-de"])
    }

    #[tokio::test]
    async fn init_builds_primary_only() {
        let f = fixture(multilingual());
        f.coordinator.do_init(default_source(), "en-us").await;

        assert_eq!(f.fetcher.fetch_count(), 1);
        assert_eq!(f.store.write_count(), 1);

        let fr = f.coordinator.cache_for("fr-fr").await.unwrap();
        assert_eq!(fr.language, "fr-fr");
        assert_eq!(fr.categories[0].name, LocalizedText::from("Bureautique"));
        assert_eq!(f.fetcher.fetch_count(), 2);
        assert!(f.coordinator.cache_for("ja-jp").await.is_none());
    }

    #[tokio::test]
    async fn refresh_fills_secondaries_in_background() {
        let f = fixture(multilingual());
        let tenant = Playlist {
            title: LocalizedText::translated([
                ("en-us", "Tables"),
                ("fr-fr", "Tableaux"),
                ("de-de", "Tabellen"),
            ]),
            ..playlist("T1", "A1")
        };
        f.store
            .create(NewRecord {
                kind: RecordKind::Playlist,
                source_id: "Default".to_string(),
                language: None,
                payload: RecordPayload::encode(SchemaVersion(4), &tenant).unwrap(),
            })
            .await
            .unwrap();
        f.coordinator.do_init(default_source(), "en-us").await;

        let primary = f.coordinator.refresh().await.unwrap();
        assert_eq!(primary.language, "en-us");
        assert!(f.coordinator.languages_ready().await);

        let caches = f.store.list(RecordKind::Cache, "Default").await.unwrap();
        assert_eq!(caches.len(), 3);

        let titles: Vec<_> = f
            .coordinator
            .get_playlist_translations("T1")
            .await
            .into_iter()
            .map(|t| (t.language, t.title))
            .collect();
        assert_eq!(
            titles,
            vec![
                ("en-us".to_string(), LocalizedText::from("Tables")),
                ("fr-fr".to_string(), LocalizedText::from("Tableaux")),
                ("de-de".to_string(), LocalizedText::from("Tabellen")),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_waits_for_background_work() {
        let f = fixture(multilingual().with_language_gate_timeout(Duration::from_secs(30)));
        f.coordinator.do_init(default_source(), "en-us").await;
        f.fetcher.set_delay(Duration::from_secs(20));

        assert!(f.coordinator.refresh().await.is_some());
        // Two secondary languages at 20s each outlast the 30s gate timeout.
        assert!(f.coordinator.refresh_playlists_only().await.is_none());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(f.coordinator.languages_ready().await);
        assert!(f.coordinator.refresh_custom_only().await.is_some());
    }
}

mod views {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn flat_category_is_memoized_per_cache() {
        let f = fixture(SyncConfig::default());
        f.coordinator.do_init(default_source(), "en-us").await;

        let first = f.coordinator.flat_category().await.unwrap();
        let again = f.coordinator.flat_category().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        let ids: Vec<_> = first.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "A1"]);
        assert_eq!(first[1].count, 1);

        f.coordinator.refresh().await.unwrap();
        let rebuilt = f.coordinator.flat_category().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
    }

    #[tokio::test]
    async fn refresh_recovers_after_external_write() {
        let f = fixture(SyncConfig::default());
        f.coordinator.do_init(default_source(), "en-us").await;

        // Another writer updates the cache record behind the coordinator's back.
        let record = f
            .store
            .read(RecordKind::Cache, "Default", Some("en-us"))
            .await
            .unwrap()
            .unwrap();
        let external_token = f
            .store
            .update(
                RecordKind::Cache,
                &record.id,
                RecordPayload {
                    schema_version: record.schema_version,
                    payload_json: record.payload_json.clone(),
                },
                &record.concurrency_token,
            )
            .await
            .unwrap();

        assert!(f.coordinator.refresh().await.is_none());
        let held = f.coordinator.cache_config().await.unwrap();
        assert_eq!(held.concurrency_token, Some(external_token));

        let refreshed = f.coordinator.refresh().await.unwrap();
        assert_eq!(refreshed.id, Some(record.id));
        assert!(f.coordinator.refresh().await.is_some());
    }

    #[tokio::test]
    async fn registry_initializes_each_source() {
        let store = MemoryRecordStore::new();
        let fetcher = MemoryCatalogFetcher::new();
        fetcher.insert(BASE, "en-us", catalog("Office"));
        fetcher.insert("https://partner.test", "en-us", catalog("Partner"));
        let registry =
            CoordinatorRegistry::new(Arc::new(SyncConfig::default()), store.clone(), fetcher);

        for source in [
            default_source(),
            ContentSource::new("Partner", "https://partner.test"),
        ] {
            let coordinator = registry.get_or_create(&source.id);
            assert_eq!(coordinator.do_init(source, "en-us").await, InitOutcome::Ready);
        }

        assert_eq!(registry.len(), 2);
        assert_eq!(store.create_count(), 2);
        let partner = registry.get("Partner").unwrap().cache_config().await.unwrap();
        assert_eq!(partner.categories[0].name, LocalizedText::from("Partner"));
    }
}
