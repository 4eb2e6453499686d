//! Lumen: learning catalog cache engine
//!
//! Main binary with subcommands:
//! - `sync`: Initialize (and optionally refresh) the merged caches
//! - `migrate`: Upgrade persisted records to the current schema
//! - `sources`: List configured content sources
//! - `translations`: Show a tenant item in every loaded language

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use lumen_store::{
    CatalogFetcher, DEFAULT_SOURCE_ID, HttpCatalogFetcher, HttpRecordStore, RecordStore,
};
use lumen_sync::{DEFAULT_LANGUAGE, SyncConfig};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

mod migrate;
mod sync;

/// Where records and the catalog live.
#[derive(Args, Debug, Clone)]
struct Connection {
    /// Record store base URL
    #[arg(long, env = "LUMEN_STORE_URL")]
    store_url: String,

    /// Bearer token for the record store
    #[arg(long, env = "LUMEN_STORE_TOKEN", hide_env_values = true)]
    store_token: Option<String>,

    /// Base URL of the default content source
    #[arg(long, env = "LUMEN_CATALOG_URL")]
    catalog_url: String,
}

/// Language and freshness settings.
#[derive(Args, Debug, Clone)]
struct Settings {
    /// Primary language
    #[arg(long, env = "LUMEN_LANGUAGE", default_value = DEFAULT_LANGUAGE)]
    language: String,

    /// Secondary languages (comma-separated)
    #[arg(long, env = "LUMEN_LANGUAGES", value_delimiter = ',')]
    languages: Vec<String>,

    /// Maintain secondary languages.
    /// Accepts "1", "true", "yes", or "on".
    #[arg(long, env = "LUMEN_MULTILINGUAL", value_parser = parse_bool_env, default_value = "false")]
    multilingual: bool,

    /// Serve a persisted cache younger than this many hours without refetching
    #[arg(long, env = "LUMEN_CACHE_TTL_HOURS", default_value = "24")]
    cache_ttl_hours: u64,

    /// Seconds to wait for initialization to settle
    #[arg(long, env = "LUMEN_READY_TIMEOUT", default_value = "120")]
    ready_timeout: u64,
}

impl Settings {
    fn sync_config(&self) -> SyncConfig {
        let mut config = SyncConfig::default()
            .with_default_language(&self.language)
            .with_cache_ttl(Duration::from_secs(self.cache_ttl_hours * 60 * 60))
            .with_ready_timeout(Duration::from_secs(self.ready_timeout));
        if self.multilingual {
            config = config.with_languages(self.languages.iter().map(|l| l.trim().to_string()));
        }
        config
    }
}

/// Which tenant inputs a refresh reloads.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshArg {
    Full,
    Playlists,
    Assets,
    Custom,
}

#[derive(Parser)]
#[command(name = "lumen")]
#[command(about = "Learning catalog cache engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the merged caches for one or every content source
    Sync {
        #[command(flatten)]
        connection: Connection,

        #[command(flatten)]
        settings: Settings,

        /// Content source id
        #[arg(long, default_value = DEFAULT_SOURCE_ID)]
        source: String,

        /// Sync every configured content source, one after another
        #[arg(long, conflicts_with = "source")]
        all_sources: bool,

        /// Rebuild after initializing, including secondary languages
        #[arg(long, value_enum, num_args = 0..=1, default_missing_value = "full")]
        refresh: Option<RefreshArg>,

        /// Print the flattened category tree
        #[arg(long)]
        tree: bool,
    },

    /// Upgrade persisted records to the current schema
    Migrate {
        #[command(flatten)]
        connection: Connection,

        #[command(flatten)]
        settings: Settings,

        /// Content source id
        #[arg(long, default_value = DEFAULT_SOURCE_ID)]
        source: String,

        /// Only report whether an upgrade is pending
        #[arg(long)]
        check: bool,

        /// Preview changes without applying (dry-run)
        #[arg(long)]
        dry_run: bool,
    },

    /// List the default and alternate content sources
    Sources {
        #[command(flatten)]
        connection: Connection,
    },

    /// Show a tenant playlist or asset in every configured language
    Translations {
        #[command(flatten)]
        connection: Connection,

        #[command(flatten)]
        settings: Settings,

        /// Content source id
        #[arg(long, default_value = DEFAULT_SOURCE_ID)]
        source: String,

        /// Playlist id
        #[arg(long, conflicts_with = "asset", required_unless_present = "asset")]
        playlist: Option<String>,

        /// Asset id
        #[arg(long)]
        asset: Option<String>,
    },
}

/// Build the store and fetcher clients for a connection.
fn connect(connection: &Connection) -> Result<(Arc<dyn RecordStore>, Arc<dyn CatalogFetcher>)> {
    let mut store =
        HttpRecordStore::new(&connection.store_url).map_err(|e| miette::miette!("{}", e))?;
    if let Some(token) = &connection.store_token {
        store = store.with_bearer_token(token);
    }
    let fetcher = HttpCatalogFetcher::new().map_err(|e| miette::miette!("{}", e))?;
    Ok((Arc::new(store), Arc::new(fetcher)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lumen=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            connection,
            settings,
            source,
            all_sources,
            refresh,
            tree,
        } => {
            let options = sync::SyncOptions {
                source: (!all_sources).then_some(source),
                refresh,
                tree,
            };
            sync::run(&connection, &settings, options).await
        }

        Commands::Migrate {
            connection,
            settings,
            source,
            check,
            dry_run,
        } => migrate::run_migrate_command(&connection, &settings, &source, check, dry_run).await,

        Commands::Sources { connection } => sync::run_sources(&connection).await,

        Commands::Translations {
            connection,
            settings,
            source,
            playlist,
            asset,
        } => {
            let item = match (playlist, asset) {
                (Some(id), _) => sync::TranslatedItem::Playlist(id),
                (None, Some(id)) => sync::TranslatedItem::Asset(id),
                (None, None) => return Err(miette::miette!("Specify --playlist or --asset")),
            };
            sync::run_translations(&connection, &settings, &source, item).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("1", true)]
    #[test_case("TRUE", true)]
    #[test_case("on", true)]
    #[test_case("", false)]
    #[test_case("No", false)]
    fn test_parse_bool_env(input: &str, expected: bool) {
        assert_eq!(parse_bool_env(input), Ok(expected));
    }

    #[test]
    fn test_parse_bool_env_rejects_garbage() {
        assert!(parse_bool_env("maybe").is_err());
    }

    const CONNECTION: [&str; 4] = [
        "--store-url",
        "https://records.test",
        "--catalog-url",
        "https://cdn.test",
    ];

    #[test]
    fn test_sync_settings_build_config() {
        let args = ["lumen", "sync"]
            .into_iter()
            .chain(CONNECTION)
            .chain([
                "--multilingual",
                "--languages",
                "fr-fr, de-de",
                "--cache-ttl-hours",
                "2",
            ]);
        let cli = Cli::try_parse_from(args).unwrap();
        let Commands::Sync {
            settings, source, ..
        } = cli.command
        else {
            panic!("expected sync");
        };

        assert_eq!(source, "Default");
        let config = settings.sync_config();
        assert_eq!(config.default_language, "en-us");
        assert_eq!(config.secondary_languages(), vec!["fr-fr", "de-de"]);
        assert_eq!(config.cache_ttl, Duration::from_secs(2 * 60 * 60));
    }

    #[test]
    fn test_refresh_scope_defaults_to_full() {
        let args = ["lumen", "sync"].into_iter().chain(CONNECTION);
        let with_flag = args.clone().chain(["--refresh"]);
        let Commands::Sync { refresh, .. } = Cli::try_parse_from(with_flag).unwrap().command else {
            panic!("expected sync");
        };
        assert_eq!(refresh, Some(RefreshArg::Full));

        let scoped = args.clone().chain(["--refresh", "playlists"]);
        let Commands::Sync { refresh, .. } = Cli::try_parse_from(scoped).unwrap().command else {
            panic!("expected sync");
        };
        assert_eq!(refresh, Some(RefreshArg::Playlists));

        let Commands::Sync { refresh, .. } = Cli::try_parse_from(args).unwrap().command else {
            panic!("expected sync");
        };
        assert_eq!(refresh, None);
    }

    #[test]
    fn test_languages_ignored_unless_multilingual() {
        let args = ["lumen", "sync"]
            .into_iter()
            .chain(CONNECTION)
            .chain(["--languages", "fr-fr"]);
        let cli = Cli::try_parse_from(args).unwrap();
        let Commands::Sync { settings, .. } = cli.command else {
            panic!("expected sync");
        };
        assert!(settings.sync_config().secondary_languages().is_empty());
    }

    #[test]
    fn test_translations_requires_an_item() {
        let args = ["lumen", "translations"].into_iter().chain(CONNECTION);
        assert!(Cli::try_parse_from(args).is_err());
    }
}
