//! Cache synchronization and schema upgrade engine for Lumen.
//!
//! Merges the remote content catalog with a tenant's customizations into one
//! cache document per (content source, language), keeps it fresh, and moves
//! persisted documents forward when their schema changes.
//!
//! ## Architecture
//!
//! ```text
//! CoordinatorRegistry
//!   └── SourceCacheCoordinator      one per source id; init state machine
//!         └── LanguageCoordinator   primary + background secondary languages
//!               └── CacheSynchronizer   fetch, merge, persist (one per language)
//!
//! TenantUpgrade -> VersionMigrator   table of per-version migration steps
//! ```

pub mod config;
pub mod coordinator;
mod error;
pub mod languages;
pub mod migrator;
pub mod sources;
pub mod synchronizer;
pub mod text;
pub mod tree;
pub mod upgrade;

pub use config::{CURRENT_SCHEMA_VERSION, DEFAULT_LANGUAGE, SyncConfig};
pub use coordinator::{
    CoordinatorRegistry, CoordinatorState, InitOutcome, SourceCacheCoordinator, VersionGap,
};
pub use error::SyncError;
pub use languages::{GateGuard, ItemTranslation, LanguageCoordinator, ReadyGate};
pub use migrator::{MigrationContext, MigrationFn, MigrationKind, MigrationOutcome, VersionMigrator};
pub use sources::load_content_sources;
pub use synchronizer::{CacheSynchronizer, RefreshScope, SyncInputs, merge};
pub use tree::FlatCategory;
pub use upgrade::{TenantUpgrade, UpgradeChange, UpgradeReport};
