//! Whole-tenant schema upgrade.
//!
//! Walks every persisted record of a content source, runs the migration
//! chain on the ones stamped with an older schema version and writes them
//! back stamped with the current one.

use std::sync::Arc;

use lumen_store::{
    CatalogFetcher, ContentSource, RecordPayload, RecordStore, SchemaVersion, StoredRecord,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::migrator::{MigrationContext, MigrationKind, VersionMigrator};

/// One record the upgrade rewrote, or would rewrite in a dry run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeChange {
    pub kind: MigrationKind,
    pub record_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    /// Steps that failed for this record; the record is still restamped.
    pub failed_steps: Vec<u32>,
}

/// Summary of an upgrade run.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeReport {
    pub dry_run: bool,
    pub records_examined: usize,
    pub records_updated: usize,
    pub step_failures: usize,
    /// Records that could not be read or written back.
    pub records_failed: Vec<String>,
    pub changes: Vec<UpgradeChange>,
}

impl UpgradeReport {
    pub fn is_clean(&self) -> bool {
        self.step_failures == 0 && self.records_failed.is_empty()
    }
}

/// Upgrades every record of one content source to the configured schema.
pub struct TenantUpgrade {
    source: ContentSource,
    config: Arc<SyncConfig>,
    store: Arc<dyn RecordStore>,
    fetcher: Arc<dyn CatalogFetcher>,
    migrator: VersionMigrator,
}

impl TenantUpgrade {
    pub fn new(
        source: ContentSource,
        config: Arc<SyncConfig>,
        store: Arc<dyn RecordStore>,
        fetcher: Arc<dyn CatalogFetcher>,
    ) -> Self {
        Self {
            source,
            config,
            store,
            fetcher,
            migrator: VersionMigrator::new(),
        }
    }

    /// Replace the migration table.
    pub fn with_migrator(mut self, migrator: VersionMigrator) -> Self {
        self.migrator = migrator;
        self
    }

    fn target(&self) -> SchemaVersion {
        self.config.schema_version
    }

    async fn stale_records(&self, kind: MigrationKind) -> Result<Vec<StoredRecord>, SyncError> {
        let records = self.store.list(kind.record_kind(), &self.source.id).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.schema_version < self.target())
            .collect())
    }

    /// Whether any record of this source is stamped with an older schema.
    pub async fn needs_upgrade(&self) -> Result<bool, SyncError> {
        for kind in MigrationKind::UPGRADE_ORDER {
            if !self.stale_records(kind).await?.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Run the upgrade. A dry run reports what would change without writing.
    pub async fn run(&self, dry_run: bool) -> Result<UpgradeReport, SyncError> {
        let catalog = self
            .fetcher
            .fetch(&self.source.base_url, &self.config.default_language)
            .await
            .map(Arc::new);
        if catalog.is_none() {
            warn!(source_id = %self.source.id, "catalog unavailable; name resolution steps will fail open");
        }
        let context = MigrationContext {
            catalog,
            default_language: self.config.default_language.clone(),
        };

        let mut report = UpgradeReport {
            dry_run,
            ..Default::default()
        };

        for kind in MigrationKind::UPGRADE_ORDER {
            for record in self.stale_records(kind).await? {
                report.records_examined += 1;
                self.upgrade_record(kind, &record, &context, dry_run, &mut report)
                    .await;
            }
        }

        info!(
            source_id = %self.source.id,
            dry_run,
            updated = report.records_updated,
            step_failures = report.step_failures,
            failed = report.records_failed.len(),
            "tenant upgrade finished"
        );
        Ok(report)
    }

    async fn upgrade_record(
        &self,
        kind: MigrationKind,
        record: &StoredRecord,
        context: &MigrationContext,
        dry_run: bool,
        report: &mut UpgradeReport,
    ) {
        let input: Value = match serde_json::from_str(&record.payload_json) {
            Ok(value) => value,
            Err(e) => {
                warn!(%kind, id = %record.id, error = %e, "record payload does not parse; skipping");
                report.records_failed.push(record.id.clone());
                return;
            }
        };

        let outcome = self.migrator.migrate_with_report(
            kind,
            record.schema_version.number(),
            self.target().number(),
            &input,
            context,
        );
        report.step_failures += outcome.failures.len();

        let change = UpgradeChange {
            kind,
            record_id: record.id.clone(),
            language: record.language.clone(),
            from: record.schema_version,
            to: self.target(),
            failed_steps: outcome
                .failures
                .iter()
                .filter_map(|f| match f {
                    SyncError::MigrationStep { from, .. } => Some(*from),
                    _ => None,
                })
                .collect(),
        };

        if !dry_run {
            let written = async {
                let payload = RecordPayload::encode(self.target(), &outcome.value)?;
                self.store
                    .update(
                        kind.record_kind(),
                        &record.id,
                        payload,
                        &record.concurrency_token,
                    )
                    .await?;
                Ok::<_, SyncError>(())
            }
            .await;

            if let Err(e) = written {
                warn!(%kind, id = %record.id, error = %e, "failed to write upgraded record");
                report.records_failed.push(record.id.clone());
                return;
            }
            report.records_updated += 1;
        }
        report.changes.push(change);
    }
}
