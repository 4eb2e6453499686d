//! Schema migrations for persisted documents.
//!
//! Migrations are plain functions registered in a table keyed by document
//! kind and source version. Each step upgrades one version, works on a copy
//! of its input and is idempotent; versions with no registered step pass the
//! document through untouched.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use lumen_store::{CatalogSnapshot, CategoryNode, RecordKind, SchemaVersion};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::tree::compute_paths;

/// The kinds of persisted document the migrator knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationKind {
    Cache,
    Overrides,
    Playlists,
    Assets,
}

impl MigrationKind {
    /// Tenant upgrade order. The cache runs last because it assumes the
    /// other documents already have the new shape.
    pub const UPGRADE_ORDER: [MigrationKind; 4] = [
        MigrationKind::Overrides,
        MigrationKind::Playlists,
        MigrationKind::Assets,
        MigrationKind::Cache,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MigrationKind::Cache => "cache",
            MigrationKind::Overrides => "overrides",
            MigrationKind::Playlists => "playlists",
            MigrationKind::Assets => "assets",
        }
    }

    /// The record kind holding documents of this kind.
    pub fn record_kind(self) -> RecordKind {
        match self {
            MigrationKind::Cache => RecordKind::Cache,
            MigrationKind::Overrides => RecordKind::Overrides,
            MigrationKind::Playlists => RecordKind::Playlist,
            MigrationKind::Assets => RecordKind::Asset,
        }
    }
}

impl fmt::Display for MigrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only data a migration step may consult.
#[derive(Debug, Clone)]
pub struct MigrationContext {
    /// Catalog used to re-resolve ids from names.
    pub catalog: Option<Arc<CatalogSnapshot>>,
    /// Language plain strings are assumed to be written in.
    pub default_language: String,
}

/// A single `v -> v + 1` step. Mutates its argument in place; the migrator
/// hands it a copy and discards the copy if the step fails.
pub type MigrationFn = fn(&mut Value, &MigrationContext) -> Result<(), String>;

/// The result of running a chain of migrations.
#[derive(Debug)]
pub struct MigrationOutcome {
    pub value: Value,
    /// Source versions whose step ran successfully.
    pub applied_steps: Vec<u32>,
    /// Steps that failed; their input was kept and the chain continued.
    pub failures: Vec<SyncError>,
}

/// Table of migration steps.
pub struct VersionMigrator {
    steps: BTreeMap<(MigrationKind, u32), MigrationFn>,
}

impl Default for VersionMigrator {
    fn default() -> Self {
        Self::new()
    }
}

impl VersionMigrator {
    /// A migrator with no steps; every migration is the identity.
    pub fn empty() -> Self {
        Self {
            steps: BTreeMap::new(),
        }
    }

    /// A migrator with the built-in steps.
    pub fn new() -> Self {
        Self::empty()
            .with_step(MigrationKind::Overrides, 2, fold_legacy_hidden_ids)
            .with_step(MigrationKind::Playlists, 2, resolve_catalog_ids)
            .with_step(MigrationKind::Assets, 2, resolve_catalog_ids)
            .with_step(MigrationKind::Overrides, 3, overrides_to_multilingual)
            .with_step(MigrationKind::Playlists, 3, playlist_to_multilingual)
            .with_step(MigrationKind::Assets, 3, asset_to_multilingual)
            .with_step(MigrationKind::Cache, 3, cache_fill_paths)
    }

    /// Register the step upgrading `kind` from `from` to `from + 1`,
    /// replacing any existing one.
    pub fn with_step(mut self, kind: MigrationKind, from: u32, step: MigrationFn) -> Self {
        self.steps.insert((kind, from), step);
        self
    }

    pub fn has_step(&self, kind: MigrationKind, from: u32) -> bool {
        self.steps.contains_key(&(kind, from))
    }

    /// Migrate `input` from version `from` to version `to`.
    pub fn migrate(
        &self,
        kind: MigrationKind,
        from: u32,
        to: u32,
        input: &Value,
        context: &MigrationContext,
    ) -> Value {
        self.migrate_with_report(kind, from, to, input, context).value
    }

    /// Like [`migrate`](Self::migrate), also reporting which steps ran and
    /// which failed.
    pub fn migrate_with_report(
        &self,
        kind: MigrationKind,
        from: u32,
        to: u32,
        input: &Value,
        context: &MigrationContext,
    ) -> MigrationOutcome {
        let mut value = input.clone();
        let mut applied_steps = Vec::new();
        let mut failures = Vec::new();

        for version in from..to {
            let Some(step) = self.steps.get(&(kind, version)) else {
                continue;
            };
            let mut next = value.clone();
            match step(&mut next, context) {
                Ok(()) => {
                    if kind == MigrationKind::Cache {
                        stamp_cache_version(&mut next, SchemaVersion(version + 1));
                    }
                    debug!(%kind, from = version, "migration step applied");
                    value = next;
                    applied_steps.push(version);
                }
                Err(message) => {
                    let err = SyncError::MigrationStep {
                        kind: kind.as_str(),
                        from: version,
                        message,
                    };
                    warn!(error = %err, "migration step failed; keeping input");
                    failures.push(err);
                }
            }
        }

        MigrationOutcome {
            value,
            applied_steps,
            failures,
        }
    }
}

fn as_object<'a>(value: &'a mut Value, what: &str) -> Result<&'a mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| format!("{} is not a JSON object", what))
}

const LEGACY_HIDDEN_KEYS: [(&str, &str); 4] = [
    ("hiddenTechnology", "hiddenTechnologyIds"),
    ("hiddenSubject", "hiddenSubjectIds"),
    ("hiddenSubCategories", "hiddenSubCategoryIds"),
    ("hiddenPlaylistsIds", "hiddenPlaylistIds"),
];

/// Legacy entries are either bare ids or `{ "id": ... }` objects.
fn legacy_id(entry: &Value) -> Option<String> {
    match entry {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(o) => o.get("id").and_then(legacy_id),
        _ => None,
    }
}

fn fold_legacy_hidden_ids(doc: &mut Value, _: &MigrationContext) -> Result<(), String> {
    let doc = as_object(doc, "overrides")?;
    for (legacy, canonical) in LEGACY_HIDDEN_KEYS {
        let Some(old) = doc.remove(legacy) else {
            continue;
        };
        let old = match old {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => return Err(format!("{} is not a list: {}", legacy, other)),
        };

        let mut ids: Vec<String> = match doc.get(canonical) {
            Some(Value::Array(items)) => items.iter().filter_map(legacy_id).collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => return Err(format!("{} is not a list: {}", canonical, other)),
        };
        for id in old.iter().filter_map(legacy_id) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        doc.insert(canonical.to_string(), json!(ids));
    }
    Ok(())
}

/// Re-resolve `technologyId`/`subjectId` from the legacy `technology` and
/// `subject` names. Names that match nothing leave the ids as they were.
fn resolve_catalog_ids(item: &mut Value, context: &MigrationContext) -> Result<(), String> {
    let item = as_object(item, "item")?;
    let technology_name = item.remove("technology");
    let subject_name = item.remove("subject");
    if technology_name.is_none() && subject_name.is_none() {
        return Ok(());
    }
    let catalog = context
        .catalog
        .as_ref()
        .ok_or_else(|| "catalog required to resolve technology names".to_string())?;

    let technology = technology_name
        .as_ref()
        .and_then(Value::as_str)
        .and_then(|name| {
            catalog
                .technologies
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(name))
        });
    if let Some(technology) = technology {
        item.insert("technologyId".to_string(), json!(technology.id));
    }

    if let Some(name) = subject_name.as_ref().and_then(Value::as_str) {
        let mut candidates = technology
            .into_iter()
            .chain(catalog.technologies.iter())
            .flat_map(|t| t.subjects.iter());
        match candidates.find(|s| s.name.eq_ignore_ascii_case(name)) {
            Some(subject) => {
                item.insert("subjectId".to_string(), json!(subject.id));
            }
            None => debug!(subject = name, "legacy subject name not found in catalog"),
        }
    }
    Ok(())
}

/// Rewrite a plain-string field as a one-entry translation list.
fn multilingual_field(
    object: &mut Map<String, Value>,
    field: &str,
    language: &str,
) -> Result<(), String> {
    match object.get(field) {
        Some(Value::String(text)) => {
            let translated = json!([{ "languageCode": language, "text": text }]);
            object.insert(field.to_string(), translated);
            Ok(())
        }
        Some(Value::Array(_)) | Some(Value::Null) | None => Ok(()),
        Some(other) => Err(format!("{} has unexpected shape: {}", field, other)),
    }
}

fn multilingual_fields(
    item: &mut Value,
    fields: &[&str],
    context: &MigrationContext,
) -> Result<(), String> {
    let item = as_object(item, "item")?;
    for field in fields {
        multilingual_field(item, field, &context.default_language)?;
    }
    Ok(())
}

fn playlist_to_multilingual(item: &mut Value, context: &MigrationContext) -> Result<(), String> {
    multilingual_fields(item, &["title", "description", "image"], context)
}

fn asset_to_multilingual(item: &mut Value, context: &MigrationContext) -> Result<(), String> {
    multilingual_fields(item, &["title", "description", "url"], context)
}

fn category_to_multilingual(node: &mut Value, language: &str) -> Result<(), String> {
    let node = as_object(node, "category")?;
    multilingual_field(node, "name", language)?;
    multilingual_field(node, "image", language)?;
    if let Some(children) = node.get_mut("subCategories").and_then(Value::as_array_mut) {
        for child in children {
            category_to_multilingual(child, language)?;
        }
    }
    Ok(())
}

fn overrides_to_multilingual(doc: &mut Value, context: &MigrationContext) -> Result<(), String> {
    let doc = as_object(doc, "overrides")?;
    if let Some(custom) = doc
        .get_mut("customSubCategories")
        .and_then(Value::as_array_mut)
    {
        for entry in custom {
            category_to_multilingual(entry, &context.default_language)?;
        }
    }
    Ok(())
}

fn cache_fill_paths(doc: &mut Value, _: &MigrationContext) -> Result<(), String> {
    let doc = as_object(doc, "cache")?;
    if let Some(categories) = doc.get_mut("categories") {
        let mut nodes: Vec<CategoryNode> =
            serde_json::from_value(categories.take()).map_err(|e| e.to_string())?;
        compute_paths(&mut nodes);
        *categories = serde_json::to_value(nodes).map_err(|e| e.to_string())?;
    }
    Ok(())
}

/// Cache documents carry their own version stamp.
fn stamp_cache_version(doc: &mut Value, version: SchemaVersion) {
    if let Some(doc) = doc.as_object_mut() {
        doc.insert("schemaVersion".to_string(), json!(version.to_string()));
    }
}
