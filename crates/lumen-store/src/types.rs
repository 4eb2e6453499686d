//! Payload shapes for catalog documents and tenant records.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_SOURCE_ID;

/// A document schema version, written as `v<N>` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaVersion(pub u32);

impl SchemaVersion {
    pub const fn new(version: u32) -> Self {
        Self(version)
    }

    pub fn number(self) -> u32 {
        self.0
    }

    /// Parse `v4`, `V4` or `4`.
    pub fn parse(s: &str) -> Option<Self> {
        s.trim()
            .trim_start_matches(['v', 'V'])
            .parse()
            .ok()
            .map(Self)
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for SchemaVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid schema version '{}'", s))
    }
}

impl TryFrom<String> for SchemaVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SchemaVersion> for String {
    fn from(v: SchemaVersion) -> Self {
        v.to_string()
    }
}

/// One translation of a multilingual field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub language_code: String,
    pub text: String,
}

/// A text field that is either a legacy plain string or an ordered list of
/// translations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LocalizedText {
    Plain(String),
    Translations(Vec<Translation>),
}

impl Default for LocalizedText {
    fn default() -> Self {
        LocalizedText::Plain(String::new())
    }
}

impl From<&str> for LocalizedText {
    fn from(s: &str) -> Self {
        LocalizedText::Plain(s.to_string())
    }
}

impl From<String> for LocalizedText {
    fn from(s: String) -> Self {
        LocalizedText::Plain(s)
    }
}

impl LocalizedText {
    /// Build a multilingual value from `(language, text)` pairs.
    pub fn translated<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        LocalizedText::Translations(
            pairs
                .into_iter()
                .map(|(language_code, text)| Translation {
                    language_code: language_code.to_string(),
                    text: text.to_string(),
                })
                .collect(),
        )
    }

    pub fn is_multilingual(&self) -> bool {
        matches!(self, LocalizedText::Translations(_))
    }

    /// The translation for `language`, if this is a multilingual value that
    /// carries one. Language codes compare case-insensitively.
    pub fn translation(&self, language: &str) -> Option<&str> {
        match self {
            LocalizedText::Plain(_) => None,
            LocalizedText::Translations(list) => list
                .iter()
                .find(|t| t.language_code.eq_ignore_ascii_case(language))
                .map(|t| t.text.as_str()),
        }
    }

    /// The plain string, or the first translation.
    pub fn first(&self) -> Option<&str> {
        match self {
            LocalizedText::Plain(s) => Some(s.as_str()),
            LocalizedText::Translations(list) => list.first().map(|t| t.text.as_str()),
        }
    }

    /// Language codes this value carries a translation for.
    pub fn languages(&self) -> Vec<&str> {
        match self {
            LocalizedText::Plain(_) => Vec::new(),
            LocalizedText::Translations(list) => {
                list.iter().map(|t| t.language_code.as_str()).collect()
            }
        }
    }
}

/// A node in the category tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryNode {
    pub id: String,
    #[serde(default)]
    pub name: LocalizedText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<LocalizedText>,
    #[serde(default)]
    pub sub_categories: Vec<CategoryNode>,
    /// Root-to-node id chain, computed once per merge pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<String>>,
    /// Number of playlists filed directly under this node.
    #[serde(default)]
    pub count: usize,
}

impl CategoryNode {
    pub fn new(id: impl Into<String>, name: impl Into<LocalizedText>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            image: None,
            sub_categories: Vec::new(),
            path: None,
            count: 0,
        }
    }

    pub fn with_children(mut self, children: Vec<CategoryNode>) -> Self {
        self.sub_categories = children;
        self
    }
}

/// A subject within a technology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// A technology and its subjects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Technology {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

/// Where a playlist or asset came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    /// Read-only mirror of the remote catalog.
    #[default]
    Catalog,
    /// Created by the tenant and editable by its admins.
    Tenant,
}

/// A playlist: an ordered list of assets filed under one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<LocalizedText>,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub technology_id: String,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub asset_ids: Vec<String>,
    #[serde(default)]
    pub source: ItemSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_token: Option<String>,
}

/// A single learning asset (article, video, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: String,
    #[serde(default)]
    pub title: LocalizedText,
    #[serde(default)]
    pub description: LocalizedText,
    #[serde(default)]
    pub url: LocalizedText,
    #[serde(default)]
    pub technology_id: String,
    #[serde(default)]
    pub subject_id: String,
    #[serde(default)]
    pub source: ItemSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_token: Option<String>,
}

/// The immutable remote catalog for one content source and language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    pub schema_version: String,
    #[serde(default)]
    pub categories: Vec<CategoryNode>,
    #[serde(default)]
    pub technologies: Vec<Technology>,
    #[serde(default)]
    pub supported_languages: Vec<String>,
    #[serde(default)]
    pub telemetry_key: String,
    #[serde(default)]
    pub asset_origins: Vec<String>,
    #[serde(default)]
    pub playlists: Vec<Playlist>,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

/// Tenant customizations layered on top of the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    #[serde(default)]
    pub hidden_technology_ids: BTreeSet<String>,
    #[serde(default)]
    pub hidden_subject_ids: BTreeSet<String>,
    #[serde(default)]
    pub hidden_sub_category_ids: BTreeSet<String>,
    #[serde(default)]
    pub hidden_playlist_ids: BTreeSet<String>,
    /// Each entry's id names an existing top-level category; its
    /// `sub_categories` are appended to that category.
    #[serde(default)]
    pub custom_sub_categories: Vec<CategoryNode>,
}

/// The merged, per-(source, language) document consumed by presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedCache {
    /// Record id; `None` until first persisted.
    #[serde(skip)]
    pub id: Option<String>,
    #[serde(skip)]
    pub concurrency_token: Option<String>,
    pub language: String,
    pub schema_version: SchemaVersion,
    #[serde(default)]
    pub catalog_version: String,
    #[serde(default)]
    pub categories: Vec<CategoryNode>,
    #[serde(default)]
    pub technologies: Vec<Technology>,
    #[serde(default)]
    pub cached_playlists: Vec<Playlist>,
    #[serde(default)]
    pub cached_assets: Vec<Asset>,
    #[serde(default)]
    pub asset_origins: Vec<String>,
    #[serde(default)]
    pub telemetry_key: String,
    pub last_updated: DateTime<Utc>,
}

/// A named origin publishing one catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
}

impl ContentSource {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            base_url: base_url.into(),
        }
    }

    /// The default source for a tenant.
    pub fn default_source(base_url: impl Into<String>) -> Self {
        Self::new(DEFAULT_SOURCE_ID, base_url)
    }

    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_SOURCE_ID
    }
}
