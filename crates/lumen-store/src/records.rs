//! Record kinds and well-known keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Id of the content source every tenant starts with.
pub const DEFAULT_SOURCE_ID: &str = "Default";

/// The kind of a persisted record.
///
/// `Cache`, `Overrides` and `CustomCdn` are singletons per (source, language);
/// `Playlist` and `Asset` hold one tenant item per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    Cache,
    Overrides,
    CustomCdn,
    Playlist,
    Asset,
}

impl RecordKind {
    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Cache => "cache",
            RecordKind::Overrides => "overrides",
            RecordKind::CustomCdn => "custom-cdn",
            RecordKind::Playlist => "playlist",
            RecordKind::Asset => "asset",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names_match_serde() {
        for kind in [
            RecordKind::Cache,
            RecordKind::Overrides,
            RecordKind::CustomCdn,
            RecordKind::Playlist,
            RecordKind::Asset,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
