//! Configuration for coordinators and synchronizers.

use std::time::Duration;

use lumen_store::SchemaVersion;

/// Schema version of the documents this build reads and writes.
pub const CURRENT_SCHEMA_VERSION: SchemaVersion = SchemaVersion::new(4);

/// Default primary language.
pub const DEFAULT_LANGUAGE: &str = "en-us";

/// Settings shared by every coordinator and synchronizer of a process.
///
/// Passed explicitly at construction; nothing reads ambient state.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Primary language; always synchronized first.
    pub default_language: String,
    /// Additional languages, synchronized in the background when
    /// `multilingual` is set. Order is preserved; duplicates of the default
    /// language are ignored.
    pub languages: Vec<String>,
    /// Whether secondary languages are maintained at all.
    pub multilingual: bool,
    /// Schema version persisted documents must carry to be merged.
    pub schema_version: SchemaVersion,
    /// A persisted cache younger than this is served without a refetch.
    pub cache_ttl: Duration,
    /// Upper bound on [`crate::SourceCacheCoordinator::is_ready`].
    pub ready_timeout: Duration,
    /// Upper bound on waiting for in-flight language refreshes.
    pub language_gate_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_language: DEFAULT_LANGUAGE.to_string(),
            languages: Vec::new(),
            multilingual: false,
            schema_version: CURRENT_SCHEMA_VERSION,
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            ready_timeout: Duration::from_secs(120),
            language_gate_timeout: Duration::from_secs(60),
        }
    }
}

impl SyncConfig {
    pub fn with_default_language(mut self, language: impl Into<String>) -> Self {
        self.default_language = language.into();
        self
    }

    /// Enable multilingual support with the given secondary languages.
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self.multilingual = true;
        self
    }

    pub fn with_schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = version;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    pub fn with_language_gate_timeout(mut self, timeout: Duration) -> Self {
        self.language_gate_timeout = timeout;
        self
    }

    /// Secondary languages in configured order, without the default language
    /// or duplicates. Empty unless multilingual support is enabled.
    pub fn secondary_languages(&self) -> Vec<String> {
        if !self.multilingual {
            return Vec::new();
        }
        let mut seen: Vec<String> = vec![self.default_language.to_ascii_lowercase()];
        let mut out = Vec::new();
        for language in &self.languages {
            let key = language.to_ascii_lowercase();
            if !seen.contains(&key) {
                seen.push(key);
                out.push(language.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.default_language, "en-us");
        assert_eq!(config.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(config.ready_timeout, Duration::from_secs(120));
        assert_eq!(config.language_gate_timeout, Duration::from_secs(60));
        assert!(config.secondary_languages().is_empty());
    }

    #[test]
    fn test_secondary_languages_dedup() {
        let config =
            SyncConfig::default().with_languages(["fr-fr", "EN-US", "de-de", "FR-FR", "ja-jp"]);
        assert_eq!(config.secondary_languages(), vec!["fr-fr", "de-de", "ja-jp"]);
    }

    #[test]
    fn test_languages_ignored_when_not_multilingual() {
        let mut config = SyncConfig::default().with_languages(["fr-fr"]);
        config.multilingual = false;
        assert!(config.secondary_languages().is_empty());
    }
}
