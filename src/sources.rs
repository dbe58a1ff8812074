//! Source policy table
//!
//! Every upstream source is cached under its own key with its own freshness
//! windows. `SourcesConfig::default()` carries the table the BFF routes use;
//! a JSON file can replace it and attach URLs so sources can be fetched by
//! the generic HTTP getter.
//!
//! Parameterized sources (one cache entry per parameter, such as the videos
//! of a playlist) are declared once with `parameterized: true`; their entries
//! are keyed `<key>_<param>`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cache::{validate_key, CacheError, CachePolicy, CacherConfig, DEFAULT_FETCH_TIMEOUT};

const HOUR: u64 = 60 * 60;
const MINUTE: u64 = 60;

/// How an upstream body should be interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    /// Decide from the response Content-Type
    #[default]
    Auto,
    Json,
    Xml,
    Script,
    Text,
}

/// Caching rules for one upstream source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Cache key, or key prefix when `parameterized`
    pub key: String,
    /// Freshness window in seconds
    pub age_secs: u64,
    /// Retry window after a failed refresh, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_when_secs: Option<u64>,
    /// Whether entries are keyed `<key>_<param>`
    #[serde(default)]
    pub parameterized: bool,
    /// Upstream URL for the HTTP getter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Body interpretation for the HTTP getter
    #[serde(default)]
    pub format: SourceFormat,
}

impl SourceConfig {
    fn new(key: &str, age_secs: u64, retry_when_secs: Option<u64>) -> Self {
        Self {
            key: key.to_string(),
            age_secs,
            retry_when_secs,
            parameterized: false,
            url: None,
            format: SourceFormat::Auto,
        }
    }

    fn with_format(mut self, format: SourceFormat) -> Self {
        self.format = format;
        self
    }

    fn parameterized(mut self) -> Self {
        self.parameterized = true;
        self
    }

    /// The cache policy for this source
    pub fn policy(&self) -> CachePolicy {
        CachePolicy::from_secs(self.age_secs, self.retry_when_secs)
    }

    /// Cache key for one parameter of a parameterized source
    pub fn key_for(&self, param: &str) -> Result<String, CacheError> {
        param_key(&self.key, param)
    }
}

/// Builds the `<prefix>_<param>` key of a parameterized source
///
/// Fails with `InvalidKey` if the parameter is empty or the resulting key
/// would not be accepted by the engine.
pub fn param_key(prefix: &str, param: &str) -> Result<String, CacheError> {
    if param.is_empty() {
        return Err(CacheError::InvalidKey(format!("{}_", prefix)));
    }
    let key = format!("{}_{}", prefix, param);
    validate_key(&key)?;
    Ok(key)
}

/// The full source table plus engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Upper bound on one upstream fetch, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Retry window after failures for sources without `retry_when_secs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_backoff_secs: Option<u64>,
    /// Configured sources
    pub sources: Vec<SourceConfig>,
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_secs()
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            failure_backoff_secs: None,
            sources: vec![
                SourceConfig::new("sitemap", HOUR, None).with_format(SourceFormat::Xml),
                SourceConfig::new("rss", HOUR, None).with_format(SourceFormat::Xml),
                SourceConfig::new("gtag", 24 * HOUR, Some(HOUR)).with_format(SourceFormat::Script),
                SourceConfig::new("wallpaper", 6 * HOUR, Some(30 * MINUTE)),
                SourceConfig::new("github_repositories", 2 * HOUR, Some(30 * MINUTE)),
                SourceConfig::new("github_contributions", 12 * HOUR, Some(10 * MINUTE)),
                SourceConfig::new("netease_music", 12 * HOUR, Some(10 * MINUTE)),
                SourceConfig::new("twitter_userinfo", 12 * HOUR, Some(10 * MINUTE)),
                SourceConfig::new("twitter_tweets", HOUR, Some(10 * MINUTE)),
                SourceConfig::new("instagram", 2 * HOUR, Some(10 * MINUTE)),
                SourceConfig::new("youtube_playlist", 24 * HOUR, Some(10 * MINUTE)),
                SourceConfig::new("youtube_playlist", HOUR, Some(10 * MINUTE)).parameterized(),
            ],
        }
    }
}

impl SourcesConfig {
    /// Parses and validates a JSON source table
    pub fn from_json_str(json: &str) -> Result<Self, CacheError> {
        let config: SourcesConfig = serde_json::from_str(json)
            .map_err(|e| CacheError::Config(format!("invalid sources file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads a JSON source table from disk
    pub fn load(path: &Path) -> Result<Self, CacheError> {
        let json = fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    /// Checks keys, windows and the fetch timeout
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.fetch_timeout_secs == 0 {
            return Err(CacheError::Config(
                "fetch_timeout_secs must be positive".to_string(),
            ));
        }
        if self.failure_backoff_secs == Some(0) {
            return Err(CacheError::Config(
                "failure_backoff_secs must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            validate_key(&source.key)
                .map_err(|_| CacheError::Config(format!("invalid source key '{}'", source.key)))?;
            source
                .policy()
                .validate()
                .map_err(|e| CacheError::Config(format!("source '{}': {}", source.key, e)))?;
            if !seen.insert((source.key.as_str(), source.parameterized)) {
                return Err(CacheError::Config(format!(
                    "duplicate source key '{}'",
                    source.key
                )));
            }
        }
        Ok(())
    }

    /// Engine settings derived from this table
    pub fn cacher_config(&self) -> CacherConfig {
        CacherConfig {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            failure_backoff: self.failure_backoff_secs.map(Duration::from_secs),
        }
    }

    /// The non-parameterized source registered under `key`
    pub fn get(&self, key: &str) -> Option<&SourceConfig> {
        self.sources
            .iter()
            .find(|source| !source.parameterized && source.key == key)
    }

    /// The source governing a concrete cache key
    ///
    /// Exact matches win; otherwise the parameterized source with the
    /// longest matching `<key>_` prefix is used.
    pub fn source_for(&self, key: &str) -> Option<&SourceConfig> {
        self.get(key).or_else(|| {
            self.sources
                .iter()
                .filter(|source| source.parameterized)
                .filter(|source| {
                    key.strip_prefix(source.key.as_str())
                        .and_then(|rest| rest.strip_prefix('_'))
                        .is_some_and(|param| !param.is_empty())
                })
                .max_by_key(|source| source.key.len())
        })
    }

    /// The cache policy for a concrete cache key
    pub fn policy_for(&self, key: &str) -> Option<CachePolicy> {
        self.source_for(key).map(SourceConfig::policy)
    }

    /// Non-parameterized sources that have an upstream URL
    pub fn fetchable(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources
            .iter()
            .filter(|source| !source.parameterized && source.url.is_some())
    }

    /// Keeps only the sources whose key is listed
    ///
    /// Fails if a listed key is not configured.
    pub fn retain_keys(&mut self, keys: &[String]) -> Result<(), CacheError> {
        if keys.is_empty() {
            return Ok(());
        }
        if let Some(missing) = keys
            .iter()
            .find(|key| !self.sources.iter().any(|source| &source.key == *key))
        {
            return Err(CacheError::Config(format!("unknown source '{}'", missing)));
        }
        self.sources.retain(|source| keys.contains(&source.key));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_table_is_valid() {
        let config = SourcesConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sources.len(), 12);
        assert_eq!(config.fetch_timeout_secs, 30);
    }

    #[test]
    fn test_default_policies() {
        let config = SourcesConfig::default();

        let gtag = config.policy_for("gtag").expect("gtag configured");
        assert_eq!(gtag.age, Duration::from_secs(24 * 3600));
        assert_eq!(gtag.retry_when, Some(Duration::from_secs(3600)));

        let rss = config.policy_for("rss").expect("rss configured");
        assert_eq!(rss.retry_when, None);
        assert_eq!(config.get("rss").map(|s| s.format), Some(SourceFormat::Xml));
    }

    #[test]
    fn test_parameterized_lookup() {
        let config = SourcesConfig::default();

        let channel = config.policy_for("youtube_playlist").expect("channel playlists");
        assert_eq!(channel.age, Duration::from_secs(24 * 3600));

        let videos = config
            .policy_for("youtube_playlist_PLabc123")
            .expect("playlist videos");
        assert_eq!(videos.age, Duration::from_secs(3600));
        assert_eq!(videos.retry_when, Some(Duration::from_secs(600)));

        assert!(config.policy_for("youtube_playlist_").is_none());
        assert!(config.policy_for("unknown").is_none());
    }

    #[test]
    fn test_param_key() {
        assert_eq!(
            param_key("youtube_playlist", "PL42").as_deref(),
            Ok("youtube_playlist_PL42")
        );
        assert!(param_key("youtube_playlist", "").is_err());
        assert!(param_key("youtube_playlist", "has space").is_err());
    }

    #[test]
    fn test_from_json_applies_defaults() {
        let config = SourcesConfig::from_json_str(
            r#"{
                "sources": [
                    { "key": "github_repositories", "age_secs": 7200, "retry_when_secs": 1800,
                      "url": "https://api.github.com/users/octocat/repos", "format": "json" }
                ]
            }"#,
        )
        .expect("valid config");

        assert_eq!(config.fetch_timeout_secs, 30);
        assert_eq!(config.failure_backoff_secs, None);
        let source = &config.sources[0];
        assert!(!source.parameterized);
        assert_eq!(source.format, SourceFormat::Json);
        assert_eq!(config.fetchable().count(), 1);
    }

    #[test]
    fn test_validation_rejects_bad_tables() {
        let retry_longer_than_age =
            r#"{"sources": [{ "key": "rss", "age_secs": 60, "retry_when_secs": 120 }]}"#;
        assert!(SourcesConfig::from_json_str(retry_longer_than_age).is_err());

        let duplicate = r#"{"sources": [
            { "key": "rss", "age_secs": 60 },
            { "key": "rss", "age_secs": 120 }
        ]}"#;
        let err = SourcesConfig::from_json_str(duplicate).unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let bad_key = r#"{"sources": [{ "key": "", "age_secs": 60 }]}"#;
        assert!(SourcesConfig::from_json_str(bad_key).is_err());

        let zero_timeout = r#"{"fetch_timeout_secs": 0, "sources": []}"#;
        assert!(SourcesConfig::from_json_str(zero_timeout).is_err());

        assert!(SourcesConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        write!(
            file,
            r#"{{"fetch_timeout_secs": 5, "failure_backoff_secs": 60,
                "sources": [{{ "key": "rss", "age_secs": 3600, "url": "http://localhost/rss.xml" }}]}}"#
        )
        .expect("write config");

        let config = SourcesConfig::load(file.path()).expect("load config");
        let engine = config.cacher_config();
        assert_eq!(engine.fetch_timeout, Duration::from_secs(5));
        assert_eq!(engine.failure_backoff, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let result = SourcesConfig::load(&dir.path().join("missing.json"));
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[test]
    fn test_retain_keys() {
        let mut config = SourcesConfig::default();
        config
            .retain_keys(&["rss".to_string(), "youtube_playlist".to_string()])
            .expect("known keys");
        assert_eq!(config.sources.len(), 3);

        let mut config = SourcesConfig::default();
        assert!(config.retain_keys(&["nope".to_string()]).is_err());
        assert!(config.retain_keys(&[]).is_ok());
        assert_eq!(config.sources.len(), 12);
    }
}
