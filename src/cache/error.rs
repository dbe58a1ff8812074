//! Error types for the caching layer

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when resolving a cached value
///
/// The type is `Clone` because a single failed fetch is reported to every
/// caller that joined it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The key is empty or contains characters not allowed in a cache key
    #[error("Invalid cache key: '{0}'")]
    InvalidKey(String),

    /// The age/retry window combination cannot be used
    #[error("Invalid cache policy: {0}")]
    InvalidPolicy(String),

    /// The getter failed and there was no cached value to fall back on
    #[error("Upstream fetch for '{key}' failed: {message}")]
    UpstreamFetch { key: String, message: String },

    /// The getter did not resolve within the configured fetch timeout
    #[error("Upstream fetch for '{key}' timed out after {after:?}")]
    Timeout { key: String, after: Duration },

    /// Source configuration could not be loaded or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Returns the key the error relates to, if any
    pub fn key(&self) -> Option<&str> {
        match self {
            CacheError::InvalidKey(key) => Some(key),
            CacheError::UpstreamFetch { key, .. } | CacheError::Timeout { key, .. } => Some(key),
            CacheError::InvalidPolicy(_) | CacheError::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_message_mentions_key_and_cause() {
        let err = CacheError::UpstreamFetch {
            key: "github_repositories".to_string(),
            message: "connection refused".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("github_repositories"));
        assert!(text.contains("connection refused"));
        assert_eq!(err.key(), Some("github_repositories"));
    }

    #[test]
    fn test_timeout_error_reports_duration() {
        let err = CacheError::Timeout {
            key: "rss".to_string(),
            after: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_policy_error_has_no_key() {
        let err = CacheError::InvalidPolicy("age must be positive".to_string());
        assert!(err.key().is_none());
    }
}
