//! Engine configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//!
//! ```toml
//! partial_completion_policy = "strict"
//! max_processing_attempts = 3
//!
//! [cache]
//! enabled = true
//! ttl_secs = 300
//! max_capacity = 10000
//!
//! [cache.retry]
//! max_attempts = 3
//! base_delay_ms = 10
//! max_delay_ms = 200
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use waymark_cache::RetryPolicy;

/// Configuration failure
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Config file is not valid TOML for this schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How quality floors treat instances that are not yet completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialCompletionPolicy {
    /// Only a score recorded on a completed instance counts
    #[default]
    Strict,
    /// Any recorded score counts
    Lenient,
}

/// Backoff for cache backend calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Backend calls per operation, first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap on the doubled delay
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 200,
        }
    }
}

impl RetryConfig {
    /// Runtime retry schedule
    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Eligibility cache settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false a no-op backend is used
    pub enabled: bool,
    /// Entry time-to-live in seconds
    pub ttl_secs: u64,
    /// Maximum number of entries
    pub max_capacity: u64,
    /// Backoff for backend failures
    pub retry: RetryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300,
            max_capacity: 10_000,
            retry: RetryConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Entry time-to-live
    #[inline]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Eligibility cache
    pub cache: CacheConfig,
    /// How quality floors treat unfinished instances
    pub partial_completion_policy: PartialCompletionPolicy,
    /// Failed attempts after which a retry is refused; `None` or 0 means unlimited
    pub max_processing_attempts: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            partial_completion_policy: PartialCompletionPolicy::Strict,
            max_processing_attempts: Some(3),
        }
    }
}

impl EngineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML text
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Read and parse a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// With cache settings
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Disable caching entirely
    #[inline]
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }

    /// With partial-completion policy
    #[inline]
    #[must_use]
    pub fn with_partial_completion_policy(mut self, policy: PartialCompletionPolicy) -> Self {
        self.partial_completion_policy = policy;
        self
    }

    /// With retry limit; `None` disables it
    #[inline]
    #[must_use]
    pub fn with_max_processing_attempts(mut self, limit: Option<u32>) -> Self {
        self.max_processing_attempts = limit;
        self
    }

    /// Effective retry limit
    #[must_use]
    pub fn retry_limit(&self) -> Option<u32> {
        self.max_processing_attempts.filter(|limit| *limit > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(EngineConfig::from_toml_str("").unwrap(), EngineConfig::default());
    }

    #[test]
    fn parses_nested_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            partial_completion_policy = "lenient"
            max_processing_attempts = 0

            [cache]
            ttl_secs = 5

            [cache.retry]
            max_attempts = 1
            "#,
        )
        .unwrap();

        assert_eq!(config.partial_completion_policy, PartialCompletionPolicy::Lenient);
        assert_eq!(config.retry_limit(), None);
        assert_eq!(config.cache.ttl(), Duration::from_secs(5));
        assert_eq!(config.cache.max_capacity, 10_000);
        assert_eq!(config.cache.retry.max_attempts, 1);
        assert_eq!(config.cache.retry.base_delay_ms, 10);
    }

    #[test]
    fn rejects_unknown_policy() {
        assert!(EngineConfig::from_toml_str(r#"partial_completion_policy = "fuzzy""#).is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = EngineConfig::load("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn builders_compose() {
        let config = EngineConfig::new()
            .without_cache()
            .with_max_processing_attempts(None);
        assert!(!config.cache.enabled);
        assert_eq!(config.retry_limit(), None);
        assert_eq!(EngineConfig::default().retry_limit(), Some(3));
    }
}
