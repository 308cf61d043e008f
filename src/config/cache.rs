//! FastCache configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
    /// Every read goes to the StateStore
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Upper bound on how long a cached record may be served, in milliseconds
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Per-call deadline; a slow cache is treated as a miss
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Redis key namespace
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ttl_ms == 0 {
            return Err(ValidationError::InvalidTimeout("cache.ttl_ms"));
        }
        if self.timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout("cache.timeout_ms"));
        }
        if self.key_prefix.trim().is_empty() || self.key_prefix.contains(char::is_whitespace) {
            return Err(ValidationError::InvalidPrefix("cache.key_prefix"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            ttl_ms: default_ttl_ms(),
            timeout_ms: default_timeout_ms(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_ttl_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    200
}

fn default_key_prefix() -> String {
    "session-grid:session".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.backend, CacheBackend::Memory);
        assert_eq!(config.ttl(), Duration::from_secs(5));
        assert_eq!(config.timeout(), Duration::from_millis(200));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_blank_prefix_rejected() {
        let config = CacheConfig {
            key_prefix: "has space".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
