//! Request limits

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Longest lifetime a create or touch may grant, in seconds
    #[serde(default = "default_max_ttl_secs")]
    pub max_ttl_secs: u64,

    /// Largest serialized payload accepted
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
}

impl LimitsConfig {
    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.max_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_ttl_secs == 0 {
            return Err(ValidationError::InvalidLimit("limits.max_ttl_secs"));
        }
        if self.max_payload_bytes == 0 {
            return Err(ValidationError::InvalidLimit("limits.max_payload_bytes"));
        }
        Ok(())
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ttl_secs: default_max_ttl_secs(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_max_ttl_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_max_payload_bytes() -> usize {
    256 * 1024
}
