//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid listen address: {0}")]
    InvalidAddress(String),

    #[error("Invalid timeout for {0}")]
    InvalidTimeout(&'static str),

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Invalid Redis URL format")]
    InvalidRedisUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("Invalid node id")]
    InvalidNodeId,

    #[error("Retry policy is invalid: {0}")]
    InvalidRetryPolicy(&'static str),

    #[error("Event partitions must be between 1 and 1024")]
    InvalidPartitions,

    #[error("Invalid limit: {0}")]
    InvalidLimit(&'static str),

    #[error("Invalid key prefix: {0}")]
    InvalidPrefix(&'static str),

    #[error(
        "server.request_timeout_secs ({configured_ms}ms) must exceed the mutation budget ({required_ms}ms)"
    )]
    RequestTimeoutTooShort { configured_ms: u64, required_ms: u64 },
}
