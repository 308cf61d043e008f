//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `SESSION_GRID` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use session_grid::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Server running on {:?}", config.server.socket_addr());
//! ```

mod cache;
mod database;
mod error;
mod events;
mod limits;
mod rabbitmq;
mod redis;
mod server;
mod store;
mod sweeper;

pub use cache::{CacheBackend, CacheConfig};
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use events::{EventsBackend, EventsConfig};
pub use limits::LimitsConfig;
pub use rabbitmq::RabbitMqConfig;
pub use redis::RedisConfig;
pub use server::{Environment, ServerConfig};
pub use store::{StoreBackend, StoreConfig};
pub use sweeper::SweepConfig;

use serde::Deserialize;
use std::time::Duration;

/// Root application configuration
///
/// Every section has defaults, so an empty environment yields a single-node
/// in-memory deployment. Load using [`AppConfig::load()`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment, node identity)
    #[serde(default)]
    pub server: ServerConfig,

    /// StateStore backend and call deadlines
    #[serde(default)]
    pub store: StoreConfig,

    /// PostgreSQL connection, required when `store.backend = postgres`
    #[serde(default)]
    pub database: DatabaseConfig,

    /// FastCache backend and freshness bound
    #[serde(default)]
    pub cache: CacheConfig,

    /// Redis connection, required when the cache or events use Redis
    #[serde(default)]
    pub redis: RedisConfig,

    /// RabbitMQ connection, required when `events.backend = rabbitmq`
    #[serde(default)]
    pub rabbitmq: RabbitMqConfig,

    /// EventBus backend, retry policy and partitioning
    #[serde(default)]
    pub events: EventsConfig,

    #[serde(default)]
    pub sweeper: SweepConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `SESSION_GRID` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `SESSION_GRID__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `SESSION_GRID__STORE__BACKEND=postgres` -> `store.backend = postgres`
    /// - `SESSION_GRID__DATABASE__URL=...` -> `database.url = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("SESSION_GRID")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// Connection sections are only checked when a selected backend needs
    /// them.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.store.validate()?;
        self.cache.validate()?;
        self.events.validate()?;
        self.sweeper.validate()?;
        self.limits.validate()?;

        if self.store.backend == StoreBackend::Postgres {
            self.database.validate()?;
        }
        if self.needs_redis() {
            self.redis.validate()?;
        }
        if self.events.backend == EventsBackend::RabbitMq {
            self.rabbitmq.validate()?;
        }

        let budget = self.mutation_budget();
        if self.server.request_timeout() <= budget {
            return Err(ValidationError::RequestTimeoutTooShort {
                configured_ms: self.server.request_timeout().as_millis() as u64,
                required_ms: budget.as_millis() as u64,
            });
        }
        Ok(())
    }

    /// Longest a mutation can take before it answers: the read and the
    /// conditional write, the cache invalidation, then the full event
    /// delivery budget. `server.request_timeout_secs` must exceed it.
    pub fn mutation_budget(&self) -> Duration {
        self.store.timeout() * 2 + self.cache.timeout() + self.events.retry_policy().worst_case()
    }

    /// True when the cache or the event bus is backed by Redis
    pub fn needs_redis(&self) -> bool {
        self.cache.backend == CacheBackend::Redis || self.events.backend == EventsBackend::Redis
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "SESSION_GRID__STORE__BACKEND",
        "SESSION_GRID__DATABASE__URL",
        "SESSION_GRID__CACHE__BACKEND",
        "SESSION_GRID__EVENTS__BACKEND",
        "SESSION_GRID__EVENTS__MAX_ATTEMPTS",
        "SESSION_GRID__REDIS__URL",
        "SESSION_GRID__SERVER__PORT",
        "SESSION_GRID__SERVER__ENVIRONMENT",
        "SESSION_GRID__SERVER__NODE_ID",
        "SESSION_GRID__SERVER__REQUEST_TIMEOUT_SECS",
        "SESSION_GRID__RABBITMQ__HOST",
    ];

    fn set_distributed_env() {
        env::set_var("SESSION_GRID__STORE__BACKEND", "postgres");
        env::set_var("SESSION_GRID__DATABASE__URL", "postgresql://test@localhost/test");
        env::set_var("SESSION_GRID__CACHE__BACKEND", "redis");
        env::set_var("SESSION_GRID__EVENTS__BACKEND", "redis");
        env::set_var("SESSION_GRID__REDIS__URL", "redis://localhost:6379");
    }

    /// Helper to clear environment variables after testing
    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_empty_environment_is_single_node() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        let config = AppConfig::load().unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.events.backend, EventsBackend::Memory);
        assert!(!config.needs_redis());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_distributed_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_distributed_env();
        let result = AppConfig::load();
        clear_env();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(
            config.database.url.expose_secret(),
            "postgresql://test@localhost/test"
        );
        assert_eq!(config.redis.url.expose_secret(), "redis://localhost:6379");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_postgres_backend_requires_database_url() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("SESSION_GRID__STORE__BACKEND", "postgres");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingRequired("SESSION_GRID__DATABASE__URL"))
        );
    }

    #[test]
    fn test_redis_events_require_redis_url() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("SESSION_GRID__EVENTS__BACKEND", "redis");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert!(config.needs_redis());
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingRequired("SESSION_GRID__REDIS__URL"))
        );
    }

    #[test]
    fn test_rabbitmq_events_require_host() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("SESSION_GRID__EVENTS__BACKEND", "rabbitmq");
        let missing = AppConfig::load();
        env::set_var("SESSION_GRID__RABBITMQ__HOST", "rabbit.internal");
        let present = AppConfig::load();
        clear_env();

        let missing = missing.unwrap();
        assert_eq!(missing.events.backend, EventsBackend::RabbitMq);
        assert!(!missing.needs_redis());
        assert_eq!(
            missing.validate(),
            Err(ValidationError::MissingRequired("SESSION_GRID__RABBITMQ__HOST"))
        );
        assert!(present.unwrap().validate().is_ok());
    }

    #[test]
    fn test_request_timeout_must_cover_mutation_budget() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("SESSION_GRID__SERVER__REQUEST_TIMEOUT_SECS", "5");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        // 2 x 2s store + 200ms cache + 5.75s delivery budget
        assert_eq!(config.mutation_budget(), Duration::from_millis(9_950));
        assert_eq!(
            config.validate(),
            Err(ValidationError::RequestTimeoutTooShort {
                configured_ms: 5_000,
                required_ms: 9_950,
            })
        );

        let generous = AppConfig::default();
        assert!(generous.server.request_timeout() > generous.mutation_budget());
        assert!(generous.validate().is_ok());
    }

    #[test]
    fn test_is_production() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("SESSION_GRID__SERVER__ENVIRONMENT", "production");
        let result = AppConfig::load();
        clear_env();

        assert!(result.unwrap().is_production());
    }

    #[test]
    fn test_custom_values_are_parsed() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("SESSION_GRID__SERVER__PORT", "3000");
        env::set_var("SESSION_GRID__SERVER__NODE_ID", "node-7");
        env::set_var("SESSION_GRID__EVENTS__MAX_ATTEMPTS", "3");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.node_id.as_deref(), Some("node-7"));
        assert_eq!(config.events.retry_policy().max_attempts, 3);
    }
}
