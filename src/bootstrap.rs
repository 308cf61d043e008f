//! Process wiring - builds adapters from configuration and assembles the grid.
//!
//! Backends are connected with bounded exponential backoff so a node can be
//! started before its database, Redis or RabbitMQ is accepting connections.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use rabbitmq_stream_client::Environment;
use redis::aio::MultiplexedConnection;
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use thiserror::Error;

use crate::adapters::cache::{InMemoryCache, RedisCache};
use crate::adapters::clock::SystemClock;
use crate::adapters::events::{
    InMemoryEventBus, RabbitStreamPublisher, RedisStreamPublisher, RetryPolicy,
    RetryingPublisher,
};
use crate::adapters::http::app_router;
use crate::adapters::postgres::PostgresStateStore;
use crate::adapters::storage::InMemoryStateStore;
use crate::application::{
    CoordinatorSettings, EventDispatcher, ExpirySweeper, HealthService, SessionCoordinator,
    SweeperConfig,
};
use crate::config::{
    AppConfig, CacheBackend, DatabaseConfig, EventsBackend, RabbitMqConfig, RedisConfig,
    StoreBackend, ValidationError,
};
use crate::domain::foundation::{DomainError, NodeId};
use crate::ports::{Clock, EventPublisher, FastCache, NoopCache, StateStore, StateStoreError};

/// Failures while starting a node.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Could not connect to {backend} after {attempts} attempts: {message}")]
    Connect {
        backend: &'static str,
        attempts: u32,
        message: String,
    },

    #[error("State store setup failed: {0}")]
    StoreSetup(#[from] StateStoreError),

    #[error("Event bus setup failed: {0}")]
    EventsSetup(#[from] DomainError),
}

/// A fully wired node.
pub struct Grid {
    pub node_id: NodeId,
    pub coordinator: Arc<SessionCoordinator>,
    pub dispatcher: Arc<EventDispatcher>,
    pub health: Arc<HealthService>,
    /// `None` when the sweeper is disabled on this node.
    pub sweeper: Option<Arc<ExpirySweeper>>,
}

impl Grid {
    /// Connects every configured backend and assembles the services.
    ///
    /// Must run inside a Tokio runtime; dispatcher workers are spawned here.
    pub async fn build(config: &AppConfig) -> Result<Self, BootstrapError> {
        let node_id = config.server.resolve_node_id()?;
        let connect_policy = connect_policy(config.store.connect_attempts);

        let store: Arc<dyn StateStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(InMemoryStateStore::new()),
            StoreBackend::Postgres => {
                let pool = connect_postgres(&config.database, &connect_policy).await?;
                let store = PostgresStateStore::new(pool);
                if config.database.ensure_schema {
                    store.ensure_schema().await?;
                }
                Arc::new(store.listen_for_changes().await?)
            }
        };

        let redis = if config.needs_redis() {
            Some(connect_redis(&config.redis, &connect_policy).await?)
        } else {
            None
        };

        let cache: Arc<dyn FastCache> = match (config.cache.backend, &redis) {
            (CacheBackend::Redis, Some(conn)) => {
                Arc::new(RedisCache::new(conn.clone(), config.cache.key_prefix.clone()))
            }
            (CacheBackend::Memory, _) => Arc::new(InMemoryCache::new()),
            _ => Arc::new(NoopCache),
        };

        let transport: Arc<dyn EventPublisher> = match (config.events.backend, &redis) {
            (EventsBackend::Redis, Some(conn)) => Arc::new(RedisStreamPublisher::new(
                conn.clone(),
                config.events.stream_prefix.clone(),
                config.events.partitions,
                config.events.stream_max_len,
            )),
            (EventsBackend::RabbitMq, _) => {
                let environment = connect_rabbitmq(&config.rabbitmq, &connect_policy).await?;
                Arc::new(
                    RabbitStreamPublisher::connect(
                        environment,
                        config.events.stream_prefix.clone(),
                        config.events.partitions,
                        config.rabbitmq.max_stream_bytes,
                    )
                    .await?,
                )
            }
            _ => Arc::new(InMemoryEventBus::new()),
        };
        let publisher: Arc<dyn EventPublisher> = Arc::new(RetryingPublisher::new(
            Arc::clone(&transport),
            config.events.retry_policy(),
        ));

        let dispatcher = Arc::new(EventDispatcher::spawn(
            publisher,
            node_id.clone(),
            config.events.dispatcher_config(),
        ));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let settings = CoordinatorSettings {
            cache_ttl: config.cache.ttl(),
            store_timeout: config.store.timeout(),
            cache_timeout: config.cache.timeout(),
            max_ttl: config.limits.max_ttl(),
            max_payload_bytes: config.limits.max_payload_bytes,
            ..CoordinatorSettings::new(node_id.clone())
        };
        let coordinator = Arc::new(SessionCoordinator::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&dispatcher),
            Arc::clone(&clock),
            settings,
        ));

        let sweeper = config.sweeper.enabled.then(|| {
            Arc::new(ExpirySweeper::new(
                Arc::clone(&store),
                Arc::clone(&cache),
                Arc::clone(&dispatcher),
                Arc::clone(&clock),
                SweeperConfig {
                    interval: config.sweeper.interval(),
                    batch_size: config.sweeper.batch_size,
                    store_timeout: config.store.timeout(),
                    cache_timeout: config.cache.timeout(),
                    ..SweeperConfig::default()
                },
            ))
        });

        let health = Arc::new(HealthService::new(
            node_id.as_str(),
            store,
            cache,
            transport,
            config.store.timeout(),
        ));

        tracing::info!(
            node_id = %node_id,
            store = ?config.store.backend,
            cache = ?config.cache.backend,
            events = ?config.events.backend,
            partitions = config.events.partitions,
            sweeper = config.sweeper.enabled,
            "Session grid assembled"
        );

        Ok(Self {
            node_id,
            coordinator,
            dispatcher,
            health,
            sweeper,
        })
    }

    pub fn router(&self, request_timeout: Duration) -> Router {
        app_router(
            Arc::clone(&self.coordinator),
            Arc::clone(&self.health),
            request_timeout,
        )
    }
}

fn connect_policy(attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts: attempts.max(1),
        base_delay: Duration::from_millis(200),
        max_delay: Duration::from_secs(5),
        attempt_timeout: Duration::from_secs(10),
    }
}

async fn connect_postgres(
    config: &DatabaseConfig,
    policy: &RetryPolicy,
) -> Result<PgPool, BootstrapError> {
    let options = PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout())
        .idle_timeout(Some(config.idle_timeout()))
        .max_lifetime(Some(config.max_lifetime()));

    connect_with_retry("postgres", policy, || {
        options.clone().connect(config.url.expose_secret())
    })
    .await
}

async fn connect_redis(
    config: &RedisConfig,
    policy: &RetryPolicy,
) -> Result<MultiplexedConnection, BootstrapError> {
    let client = redis::Client::open(config.url.expose_secret().as_str()).map_err(|e| {
        BootstrapError::Connect {
            backend: "redis",
            attempts: 0,
            message: e.to_string(),
        }
    })?;
    let policy = RetryPolicy {
        attempt_timeout: config.timeout(),
        ..policy.clone()
    };

    connect_with_retry("redis", &policy, || {
        client.get_multiplexed_tokio_connection()
    })
    .await
}

async fn connect_rabbitmq(
    config: &RabbitMqConfig,
    policy: &RetryPolicy,
) -> Result<Environment, BootstrapError> {
    let policy = RetryPolicy {
        attempt_timeout: config.timeout(),
        ..policy.clone()
    };

    connect_with_retry("rabbitmq", &policy, || {
        Environment::builder()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(config.password.expose_secret())
            .build()
    })
    .await
}

/// Runs `connect` until it succeeds or the policy's attempts are spent.
pub async fn connect_with_retry<T, E, F, Fut>(
    backend: &'static str,
    policy: &RetryPolicy,
    mut connect: F,
) -> Result<T, BootstrapError>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let message = match tokio::time::timeout(policy.attempt_timeout, connect()).await {
            Ok(Ok(conn)) => {
                tracing::info!(backend, attempt, "Connected");
                return Ok(conn);
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", policy.attempt_timeout),
        };

        if attempt >= max_attempts {
            return Err(BootstrapError::Connect {
                backend,
                attempts: attempt,
                message,
            });
        }

        let delay = policy.delay_after(attempt);
        tracing::warn!(
            backend,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %message,
            "Connection failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
