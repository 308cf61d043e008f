//! SessionCoordinator - Entry point for every session operation.
//!
//! The coordinator holds no lock state. Each mutation is one conditional
//! write against the StateStore; whichever writer the store accepts wins,
//! and every loser gets `VersionConflict` with the record that beat it.
//!
//! ## Failure handling
//!
//! | Dependency | On error or timeout |
//! |------------|---------------------|
//! | StateStore | abort with `BackendUnavailable` |
//! | FastCache | log, fall back to the StateStore |
//! | EventBus | retry, then attach `PublishDegraded` to the success |
//!
//! ## Cancellation
//!
//! Events are enqueued in the same poll that observes a committed write and
//! cache invalidation runs on a spawned task, so dropping a request after
//! commit neither loses its event nor leaves a stale cache entry.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::domain::foundation::{NodeId, SessionKey, Timestamp, ValidationError};
use crate::domain::session::{
    Committed, CoordinatorError, SessionRecord, StateChangeEvent, StateChangeKind, Version,
};
use crate::ports::{
    CacheError, CasOutcome, Clock, FastCache, InsertOutcome, StateStore, StateStoreError,
};

use super::EventDispatcher;

/// Insert attempts per create. Two suffice unless the key is being
/// recreated and deleted concurrently.
const CREATE_ROUNDS: usize = 3;

/// Tunables for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Identity written into `owner_node` and event metadata.
    pub node_id: NodeId,

    /// Freshness TTL for cache entries.
    pub cache_ttl: Duration,

    pub store_timeout: Duration,
    pub cache_timeout: Duration,

    /// Upper bound for `ttl` on create and `extend_by` on touch.
    pub max_ttl: Duration,

    /// Upper bound for the serialized payload.
    pub max_payload_bytes: usize,
}

impl CoordinatorSettings {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            cache_ttl: Duration::from_secs(5),
            store_timeout: Duration::from_secs(2),
            cache_timeout: Duration::from_millis(200),
            max_ttl: Duration::from_secs(7 * 24 * 3600),
            max_payload_bytes: 256 * 1024,
        }
    }
}

/// Coordinates session state across StateStore, FastCache and EventBus.
pub struct SessionCoordinator {
    store: Arc<dyn StateStore>,
    cache: Arc<dyn FastCache>,
    dispatcher: Arc<EventDispatcher>,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn StateStore>,
        cache: Arc<dyn FastCache>,
        dispatcher: Arc<EventDispatcher>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            store,
            cache,
            dispatcher,
            clock,
            settings,
        }
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    // === Operations ===

    /// Creates a session.
    ///
    /// A brand new key starts at version 1. A key that was deleted or swept
    /// continues above its tombstone, so versions of one key never repeat.
    /// An expired record that the sweeper has not yet evicted is replaced;
    /// that emits `Expired` for the old record followed by `Created`.
    pub async fn create(
        &self,
        key: SessionKey,
        payload: JsonValue,
        ttl: Duration,
    ) -> Result<Committed<SessionRecord>, CoordinatorError> {
        self.check_lifetime("ttl_ms", ttl)?;
        self.check_payload(&payload)?;

        let now = self.clock.now();
        let mut tombstone: Option<Version> = None;

        for _ in 0..CREATE_ROUNDS {
            let record = match tombstone {
                Some(last) => SessionRecord::recreate(
                    key.clone(),
                    last,
                    payload.clone(),
                    ttl,
                    self.settings.node_id.clone(),
                    now,
                ),
                None => SessionRecord::create(
                    key.clone(),
                    payload.clone(),
                    ttl,
                    self.settings.node_id.clone(),
                    now,
                ),
            };

            let existing = match self
                .store_call("put_if_absent", self.store.put_if_absent(&record))
                .await?
            {
                InsertOutcome::Inserted => {
                    let created = self.event(&record, StateChangeKind::Created, now);
                    return Ok(self.commit(record, Vec::new(), created).await);
                }
                InsertOutcome::Tombstoned(last) => {
                    tombstone = Some(last);
                    continue;
                }
                InsertOutcome::Occupied(existing) => existing,
            };

            if !existing.is_expired_at(&now) {
                return Err(CoordinatorError::AlreadyExists(key));
            }

            let replacement = SessionRecord::create_over(
                &existing,
                payload.clone(),
                ttl,
                self.settings.node_id.clone(),
                now,
            );
            match self
                .store_call(
                    "compare_and_swap",
                    self.store
                        .compare_and_swap(&key, existing.version(), &replacement),
                )
                .await?
            {
                CasOutcome::Applied => {
                    let expired = StateChangeEvent::new(
                        key,
                        existing.tombstone_version(),
                        StateChangeKind::Expired,
                        now,
                    );
                    let created = self.event(&replacement, StateChangeKind::Created, now);
                    return Ok(self.commit(replacement, vec![expired], created).await);
                }
                // Another node replaced it first.
                CasOutcome::Conflict(_) => return Err(CoordinatorError::AlreadyExists(key)),
                // The sweeper evicted it in between and left a tombstone.
                CasOutcome::Missing => tombstone = Some(existing.tombstone_version()),
            }
        }

        // Every round lost to another create/delete pair on the same key.
        tracing::debug!(session_id = %key, "Create kept losing to concurrent writers");
        Err(CoordinatorError::AlreadyExists(key))
    }

    /// Reads a live session, serving from the cache when possible.
    pub async fn get(&self, key: &SessionKey) -> Result<SessionRecord, CoordinatorError> {
        let now = self.clock.now();

        if let Some(Some(cached)) = self
            .cache_call("get", key, self.cache.get(key))
            .await
        {
            if cached.is_expired_at(&now) {
                return Err(CoordinatorError::NotFound(key.clone()));
            }
            return Ok(cached);
        }

        let record = self.load_live(key, &now).await?;

        let fresh_for = self
            .settings
            .cache_ttl
            .min(record.expires_at().remaining_from(&now));
        if !fresh_for.is_zero() {
            self.cache_call("set", key, self.cache.set(&record, fresh_for))
                .await;
        }
        Ok(record)
    }

    /// Replaces the payload if the stored version equals `expected`.
    pub async fn update(
        &self,
        key: &SessionKey,
        expected: Version,
        payload: JsonValue,
    ) -> Result<Committed<SessionRecord>, CoordinatorError> {
        self.check_payload(&payload)?;
        let now = self.clock.now();

        let current = self.load_live(key, &now).await?;
        if current.version() != expected {
            return Err(CoordinatorError::conflict(expected, current));
        }

        let updated = current.with_payload(payload, self.settings.node_id.clone(), now);
        self.swap(key, expected, updated, now).await
    }

    /// Removes the session if the stored version equals `expected`.
    pub async fn delete(
        &self,
        key: &SessionKey,
        expected: Version,
    ) -> Result<Committed<()>, CoordinatorError> {
        let now = self.clock.now();

        let current = self.load_live(key, &now).await?;
        if current.version() != expected {
            return Err(CoordinatorError::conflict(expected, current));
        }

        match self
            .store_call("delete", self.store.delete(key, expected))
            .await?
        {
            CasOutcome::Applied => {
                let deleted = StateChangeEvent::new(
                    key.clone(),
                    current.tombstone_version(),
                    StateChangeKind::Deleted,
                    now,
                );
                Ok(self.commit_with(key, (), Vec::new(), deleted).await)
            }
            CasOutcome::Conflict(latest) => Err(self.reject(key, expected, latest, &now)),
            CasOutcome::Missing => Err(CoordinatorError::NotFound(key.clone())),
        }
    }

    /// Pushes `expires_at` out by `extend_by`, capped at `max_ttl` from now.
    ///
    /// The write is conditional on the version read just before it; if
    /// another writer lands in between, the caller gets `VersionConflict`.
    pub async fn touch(
        &self,
        key: &SessionKey,
        extend_by: Duration,
    ) -> Result<Committed<SessionRecord>, CoordinatorError> {
        self.check_lifetime("extend_by_ms", extend_by)?;
        let now = self.clock.now();

        let current = self.load_live(key, &now).await?;
        let extended = current.extended(
            extend_by,
            now.plus(self.settings.max_ttl),
            self.settings.node_id.clone(),
            now,
        );
        self.swap(key, current.version(), extended, now).await
    }

    // === Internals ===

    async fn swap(
        &self,
        key: &SessionKey,
        expected: Version,
        next: SessionRecord,
        now: Timestamp,
    ) -> Result<Committed<SessionRecord>, CoordinatorError> {
        match self
            .store_call(
                "compare_and_swap",
                self.store.compare_and_swap(key, expected, &next),
            )
            .await?
        {
            CasOutcome::Applied => {
                let updated = self.event(&next, StateChangeKind::Updated, now);
                Ok(self.commit(next, Vec::new(), updated).await)
            }
            CasOutcome::Conflict(latest) => Err(self.reject(key, expected, latest, &now)),
            CasOutcome::Missing => Err(CoordinatorError::NotFound(key.clone())),
        }
    }

    /// Error for a conditional write that lost to `latest`.
    fn reject(
        &self,
        key: &SessionKey,
        expected: Version,
        latest: SessionRecord,
        now: &Timestamp,
    ) -> CoordinatorError {
        if latest.is_expired_at(now) {
            CoordinatorError::NotFound(key.clone())
        } else {
            tracing::debug!(
                session_id = %key,
                expected = %expected,
                current = %latest.version(),
                "Conditional write lost"
            );
            CoordinatorError::conflict(expected, latest)
        }
    }

    async fn load_live(
        &self,
        key: &SessionKey,
        now: &Timestamp,
    ) -> Result<SessionRecord, CoordinatorError> {
        match self.store_call("get", self.store.get(key)).await? {
            Some(record) if !record.is_expired_at(now) => Ok(record),
            _ => Err(CoordinatorError::NotFound(key.clone())),
        }
    }

    fn event(
        &self,
        record: &SessionRecord,
        kind: StateChangeKind,
        now: Timestamp,
    ) -> StateChangeEvent {
        StateChangeEvent::new(record.key().clone(), record.version(), kind, now)
    }

    async fn commit(
        &self,
        record: SessionRecord,
        preceding: Vec<StateChangeEvent>,
        event: StateChangeEvent,
    ) -> Committed<SessionRecord> {
        let key = record.key().clone();
        self.commit_with(&key, record, preceding, event).await
    }

    /// Post-commit work: enqueue events, invalidate the cache, collect
    /// delivery warnings. `preceding` events are published before `event`.
    async fn commit_with<T>(
        &self,
        key: &SessionKey,
        value: T,
        mut preceding: Vec<StateChangeEvent>,
        event: StateChangeEvent,
    ) -> Committed<T> {
        preceding.push(event.clone());
        let pending = self.dispatcher.enqueue(preceding);

        let cache = Arc::clone(&self.cache);
        let cache_timeout = self.settings.cache_timeout;
        let invalidate_key = key.clone();
        let invalidation = tokio::spawn(async move {
            match tokio::time::timeout(cache_timeout, cache.invalidate(&invalidate_key)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log_cache_failure("invalidate", &invalidate_key, &e),
                Err(_) => log_cache_failure(
                    "invalidate",
                    &invalidate_key,
                    &CacheError::Timeout(cache_timeout),
                ),
            }
        });
        if let Err(e) = invalidation.await {
            tracing::error!(session_id = %key, error = %e, "Cache invalidation task failed");
        }

        let warnings = pending.warnings().await;
        tracing::debug!(
            session_id = %key,
            version = %event.version,
            kind = %event.kind,
            degraded = !warnings.is_empty(),
            "Session change committed"
        );

        Committed {
            value,
            event,
            warnings,
        }
    }

    async fn store_call<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = Result<T, StateStoreError>>,
    ) -> Result<T, CoordinatorError> {
        let timeout = self.settings.store_timeout;
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StateStoreError::Timeout(timeout)),
        };
        result.map_err(|e| {
            tracing::warn!(op, error = %e, "State store call failed");
            match e {
                StateStoreError::Unavailable(_) | StateStoreError::Timeout(_) => {
                    CoordinatorError::BackendUnavailable(e.to_string())
                }
                StateStoreError::Corrupt(_) => CoordinatorError::Internal(e.to_string()),
            }
        })
    }

    /// Runs a cache call; any failure is logged and reported as `None`.
    async fn cache_call<T>(
        &self,
        op: &'static str,
        key: &SessionKey,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Option<T> {
        let timeout = self.settings.cache_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                log_cache_failure(op, key, &e);
                None
            }
            Err(_) => {
                log_cache_failure(op, key, &CacheError::Timeout(timeout));
                None
            }
        }
    }

    fn check_lifetime(&self, field: &str, lifetime: Duration) -> Result<(), CoordinatorError> {
        let max_ms = self.settings.max_ttl.as_millis() as u64;
        let actual_ms = lifetime.as_millis() as u64;
        if actual_ms == 0 || actual_ms > max_ms {
            return Err(ValidationError::out_of_range(field, 1, max_ms, actual_ms).into());
        }
        Ok(())
    }

    fn check_payload(&self, payload: &JsonValue) -> Result<(), CoordinatorError> {
        let size = serde_json::to_vec(payload)
            .map_err(|e| ValidationError::invalid_format("payload", e.to_string()))?
            .len();
        if size > self.settings.max_payload_bytes {
            return Err(ValidationError::out_of_range(
                "payload",
                0,
                self.settings.max_payload_bytes as u64,
                size as u64,
            )
            .into());
        }
        Ok(())
    }
}

fn log_cache_failure(op: &'static str, key: &SessionKey, error: &CacheError) {
    tracing::warn!(
        op,
        session_id = %key,
        error = %error,
        "Fast cache degraded, using state store"
    );
}
