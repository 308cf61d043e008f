//! PostgreSQL implementation of StateStore.
//!
//! Conditional writes are single statements guarded by `version = $n`, so
//! PostgreSQL row locking provides the atomicity. When a guarded statement
//! affects no rows, a follow-up read tells a conflict apart from a missing
//! key.
//!
//! Deleting a session turns its row into a tombstone (`deleted = TRUE`,
//! `version` bumped to the terminal event's version). Inserts may only
//! replace a tombstone with a higher version.
//!
//! A trigger publishes every change with `pg_notify`; `listen_for_changes`
//! forwards those notifications to a broadcast channel so sweepers on every
//! node learn about new expiry deadlines without polling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::postgres::{PgListener, PgPool};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::domain::foundation::{NodeId, SessionKey, Timestamp};
use crate::domain::session::{SessionRecord, Version};
use crate::ports::{CasOutcome, InsertOutcome, StateStore, StateStoreError, StoreChange};

/// Channel used by the change trigger.
pub const CHANGE_CHANNEL: &str = "grid_session_changes";

const CHANGE_FEED_CAPACITY: usize = 1024;
const INSERT_RACE_RETRIES: u32 = 3;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS grid_sessions (
        id          TEXT PRIMARY KEY,
        payload     TEXT NOT NULL,
        version     BIGINT NOT NULL,
        owner_node  TEXT NOT NULL,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL,
        expires_at  TIMESTAMPTZ NOT NULL
    )
    "#,
    "ALTER TABLE grid_sessions ADD COLUMN IF NOT EXISTS deleted BOOLEAN NOT NULL DEFAULT FALSE",
    "DROP INDEX IF EXISTS grid_sessions_expires_at_idx",
    r#"
    CREATE INDEX IF NOT EXISTS grid_sessions_live_expiry_idx
        ON grid_sessions (expires_at) WHERE NOT deleted
    "#,
    r#"
    CREATE OR REPLACE FUNCTION grid_sessions_notify() RETURNS trigger AS $$
    BEGIN
        IF TG_OP = 'DELETE' THEN
            PERFORM pg_notify('grid_session_changes', json_build_object('key', OLD.id)::text);
            RETURN OLD;
        END IF;
        IF NEW.deleted THEN
            PERFORM pg_notify('grid_session_changes', json_build_object('key', NEW.id)::text);
            RETURN NEW;
        END IF;
        PERFORM pg_notify(
            'grid_session_changes',
            json_build_object(
                'key', NEW.id,
                'version', NEW.version,
                'expires_at_ms', (EXTRACT(EPOCH FROM NEW.expires_at) * 1000)::BIGINT
            )::text
        );
        RETURN NEW;
    END;
    $$ LANGUAGE plpgsql
    "#,
    "DROP TRIGGER IF EXISTS grid_sessions_notify_trigger ON grid_sessions",
    r#"
    CREATE TRIGGER grid_sessions_notify_trigger
        AFTER INSERT OR UPDATE OR DELETE ON grid_sessions
        FOR EACH ROW EXECUTE FUNCTION grid_sessions_notify()
    "#,
];

/// PostgreSQL-backed session store.
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
    changes: Option<broadcast::Sender<StoreChange>>,
}

impl std::fmt::Debug for PostgresStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStateStore")
            .field("change_feed", &self.changes.is_some())
            .finish_non_exhaustive()
    }
}

impl PostgresStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            changes: None,
        }
    }

    /// Create the table, expiry index and change trigger if missing.
    pub async fn ensure_schema(&self) -> Result<(), StateStoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(store_error)?;
        }
        Ok(())
    }

    /// Start forwarding change notifications into a broadcast channel.
    ///
    /// The listener task reconnects on its own and lives as long as the
    /// runtime. Notifications missed while disconnected are covered by the
    /// sweeper's regular interval.
    pub async fn listen_for_changes(mut self) -> Result<Self, StateStoreError> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(store_error)?;
        listener.listen(CHANGE_CHANNEL).await.map_err(store_error)?;

        let (sender, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let forward = sender.clone();
        tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => match parse_change(notification.payload()) {
                        Some(change) => {
                            let _ = forward.send(change);
                        }
                        None => tracing::warn!(
                            payload = notification.payload(),
                            "Ignoring malformed change notification"
                        ),
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "Change listener lost connection, reconnecting");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        self.changes = Some(sender);
        Ok(self)
    }

    async fn fetch(&self, key: &SessionKey) -> Result<Option<StoredRow>, StateStoreError> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, payload, version, owner_node, created_at, updated_at, expires_at, deleted
            FROM grid_sessions
            WHERE id = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        row.map(SessionRow::into_stored).transpose()
    }

    /// Resolves a guarded statement that matched no rows.
    async fn classify_miss(&self, key: &SessionKey) -> Result<CasOutcome, StateStoreError> {
        Ok(match self.fetch(key).await? {
            Some(StoredRow::Live(current)) => CasOutcome::Conflict(current),
            Some(StoredRow::Tombstone(_)) | None => CasOutcome::Missing,
        })
    }
}

/// A row is either a live record or the tombstone of a removed one.
#[derive(Debug)]
enum StoredRow {
    Live(SessionRecord),
    Tombstone(Version),
}

/// Internal row type for sqlx query mapping.
#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    id: String,
    payload: String,
    version: i64,
    owner_node: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    deleted: bool,
}

impl SessionRow {
    fn into_stored(self) -> Result<StoredRow, StateStoreError> {
        if self.deleted {
            let version = u64::try_from(self.version).map_err(|_| {
                StateStoreError::Corrupt(format!("negative version on {}", self.id))
            })?;
            return Ok(StoredRow::Tombstone(Version::from_raw(version)));
        }
        self.into_record().map(StoredRow::Live)
    }

    fn into_record(self) -> Result<SessionRecord, StateStoreError> {
        let key = SessionKey::new(self.id)
            .map_err(|e| StateStoreError::Corrupt(format!("invalid key: {}", e)))?;
        let payload = serde_json::from_str(&self.payload)
            .map_err(|e| StateStoreError::Corrupt(format!("payload of {}: {}", key, e)))?;
        let owner_node = NodeId::new(self.owner_node)
            .map_err(|e| StateStoreError::Corrupt(format!("owner of {}: {}", key, e)))?;
        let version = u64::try_from(self.version)
            .map_err(|_| StateStoreError::Corrupt(format!("negative version on {}", key)))?;

        Ok(SessionRecord::reconstitute(
            key,
            payload,
            Version::from_raw(version),
            owner_node,
            Timestamp::from_datetime(self.created_at),
            Timestamp::from_datetime(self.updated_at),
            Timestamp::from_datetime(self.expires_at),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct ChangeNotification {
    key: String,
    version: Option<i64>,
    expires_at_ms: Option<i64>,
}

fn parse_change(payload: &str) -> Option<StoreChange> {
    let raw: ChangeNotification = serde_json::from_str(payload).ok()?;
    Some(StoreChange {
        key: SessionKey::new(raw.key).ok()?,
        version: raw
            .version
            .and_then(|v| u64::try_from(v).ok())
            .map(Version::from_raw),
        expires_at: raw.expires_at_ms.and_then(Timestamp::from_unix_millis),
    })
}

fn store_error(err: sqlx::Error) -> StateStoreError {
    match err {
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StateStoreError::Corrupt(err.to_string())
        }
        other => StateStoreError::Unavailable(format!("Database error: {}", other)),
    }
}

fn version_param(version: Version) -> Result<i64, StateStoreError> {
    i64::try_from(version.as_u64())
        .map_err(|_| StateStoreError::Corrupt(format!("version {} exceeds BIGINT", version)))
}

fn payload_text(record: &SessionRecord) -> Result<String, StateStoreError> {
    serde_json::to_string(record.payload())
        .map_err(|e| StateStoreError::Corrupt(format!("payload of {}: {}", record.key(), e)))
}

#[async_trait]
impl StateStore for PostgresStateStore {
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, StateStoreError> {
        Ok(match self.fetch(key).await? {
            Some(StoredRow::Live(record)) => Some(record),
            Some(StoredRow::Tombstone(_)) | None => None,
        })
    }

    async fn put_if_absent(&self, record: &SessionRecord) -> Result<InsertOutcome, StateStoreError> {
        let payload = payload_text(record)?;
        let version = version_param(record.version())?;

        // Rows only disappear through manual purges; retry if one lands
        // between the insert and the read.
        for _ in 0..INSERT_RACE_RETRIES {
            let result = sqlx::query(
                r#"
                INSERT INTO grid_sessions
                    (id, payload, version, owner_node, created_at, updated_at, expires_at, deleted)
                VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE)
                ON CONFLICT (id) DO UPDATE SET
                    payload = EXCLUDED.payload,
                    version = EXCLUDED.version,
                    owner_node = EXCLUDED.owner_node,
                    created_at = EXCLUDED.created_at,
                    updated_at = EXCLUDED.updated_at,
                    expires_at = EXCLUDED.expires_at,
                    deleted = FALSE
                WHERE grid_sessions.deleted AND grid_sessions.version < EXCLUDED.version
                "#,
            )
            .bind(record.key().as_str())
            .bind(&payload)
            .bind(version)
            .bind(record.owner_node().as_str())
            .bind(record.created_at().as_datetime())
            .bind(record.updated_at().as_datetime())
            .bind(record.expires_at().as_datetime())
            .execute(&self.pool)
            .await
            .map_err(store_error)?;

            if result.rows_affected() == 1 {
                return Ok(InsertOutcome::Inserted);
            }
            match self.fetch(record.key()).await? {
                Some(StoredRow::Live(existing)) => return Ok(InsertOutcome::Occupied(existing)),
                Some(StoredRow::Tombstone(last)) => return Ok(InsertOutcome::Tombstoned(last)),
                None => {}
            }
        }

        Err(StateStoreError::Unavailable(format!(
            "insert of {} kept racing with row purges",
            record.key()
        )))
    }

    async fn compare_and_swap(
        &self,
        key: &SessionKey,
        expected: Version,
        record: &SessionRecord,
    ) -> Result<CasOutcome, StateStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE grid_sessions SET
                payload = $3,
                version = $4,
                owner_node = $5,
                created_at = $6,
                updated_at = $7,
                expires_at = $8
            WHERE id = $1 AND version = $2 AND NOT deleted
            "#,
        )
        .bind(key.as_str())
        .bind(version_param(expected)?)
        .bind(payload_text(record)?)
        .bind(version_param(record.version())?)
        .bind(record.owner_node().as_str())
        .bind(record.created_at().as_datetime())
        .bind(record.updated_at().as_datetime())
        .bind(record.expires_at().as_datetime())
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return self.classify_miss(key).await;
        }
        Ok(CasOutcome::Applied)
    }

    async fn delete(
        &self,
        key: &SessionKey,
        expected: Version,
    ) -> Result<CasOutcome, StateStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE grid_sessions SET
                deleted = TRUE,
                version = version + 1,
                payload = 'null',
                updated_at = NOW()
            WHERE id = $1 AND version = $2 AND NOT deleted
            "#,
        )
        .bind(key.as_str())
        .bind(version_param(expected)?)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        if result.rows_affected() == 0 {
            return self.classify_miss(key).await;
        }
        Ok(CasOutcome::Applied)
    }

    async fn scan_expired(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<SessionRecord>, StateStoreError> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT id, payload, version, owner_node, created_at, updated_at, expires_at, deleted
            FROM grid_sessions
            WHERE expires_at <= $1 AND NOT deleted
            ORDER BY expires_at
            LIMIT $2
            "#,
        )
        .bind(now.as_datetime())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error)?;

        rows.into_iter().map(SessionRow::into_record).collect()
    }

    async fn ping(&self) -> Result<(), StateStoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(())
    }

    fn subscribe_changes(&self) -> Option<broadcast::Receiver<StoreChange>> {
        self.changes.as_ref().map(|sender| sender.subscribe())
    }
}
