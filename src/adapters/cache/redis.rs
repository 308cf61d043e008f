//! Redis-backed fast cache for multi-node deployments.
//!
//! Records are stored as JSON strings under `{prefix}:{session_id}` with a
//! millisecond expiry (`SET ... PX`). Redis drops stale entries itself.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use crate::domain::foundation::SessionKey;
use crate::domain::session::SessionRecord;
use crate::ports::{CacheError, FastCache};

/// Redis session cache.
#[derive(Clone)]
pub struct RedisCache {
    conn: MultiplexedConnection,
    key_prefix: String,
}

impl RedisCache {
    pub fn new(conn: MultiplexedConnection, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    fn redis_key(&self, key: &SessionKey) -> String {
        format!("{}:{}", self.key_prefix, key)
    }
}

fn unavailable(e: redis::RedisError) -> CacheError {
    CacheError::Unavailable(e.to_string())
}

#[async_trait]
impl FastCache for RedisCache {
    async fn get(&self, key: &SessionKey) -> Result<Option<SessionRecord>, CacheError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.redis_key(key)).await.map_err(unavailable)?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| CacheError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn set(&self, record: &SessionRecord, ttl: Duration) -> Result<(), CacheError> {
        let json =
            serde_json::to_string(record).map_err(|e| CacheError::Serialization(e.to_string()))?;
        // PX 0 is rejected by Redis.
        let ttl_ms = (ttl.as_millis() as u64).max(1);

        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.redis_key(record.key()))
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(unavailable)
    }

    async fn invalidate(&self, key: &SessionKey) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.redis_key(key))
            .await
            .map_err(unavailable)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(unavailable)
    }
}
