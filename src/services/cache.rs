//! Redis-backed record store.
//!
//! Lets the job registry outlive a single process:
//! - JSON values via serde
//! - Per-record TTL, so Redis does the sweeping
//! - Connection pooling via ConnectionManager

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::services::store::{Store, Stored};

/// Redis store with connection pooling.
pub struct RedisStore<T> {
    conn: ConnectionManager,
    prefix: &'static str,
    ttl: Duration,
    _marker: PhantomData<fn() -> T>,
}

impl<T> RedisStore<T> {
    /// Connect to Redis; records expire `ttl` after their last write.
    pub async fn new(redis_url: &str, prefix: &'static str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!(prefix = prefix, "Redis store connected");

        Ok(Self {
            conn,
            prefix,
            ttl,
            _marker: PhantomData,
        })
    }

    fn key(&self, id: Uuid) -> String {
        keys::record(self.prefix, id)
    }
}

#[async_trait]
impl<T: Stored> Store<T> for RedisStore<T> {
    #[instrument(skip(self))]
    async fn get(&self, id: Uuid) -> Result<Option<T>> {
        let mut conn = self.conn.clone();
        let key = self.key(id);

        let data: Option<String> = conn.get(&key).await.context("Redis get failed")?;
        match data {
            Some(data) => match serde_json::from_str(&data) {
                Ok(value) => Ok(Some(value)),
                Err(e) => {
                    // Treat an undecodable value as absent rather than failing the caller
                    warn!(key = %key, error = %e, "Failed to deserialize stored value");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    #[instrument(skip(self, item), fields(id = %item.id()))]
    async fn put(&self, item: T) -> Result<()> {
        let mut conn = self.conn.clone();
        let key = self.key(item.id());

        let data = serde_json::to_string(&item).context("Failed to serialize value for Redis")?;

        conn.set_ex::<_, _, ()>(&key, data, self.ttl.as_secs().max(1))
            .await
            .context("Failed to store value")?;

        debug!(key = %key, ttl_secs = self.ttl.as_secs(), "Stored value");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn.clone();

        let deleted: i32 = conn.del(self.key(id)).await.context("Failed to delete key")?;
        Ok(deleted > 0)
    }

    /// Expiry is handled by the key TTL.
    async fn sweep(&self, _older_than: DateTime<Utc>) -> Result<usize> {
        Ok(0)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        Ok(())
    }
}

/// Key builders for consistent key formats.
pub mod keys {
    use uuid::Uuid;

    /// Record key, e.g. `rfp:job:<uuid>`
    pub fn record(prefix: &str, id: Uuid) -> String {
        format!("rfp:{}:{}", prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keys_are_namespaced() {
        let id = Uuid::nil();
        assert_eq!(
            keys::record("job", id),
            "rfp:job:00000000-0000-0000-0000-000000000000"
        );
    }
}
