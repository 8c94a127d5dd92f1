//! JSON-valued cache over the Redis pool
//!
//! Reads and best-effort writes degrade to a miss when no connection is
//! available. `set_if_absent` and `exists` back the webhook ledger and
//! surface connection failures instead.

use super::{error::CacheResult, RedisPool};
use crate::cache::CacheError;
use async_trait::async_trait;
use bb8::PooledConnection;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

type RedisConnection<'a> = PooledConnection<'a, RedisConnectionManager>;

#[async_trait]
pub trait Cache<T: Serialize + DeserializeOwned + Send + Sync + 'static> {
    async fn get(&self, key: &str) -> CacheResult<Option<T>>;

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()>;

    /// `SET NX EX`; `true` when this call stored the value
    async fn set_if_absent(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<bool>;

    async fn delete(&self, key: &str) -> CacheResult<bool>;

    async fn exists(&self, key: &str) -> CacheResult<bool>;

    /// `INCRBY`, for window counters
    async fn increment(&self, key: &str, amount: i64) -> CacheResult<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool>;
}

#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
}

impl RedisCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    async fn connection(&self) -> CacheResult<RedisConnection<'_>> {
        self.pool.get().await.map_err(|e| {
            warn!("Failed to get Redis connection: {}", e);
            e.into()
        })
    }
}

fn whole_seconds(ttl: Duration) -> CacheResult<u64> {
    match ttl.as_secs() {
        0 => Err(CacheError::TtlError(
            "TTL must be at least one second".to_string(),
        )),
        secs => Ok(secs),
    }
}

#[async_trait]
impl<T: Serialize + DeserializeOwned + Send + Sync + 'static> Cache<T> for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<T>> {
        let Ok(mut conn) = self.connection().await else {
            return Ok(None);
        };

        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => {
                debug!("Cache hit for key: {}", key);
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => {
                debug!("Cache miss for key: {}", key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &T, ttl: Option<Duration>) -> CacheResult<()> {
        let Ok(mut conn) = self.connection().await else {
            return Ok(());
        };

        let json = serde_json::to_string(value)?;
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, json, whole_seconds(ttl)?).await?;
            }
            None => {
                let _: () = conn.set(key, json).await?;
            }
        }
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &T, ttl: Duration) -> CacheResult<bool> {
        let secs = whole_seconds(ttl)?;
        let mut conn = self.connection().await?;
        let json = serde_json::to_string(value)?;

        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(json)
            .arg("NX")
            .arg("EX")
            .arg(secs)
            .query_async(&mut *conn)
            .await?;

        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let Ok(mut conn) = self.connection().await else {
            return Ok(false);
        };

        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection().await?;
        let found: i64 = conn.exists(key).await?;
        Ok(found > 0)
    }

    async fn increment(&self, key: &str, amount: i64) -> CacheResult<i64> {
        let mut conn = self.connection().await?;
        Ok(conn.incr(key, amount).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        let secs = i64::try_from(whole_seconds(ttl)?)
            .map_err(|_| CacheError::TtlError("TTL too large".to_string()))?;
        let mut conn = self.connection().await?;
        let applied: i64 = conn.expire(key, secs).await?;
        Ok(applied > 0)
    }
}

pub mod ttl {
    use std::time::Duration;

    /// Order snapshots in the read cache
    pub const ORDER_STATUS: Duration = Duration::from_secs(30);

    /// Settled webhook transactions, longer than the gateway's retry horizon
    pub const WEBHOOK_TRANSACTIONS: Duration = Duration::from_secs(7 * 24 * 3600);
}
