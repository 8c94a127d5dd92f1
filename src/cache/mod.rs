//! Redis layer
//!
//! One bb8 pool serves the webhook ledger, the shared checkout counters and
//! the order read cache.

pub mod cache;
pub mod error;
pub mod keys;
pub mod ledger;

pub use cache::{Cache, RedisCache};
pub use error::CacheError;
pub use ledger::RedisTransactionLedger;

use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use std::time::Duration;
use tracing::{error, info};

pub type RedisPool = Pool<RedisConnectionManager>;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub redis_url: String,
    pub max_connections: u32,
    pub connection_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            max_connections: 16,
            connection_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Build the pool and check the server answers `PING`
///
/// The ledger depends on Redis once it is configured, so an unreachable
/// server fails start-up instead of degrading.
pub async fn init_cache_pool(config: CacheConfig) -> Result<RedisPool, CacheError> {
    let manager = RedisConnectionManager::new(config.redis_url.as_str())
        .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

    let pool = Pool::builder()
        .max_size(config.max_connections)
        .connection_timeout(config.connection_timeout)
        .idle_timeout(config.idle_timeout)
        .build(manager)
        .await
        .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

    ping(&pool).await.map_err(|e| {
        error!("Redis did not answer PING: {}", e);
        e
    })?;

    info!(
        "Redis pool ready: max_connections={}",
        config.max_connections
    );
    Ok(pool)
}

async fn ping(pool: &RedisPool) -> Result<(), CacheError> {
    let mut conn = pool.get().await?;
    let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
    Ok(())
}

pub async fn health_check(pool: &RedisPool) -> Result<(), CacheError> {
    ping(pool).await
}
