//! Integration tests for the Redis layer
//!
//! These tests require a running Redis instance.
//! Run with: REDIS_URL=redis://localhost:6379 cargo test --test cache_integration_test -- --ignored

#[cfg(feature = "cache")]
mod cache_tests {
    use selcom_gateway::cache::{cache::Cache, keys::webhook, CacheConfig, RedisCache, RedisTransactionLedger};
    use selcom_gateway::middleware::{RateLimiter, RedisCounterStore};
    use selcom_gateway::payments::TransactionLedger;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    async fn setup_cache() -> RedisCache {
        let config = CacheConfig {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            ..Default::default()
        };

        let pool = selcom_gateway::cache::init_cache_pool(config)
            .await
            .expect("Failed to init cache pool");
        RedisCache::new(pool)
    }

    fn unique(prefix: &str) -> String {
        format!("{}-{}", prefix, Uuid::new_v4().simple())
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_ledger_records_once() {
        let ledger = RedisTransactionLedger::new(setup_cache().await);
        let tx = unique("TX");

        assert!(!ledger.contains(&tx).await.unwrap());
        assert!(ledger.record(&tx).await.unwrap());
        assert!(ledger.contains(&tx).await.unwrap());
        assert!(!ledger.record(&tx).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_ledger_concurrent_records_single_winner() {
        let ledger = Arc::new(RedisTransactionLedger::new(setup_cache().await));
        let tx = unique("TX-race");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                let tx = tx.clone();
                tokio::spawn(async move { ledger.record(&tx).await.unwrap() })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_ledger_marker_is_stored_under_versioned_key() {
        let cache = setup_cache().await;
        let ledger = RedisTransactionLedger::new(cache.clone());
        let tx = unique("TX-key");

        ledger.record(&tx).await.unwrap();
        let key = webhook::TransactionKey::new(tx.as_str()).to_string();
        assert!(key.starts_with("v1:webhook:tx:"));
        assert!(<RedisCache as Cache<String>>::exists(&cache, &key).await.unwrap());
        <RedisCache as Cache<String>>::delete(&cache, &key).await.unwrap();
        assert!(!ledger.contains(&tx).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_cache_ttl_expiration() {
        let cache = setup_cache().await;

        let key = unique("test:ttl");
        let test_data = "test_value".to_string();
        cache
            .set(&key, &test_data, Some(Duration::from_secs(1)))
            .await
            .unwrap();

        // Should exist immediately
        let retrieved = cache.get(&key).await.unwrap();
        assert_eq!(retrieved, Some(test_data));

        // Wait for TTL to expire
        tokio::time::sleep(Duration::from_secs(2)).await;

        let expired = <RedisCache as Cache<String>>::get(&cache, &key).await.unwrap();
        assert_eq!(expired, None);
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_shared_rate_limit_counters() {
        let store = Arc::new(RedisCounterStore::new(setup_cache().await));
        let limiter = RateLimiter::per_minute(store, 2);
        let client = unique("ip");

        assert!(limiter.check(&client).await.is_ok());
        assert!(limiter.check(&client).await.is_ok());
        assert!(limiter.check(&client).await.is_err());
    }

    #[tokio::test]
    #[ignore] // Needs DNS resolution for the bogus host
    async fn test_unreachable_redis_fails_pool_init() {
        let config = CacheConfig {
            redis_url: "redis://invalid-host:6379".to_string(),
            connection_timeout: Duration::from_millis(100),
            ..Default::default()
        };

        let result = selcom_gateway::cache::init_cache_pool(config).await;
        assert!(
            result.is_err(),
            "Expected cache initialization to fail with invalid Redis URL"
        );
    }
}
