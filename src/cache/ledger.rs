//! Redis-backed webhook idempotency ledger

use super::cache::{ttl, Cache};
use super::keys::webhook::TransactionKey;
use super::RedisCache;
use crate::error::AppResult;
use crate::payments::ledger::TransactionLedger;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

/// Settled transactions are `SET NX EX` markers that expire after
/// [`ttl::WEBHOOK_TRANSACTIONS`]
pub struct RedisTransactionLedger {
    cache: RedisCache,
}

impl RedisTransactionLedger {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl TransactionLedger for RedisTransactionLedger {
    async fn contains(&self, transaction_id: &str) -> AppResult<bool> {
        let key = TransactionKey::new(transaction_id).to_string();
        let found = <RedisCache as Cache<String>>::exists(&self.cache, &key).await?;
        if found {
            debug!("Ledger hit for transaction {}", transaction_id);
        }
        Ok(found)
    }

    async fn record(&self, transaction_id: &str) -> AppResult<bool> {
        let key = TransactionKey::new(transaction_id).to_string();
        let recorded_at = Utc::now().to_rfc3339();
        Ok(self
            .cache
            .set_if_absent(&key, &recorded_at, ttl::WEBHOOK_TRANSACTIONS)
            .await?)
    }
}
