//! Idempotency ledger for gateway webhooks
//!
//! The gateway delivers callbacks at least once. A `transaction_id` is
//! recorded only after its event has settled an order, so a delivery that
//! failed halfway is processed again on redelivery. Concurrent deliveries of
//! the same event are serialised by the order store's compare-and-set.

use crate::error::AppResult;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Whether `transaction_id` has already settled an order
    async fn contains(&self, transaction_id: &str) -> AppResult<bool>;

    /// Record a settled `transaction_id`; `false` if it was already recorded
    async fn record(&self, transaction_id: &str) -> AppResult<bool>;
}

/// Process-local ledger
#[derive(Default)]
pub struct InMemoryLedger {
    seen: Mutex<HashSet<String>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TransactionLedger for InMemoryLedger {
    async fn contains(&self, transaction_id: &str) -> AppResult<bool> {
        let seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(seen.contains(transaction_id))
    }

    async fn record(&self, transaction_id: &str) -> AppResult<bool> {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(seen.insert(transaction_id.to_string()))
    }
}
