use crate::database::error::DatabaseError;
use crate::error::AppResult;
use crate::payments::ledger::TransactionLedger;
use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

/// Webhook idempotency ledger backed by the `webhook_events` table
pub struct PgTransactionLedger {
    pool: PgPool,
}

impl PgTransactionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionLedger for PgTransactionLedger {
    async fn contains(&self, transaction_id: &str) -> AppResult<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT transaction_id FROM webhook_events WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        if found.is_some() {
            debug!("Ledger hit for transaction {}", transaction_id);
        }
        Ok(found.is_some())
    }

    async fn record(&self, transaction_id: &str) -> AppResult<bool> {
        let result = sqlx::query(
            "INSERT INTO webhook_events (transaction_id, recorded_at) VALUES ($1, NOW())
             ON CONFLICT (transaction_id) DO NOTHING",
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() == 1)
    }
}
