use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::error::AppResult;
use crate::payments::orders::{reuse_existing, NewOrder, Order, OrderStore};
use crate::payments::phone::Provider;
use crate::payments::types::OrderPaymentStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use tracing::debug;

#[cfg(feature = "cache")]
use crate::cache::{cache::ttl, keys::order::StatusKey, Cache, RedisCache};

const ORDER_COLUMNS: &str = "order_id, amount, phone, provider, customer_name, status, \
                             transaction_id, created_at, updated_at";

/// Row in the `orders` table
#[derive(Debug, Clone, FromRow)]
struct OrderRow {
    order_id: String,
    amount: Decimal,
    phone: String,
    provider: Option<String>,
    customer_name: Option<String>,
    status: String,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = DatabaseError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let invalid = |message: String| {
            DatabaseError::new(DatabaseErrorKind::InvalidData { message })
                .with_context(format!("order {}", row.order_id))
        };

        let status = row.status.parse::<OrderPaymentStatus>().map_err(invalid)?;
        let provider = row
            .provider
            .as_deref()
            .map(|name| name.parse::<Provider>().map_err(|e| invalid(e.to_string())))
            .transpose()?;

        Ok(Order {
            order_id: row.order_id,
            amount: row.amount,
            phone: row.phone,
            provider,
            customer_name: row.customer_name,
            status,
            transaction_id: row.transaction_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Order store backed by PostgreSQL, with an optional Redis read cache
pub struct PgOrderStore {
    pool: PgPool,
    #[cfg(feature = "cache")]
    cache: Option<RedisCache>,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            #[cfg(feature = "cache")]
            cache: None,
        }
    }

    #[cfg(feature = "cache")]
    pub fn enable_cache(&mut self, cache: RedisCache) {
        self.cache = Some(cache);
    }

    async fn fetch(&self, order_id: &str) -> Result<Option<Order>, DatabaseError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {} FROM orders WHERE order_id = $1",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        row.map(Order::try_from).transpose()
    }

    #[cfg(feature = "cache")]
    async fn invalidate(&self, order_id: &str) {
        if let Some(ref cache) = self.cache {
            let key = StatusKey::new(order_id).to_string();
            if let Err(e) = <RedisCache as Cache<Order>>::delete(cache, &key).await {
                debug!("Failed to invalidate cached order {}: {}", order_id, e);
            }
        }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn create_pending(&self, order: NewOrder) -> AppResult<Order> {
        let order_id = order.order_id.clone();

        let inserted = sqlx::query_as::<_, OrderRow>(&format!(
            "INSERT INTO orders (order_id, amount, phone, provider, customer_name, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, 'pending', NOW(), NOW())
             ON CONFLICT (order_id) DO NOTHING
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(&order.order_id)
        .bind(order.amount)
        .bind(&order.phone)
        .bind(order.provider.map(|p| p.as_str()))
        .bind(&order.customer_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(row) = inserted {
            return Ok(Order::try_from(row)?);
        }

        // order id already taken
        let existing = self.fetch(&order_id).await?.ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "Order".to_string(),
                id: order_id.clone(),
            })
        })?;

        Ok(reuse_existing(existing, &order)?)
    }

    async fn find(&self, order_id: &str) -> AppResult<Option<Order>> {
        #[cfg(feature = "cache")]
        if let Some(ref cache) = self.cache {
            let key = StatusKey::new(order_id).to_string();
            if let Ok(Some(order)) = <RedisCache as Cache<Order>>::get(cache, &key).await {
                return Ok(Some(order));
            }
        }

        let order = self.fetch(order_id).await?;

        #[cfg(feature = "cache")]
        if let (Some(ref cache), Some(ref order)) = (&self.cache, &order) {
            let key = StatusKey::new(order_id).to_string();
            if let Err(e) = cache.set(&key, order, Some(ttl::ORDER_STATUS)).await {
                debug!("Failed to cache order {}: {}", order_id, e);
            }
        }

        Ok(order)
    }

    async fn transition_from_pending(
        &self,
        order_id: &str,
        status: OrderPaymentStatus,
        transaction_id: &str,
    ) -> AppResult<Option<Order>> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "UPDATE orders SET status = $2, transaction_id = $3, updated_at = NOW()
             WHERE order_id = $1 AND status = 'pending'
             RETURNING {}",
            ORDER_COLUMNS
        ))
        .bind(order_id)
        .bind(status.as_str())
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        #[cfg(feature = "cache")]
        self.invalidate(order_id).await;

        match row {
            Some(row) => {
                debug!("Order {} moved to {}", order_id, status);
                Ok(Some(Order::try_from(row)?))
            }
            None => Ok(None),
        }
    }
}
