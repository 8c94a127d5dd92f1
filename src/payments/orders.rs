//! Order payment state and the store that persists it
//!
//! An order starts `pending` and moves at most once, to `completed` or
//! `failed`, driven by verified gateway webhooks.

use crate::error::{AppResult, DomainError};
use crate::payments::phone::Provider;
use crate::payments::types::{OrderPaymentStatus, WebhookStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Order as seen by the payment service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub amount: Decimal,
    pub phone: String,
    pub provider: Option<Provider>,
    pub customer_name: Option<String>,
    pub status: OrderPaymentStatus,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields needed to open a pending order
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: String,
    pub amount: Decimal,
    pub phone: String,
    pub provider: Option<Provider>,
    pub customer_name: Option<String>,
}

impl Order {
    pub fn pending(new: NewOrder) -> Self {
        let now = Utc::now();
        Self {
            order_id: new.order_id,
            amount: new.amount,
            phone: new.phone,
            provider: new.provider,
            customer_name: new.customer_name,
            status: OrderPaymentStatus::Pending,
            transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Decide whether a checkout may reuse an order id that is already taken
///
/// Only a pending order with the same amount and phone is returned again; a
/// settled order, or one requested on different terms, is a conflict.
pub fn reuse_existing(existing: Order, requested: &NewOrder) -> Result<Order, DomainError> {
    if existing.status.is_terminal()
        || existing.amount != requested.amount
        || existing.phone != requested.phone
    {
        return Err(DomainError::OrderAlreadyExists {
            order_id: existing.order_id,
            status: existing.status.to_string(),
        });
    }
    Ok(existing)
}

/// Next state for an order given a webhook status
///
/// `Ok(None)` means the event carries no transition (a `PENDING` or
/// unrecognised status); terminal orders never move again.
pub fn next_status(
    current: OrderPaymentStatus,
    event: WebhookStatus,
) -> Result<Option<OrderPaymentStatus>, DomainError> {
    let target = match event {
        WebhookStatus::Completed => OrderPaymentStatus::Completed,
        WebhookStatus::Failed => OrderPaymentStatus::Failed,
        WebhookStatus::Pending | WebhookStatus::Unknown => return Ok(None),
    };

    match current {
        OrderPaymentStatus::Pending => Ok(Some(target)),
        terminal => Err(DomainError::InvalidTransition {
            from: terminal.to_string(),
            to: target.to_string(),
        }),
    }
}

/// Persistence for order payment state
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Open a pending order, or return the existing one if it is still pending
    /// on the same terms (see [`reuse_existing`])
    async fn create_pending(&self, order: NewOrder) -> AppResult<Order>;

    async fn find(&self, order_id: &str) -> AppResult<Option<Order>>;

    /// Move an order from `pending` to `status`
    ///
    /// Returns `None` when the order is missing or no longer pending, so two
    /// concurrent deliveries cannot both apply.
    async fn transition_from_pending(
        &self,
        order_id: &str,
        status: OrderPaymentStatus,
        transaction_id: &str,
    ) -> AppResult<Option<Order>>;
}

/// Process-local order store
#[derive(Default)]
pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_pending(&self, order: NewOrder) -> AppResult<Order> {
        let mut orders = self.orders.write().await;

        if let Some(existing) = orders.get(&order.order_id) {
            return Ok(reuse_existing(existing.clone(), &order)?);
        }

        let created = Order::pending(order);
        orders.insert(created.order_id.clone(), created.clone());
        Ok(created)
    }

    async fn find(&self, order_id: &str) -> AppResult<Option<Order>> {
        Ok(self.orders.read().await.get(order_id).cloned())
    }

    async fn transition_from_pending(
        &self,
        order_id: &str,
        status: OrderPaymentStatus,
        transaction_id: &str,
    ) -> AppResult<Option<Order>> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(order_id) {
            Some(order) if order.status == OrderPaymentStatus::Pending => {
                order.status = status;
                order.transaction_id = Some(transaction_id.to_string());
                order.updated_at = Utc::now();
                Ok(Some(order.clone()))
            }
            _ => Ok(None),
        }
    }
}
