//! Buyer notifications sent after a payment settles

pub mod whatsapp;

pub use whatsapp::{WhatsAppConfig, WhatsAppNotifier};

use crate::error::AppResult;
use crate::payments::orders::Order;
use async_trait::async_trait;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Tell the buyer their payment for `order` was received
    async fn payment_confirmed(&self, order: &Order) -> AppResult<()>;
}

/// Confirmation text shared by every channel
pub fn confirmation_message(order: &Order) -> String {
    let greeting = match order.customer_name.as_deref() {
        Some(name) if !name.trim().is_empty() => format!("Hello {}", name.trim()),
        _ => "Hello".to_string(),
    };
    format!(
        "{}, we have received your payment of TZS {} for order {}. Thank you!",
        greeting,
        order.amount.normalize(),
        order.order_id
    )
}

/// Writes confirmations to the log; used when no messaging channel is configured
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn payment_confirmed(&self, order: &Order) -> AppResult<()> {
        tracing::info!(
            order_id = %order.order_id,
            phone = %order.phone,
            "Payment confirmation (no messaging channel configured): {}",
            confirmation_message(order)
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::orders::NewOrder;
    use rust_decimal::Decimal;

    #[test]
    fn test_confirmation_message() {
        let mut order = Order::pending(NewOrder {
            order_id: "ORD-77".to_string(),
            amount: Decimal::new(2000000, 2),
            phone: "255715123456".to_string(),
            provider: None,
            customer_name: Some(" Zawadi ".to_string()),
        });
        assert_eq!(
            confirmation_message(&order),
            "Hello Zawadi, we have received your payment of TZS 20000 for order ORD-77. Thank you!"
        );

        order.customer_name = None;
        assert!(confirmation_message(&order).starts_with("Hello, we have"));
    }
}
