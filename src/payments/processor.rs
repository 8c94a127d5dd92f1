//! Applies verified gateway webhooks to orders
//!
//! Signature checks happen before this point; the processor only sees events
//! that came from the gateway. An event is checked against the order state
//! machine and applied with a compare-and-set on `pending`, which is what
//! serialises concurrent deliveries. The ledger is written only once the
//! order has moved, so a delivery that failed halfway leaves nothing behind
//! and the gateway's redelivery settles the order.

use crate::error::AppResult;
use crate::notifications::Notifier;
use crate::payments::ledger::TransactionLedger;
use crate::payments::orders::{next_status, Order, OrderStore};
use crate::payments::types::{OrderPaymentStatus, WebhookEvent};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What happened to a webhook event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The order moved to a terminal status
    Applied(OrderPaymentStatus),
    /// This `transaction_id` was already processed
    Duplicate,
    /// The event carries no transition (e.g. `PENDING`)
    NoTransition,
    /// No order with this id exists
    UnknownOrder,
    /// The order was already settled by another event
    AlreadySettled,
    /// A `COMPLETED` event reported a different amount; the order stays pending
    AmountMismatch,
}

pub struct WebhookProcessor {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<dyn TransactionLedger>,
    notifier: Arc<dyn Notifier>,
}

/// Outcome for an event that found its order already settled
fn settled_outcome(order: &Order, event: &WebhookEvent) -> ProcessOutcome {
    if order.transaction_id.as_deref() == Some(event.transaction_id.as_str()) {
        ProcessOutcome::Duplicate
    } else {
        ProcessOutcome::AlreadySettled
    }
}

impl WebhookProcessor {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        ledger: Arc<dyn TransactionLedger>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            ledger,
            notifier,
        }
    }

    pub async fn process(&self, event: &WebhookEvent) -> AppResult<ProcessOutcome> {
        if self.ledger.contains(&event.transaction_id).await? {
            info!(
                "Duplicate webhook ignored: order_id={} transaction_id={}",
                event.order_id, event.transaction_id
            );
            return Ok(ProcessOutcome::Duplicate);
        }

        let order = match self.orders.find(&event.order_id).await? {
            Some(order) => order,
            None => {
                warn!(
                    "Webhook for unknown order: order_id={} transaction_id={}",
                    event.order_id, event.transaction_id
                );
                return Ok(ProcessOutcome::UnknownOrder);
            }
        };

        let target = match next_status(order.status, event.status) {
            Ok(Some(target)) => target,
            Ok(None) => {
                debug!(
                    "Webhook carries no transition: order_id={} status={:?}",
                    event.order_id, event.status
                );
                return Ok(ProcessOutcome::NoTransition);
            }
            Err(e) => {
                warn!("Webhook rejected for order {}: {}", event.order_id, e);
                return Ok(settled_outcome(&order, event));
            }
        };

        if target == OrderPaymentStatus::Completed {
            if let Some(amount) = event.amount.filter(|amount| *amount != order.amount) {
                warn!(
                    "Completion refused, amount mismatch: order_id={} expected={} received={} transaction_id={}",
                    order.order_id, order.amount, amount, event.transaction_id
                );
                return Ok(ProcessOutcome::AmountMismatch);
            }
        }

        let updated = match self
            .orders
            .transition_from_pending(&event.order_id, target, &event.transaction_id)
            .await?
        {
            Some(updated) => updated,
            None => {
                warn!(
                    "Order {} was settled concurrently; webhook {} not applied",
                    event.order_id, event.transaction_id
                );
                return Ok(match self.orders.find(&event.order_id).await? {
                    Some(current) => settled_outcome(&current, event),
                    None => ProcessOutcome::AlreadySettled,
                });
            }
        };

        info!(
            "Order payment updated: order_id={} status={} transaction_id={}",
            updated.order_id, updated.status, event.transaction_id
        );

        // the order itself now records the transaction, so a lost ledger
        // write still reads as a duplicate on redelivery
        if let Err(e) = self.ledger.record(&event.transaction_id).await {
            error!(
                "Failed to record transaction {} in ledger: {}",
                event.transaction_id, e
            );
        }

        if updated.status == OrderPaymentStatus::Completed {
            if let Err(e) = self.notifier.payment_confirmed(&updated).await {
                error!(
                    "Failed to send payment confirmation for order {}: {}",
                    updated.order_id, e
                );
            }
        }

        Ok(ProcessOutcome::Applied(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::payments::ledger::InMemoryLedger;
    use crate::payments::orders::{InMemoryOrderStore, NewOrder, Order};
    use crate::payments::types::WebhookStatus;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingNotifier {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn payment_confirmed(&self, _order: &Order) -> AppResult<()> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(AppError::not_configured("test notifier"));
            }
            Ok(())
        }
    }

    /// Ledger whose writes always fail
    #[derive(Default)]
    struct BrokenLedger {
        inner: InMemoryLedger,
    }

    #[async_trait]
    impl TransactionLedger for BrokenLedger {
        async fn contains(&self, transaction_id: &str) -> AppResult<bool> {
            self.inner.contains(transaction_id).await
        }

        async fn record(&self, _transaction_id: &str) -> AppResult<bool> {
            Err(AppError::not_configured("ledger"))
        }
    }

    /// Order store that fails the next `failures` transitions
    #[derive(Default)]
    struct FlakyOrders {
        inner: InMemoryOrderStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl OrderStore for FlakyOrders {
        async fn create_pending(&self, order: NewOrder) -> AppResult<Order> {
            self.inner.create_pending(order).await
        }

        async fn find(&self, order_id: &str) -> AppResult<Option<Order>> {
            self.inner.find(order_id).await
        }

        async fn transition_from_pending(
            &self,
            order_id: &str,
            status: OrderPaymentStatus,
            transaction_id: &str,
        ) -> AppResult<Option<Order>> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(AppError::not_configured("orders"));
            }
            self.inner
                .transition_from_pending(order_id, status, transaction_id)
                .await
        }
    }

    struct Harness {
        orders: Arc<dyn OrderStore>,
        notifier: Arc<CountingNotifier>,
        processor: WebhookProcessor,
    }

    fn order_1() -> NewOrder {
        NewOrder {
            order_id: "ORD-1".to_string(),
            amount: Decimal::new(20000, 0),
            phone: "255715123456".to_string(),
            provider: None,
            customer_name: None,
        }
    }

    async fn harness_with(
        orders: Arc<dyn OrderStore>,
        ledger: Arc<dyn TransactionLedger>,
        fail_notify: bool,
    ) -> Harness {
        orders.create_pending(order_1()).await.unwrap();
        let notifier = Arc::new(CountingNotifier {
            fail: fail_notify,
            ..Default::default()
        });
        let processor = WebhookProcessor::new(orders.clone(), ledger, notifier.clone());
        Harness {
            orders,
            notifier,
            processor,
        }
    }

    async fn harness(fail_notify: bool) -> Harness {
        harness_with(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemoryLedger::new()),
            fail_notify,
        )
        .await
    }

    fn event(tx: &str, status: WebhookStatus) -> WebhookEvent {
        WebhookEvent {
            order_id: "ORD-1".to_string(),
            transaction_id: tx.to_string(),
            status,
            reference: None,
            amount: Some(Decimal::new(20000, 0)),
            currency: Some("TZS".to_string()),
            payment_method: None,
            payment_phone: None,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_completed_webhook_applies_once() {
        let h = harness(false).await;

        let outcome = h
            .processor
            .process(&event("TX-1", WebhookStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(OrderPaymentStatus::Completed));

        let outcome = h
            .processor
            .process(&event("TX-1", WebhookStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Duplicate);
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);

        let order = h.orders.find("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderPaymentStatus::Completed);
        assert_eq!(order.transaction_id.as_deref(), Some("TX-1"));
    }

    #[tokio::test]
    async fn test_terminal_order_is_not_moved() {
        let h = harness(false).await;
        h.processor
            .process(&event("TX-1", WebhookStatus::Failed))
            .await
            .unwrap();

        let outcome = h
            .processor
            .process(&event("TX-2", WebhookStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::AlreadySettled);
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 0);

        let order = h.orders.find("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderPaymentStatus::Failed);
    }

    #[tokio::test]
    async fn test_pending_event_does_not_consume_transaction_id() {
        let h = harness(false).await;
        let outcome = h
            .processor
            .process(&event("TX-1", WebhookStatus::Pending))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::NoTransition);

        let outcome = h
            .processor
            .process(&event("TX-1", WebhookStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(OrderPaymentStatus::Completed));
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let h = harness(false).await;
        let mut unknown = event("TX-9", WebhookStatus::Completed);
        unknown.order_id = "ORD-404".to_string();
        assert_eq!(
            h.processor.process(&unknown).await.unwrap(),
            ProcessOutcome::UnknownOrder
        );
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_fail_processing() {
        let h = harness(true).await;
        let outcome = h
            .processor
            .process(&event("TX-1", WebhookStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(OrderPaymentStatus::Completed));
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_completion_with_wrong_amount_is_refused() {
        let h = harness(false).await;
        let mut underpaid = event("TX-1", WebhookStatus::Completed);
        underpaid.amount = Some(Decimal::ONE);

        let outcome = h.processor.process(&underpaid).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::AmountMismatch);
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 0);

        let order = h.orders.find("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderPaymentStatus::Pending);

        // the full amount still settles the order
        let outcome = h
            .processor
            .process(&event("TX-2", WebhookStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(OrderPaymentStatus::Completed));
    }

    #[tokio::test]
    async fn test_failure_with_other_amount_still_applies() {
        let h = harness(false).await;
        let mut failed = event("TX-1", WebhookStatus::Failed);
        failed.amount = Some(Decimal::ONE);
        assert_eq!(
            h.processor.process(&failed).await.unwrap(),
            ProcessOutcome::Applied(OrderPaymentStatus::Failed)
        );
    }

    #[tokio::test]
    async fn test_lost_ledger_write_still_deduplicates() {
        let h = harness_with(
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(BrokenLedger::default()),
            false,
        )
        .await;

        let outcome = h
            .processor
            .process(&event("TX-1", WebhookStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(OrderPaymentStatus::Completed));

        let outcome = h
            .processor
            .process(&event("TX-1", WebhookStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Duplicate);
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_redelivery_after_store_failure_settles_order() {
        let orders = Arc::new(FlakyOrders {
            failures: AtomicUsize::new(1),
            ..Default::default()
        });
        let ledger = Arc::new(InMemoryLedger::new());
        let h = harness_with(orders, ledger.clone(), false).await;

        assert!(h
            .processor
            .process(&event("TX-1", WebhookStatus::Completed))
            .await
            .is_err());
        assert!(ledger.is_empty());

        let outcome = h
            .processor
            .process(&event("TX-1", WebhookStatus::Completed))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Applied(OrderPaymentStatus::Completed));
        assert!(ledger.contains("TX-1").await.unwrap());

        let order = h.orders.find("ORD-1").await.unwrap().unwrap();
        assert_eq!(order.status, OrderPaymentStatus::Completed);
    }

    #[tokio::test]
    async fn test_concurrent_deliveries_apply_once() {
        let h = Arc::new(harness(false).await);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let h = h.clone();
                tokio::spawn(async move {
                    h.processor
                        .process(&event("TX-1", WebhookStatus::Completed))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                ProcessOutcome::Applied(_) => applied += 1,
                other => assert_eq!(other, ProcessOutcome::Duplicate),
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(h.notifier.sent.load(Ordering::SeqCst), 1);
    }
}
