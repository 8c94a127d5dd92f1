//! Integration tests for the PostgreSQL stores
//!
//! These tests require a running PostgreSQL instance.
//! Run with: DATABASE_URL=postgres://... cargo test --test database_integration_test -- --ignored

#[cfg(feature = "database")]
mod database_tests {
    use rust_decimal::Decimal;
    use selcom_gateway::database::{
        init_pool, run_migrations, PgOrderStore, PgTransactionLedger, PoolConfig,
    };
    use selcom_gateway::payments::{
        NewOrder, OrderPaymentStatus, OrderStore, Provider, TransactionLedger,
    };
    use uuid::Uuid;

    async fn setup_db() -> sqlx::PgPool {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let pool = init_pool(
            &database_url,
            Some(PoolConfig {
                min_connections: 1,
                ..Default::default()
            }),
        )
        .await
        .expect("Failed to init DB pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        pool
    }

    fn new_order(order_id: &str) -> NewOrder {
        NewOrder {
            order_id: order_id.to_string(),
            amount: Decimal::new(2000050, 2),
            phone: "255755123456".to_string(),
            provider: Some(Provider::MPesa),
            customer_name: Some("Baraka".to_string()),
        }
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn test_order_lifecycle() {
        let store = PgOrderStore::new(setup_db().await);
        let order_id = format!("ORD-{}", Uuid::new_v4().simple());

        let created = store.create_pending(new_order(&order_id)).await.unwrap();
        assert_eq!(created.status, OrderPaymentStatus::Pending);
        assert_eq!(created.provider, Some(Provider::MPesa));
        assert_eq!(created.amount, Decimal::new(2000050, 2));

        // re-checkout of a pending order returns it unchanged
        let again = store.create_pending(new_order(&order_id)).await.unwrap();
        assert_eq!(again.created_at, created.created_at);

        // but not with different terms
        let mut cheaper = new_order(&order_id);
        cheaper.amount = Decimal::ONE;
        assert!(store.create_pending(cheaper).await.is_err());
        let mut other_phone = new_order(&order_id);
        other_phone.phone = "255715000000".to_string();
        assert!(store.create_pending(other_phone).await.is_err());

        let updated = store
            .transition_from_pending(&order_id, OrderPaymentStatus::Completed, "TX-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, OrderPaymentStatus::Completed);

        assert!(store
            .transition_from_pending(&order_id, OrderPaymentStatus::Failed, "TX-2")
            .await
            .unwrap()
            .is_none());
        assert!(store.create_pending(new_order(&order_id)).await.is_err());

        let found = store.find(&order_id).await.unwrap().unwrap();
        assert_eq!(found.transaction_id.as_deref(), Some("TX-1"));
        assert!(store.find("ORD-missing").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires database running
    async fn test_ledger_records_once() {
        let ledger = PgTransactionLedger::new(setup_db().await);
        let tx = format!("TX-{}", Uuid::new_v4().simple());

        assert!(!ledger.contains(&tx).await.unwrap());
        assert!(ledger.record(&tx).await.unwrap());
        assert!(!ledger.record(&tx).await.unwrap());
        assert!(ledger.contains(&tx).await.unwrap());
    }
}
