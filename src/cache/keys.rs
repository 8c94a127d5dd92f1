//! Versioned cache key builders
//!
//! Every key carries a schema version prefix so a format change can be rolled
//! out by bumping `VERSION` instead of flushing Redis.

use std::fmt;

pub const VERSION: &str = "v1";

pub mod order {
    use super::*;

    /// Cached order payment snapshot
    #[derive(Debug, Clone)]
    pub struct StatusKey {
        order_id: String,
    }

    impl StatusKey {
        pub fn new(order_id: impl Into<String>) -> Self {
            Self {
                order_id: order_id.into(),
            }
        }
    }

    impl fmt::Display for StatusKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:order:status:{}", VERSION, self.order_id)
        }
    }
}

pub mod webhook {
    use super::*;

    /// Idempotency marker for a processed gateway transaction
    #[derive(Debug, Clone)]
    pub struct TransactionKey {
        transaction_id: String,
    }

    impl TransactionKey {
        pub fn new(transaction_id: impl Into<String>) -> Self {
            Self {
                transaction_id: transaction_id.into(),
            }
        }
    }

    impl fmt::Display for TransactionKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:webhook:tx:{}", VERSION, self.transaction_id)
        }
    }
}

pub mod rate_limit {
    use super::*;

    /// Request counter for one client in one fixed window
    #[derive(Debug, Clone)]
    pub struct WindowKey {
        client: String,
        window: u64,
    }

    impl WindowKey {
        pub fn new(client: impl Into<String>, window: u64) -> Self {
            Self {
                client: client.into(),
                window,
            }
        }
    }

    impl fmt::Display for WindowKey {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}:ratelimit:{}:{}", VERSION, self.client, self.window)
        }
    }
}
