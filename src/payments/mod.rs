//! Payment gateway integration module
//!
//! Request signing, phone-to-provider routing, webhook verification and the
//! order payment state machine for Selcom mobile-money checkouts in Tanzania.

pub mod ledger;
pub mod orders;
pub mod phone;
pub mod processor;
pub mod providers;
pub mod signer;
pub mod traits;
pub mod types;
pub mod webhook;

pub use ledger::{InMemoryLedger, TransactionLedger};
pub use orders::{InMemoryOrderStore, NewOrder, Order, OrderStore};
pub use phone::{normalize_phone, Provider, ProviderRouter};
pub use processor::{ProcessOutcome, WebhookProcessor};
pub use providers::{SelcomConfig, SelcomProvider};
pub use signer::{CheckoutUrls, RequestSigner};
pub use traits::PaymentProvider;
pub use types::{OrderPaymentStatus, PaymentRequest, PaymentResponse, PaymentStatus, WebhookEvent};
pub use webhook::WebhookVerifier;
