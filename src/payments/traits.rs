//! Payment provider trait definitions
//!
//! Defines the interface the HTTP layer uses to talk to a payment gateway.

use crate::error::AppResult;
use crate::payments::types::{PaymentRequest, PaymentResponse, PaymentStatus};
use async_trait::async_trait;

/// Trait for payment gateway implementations
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Initialize a payment for a checkout
    ///
    /// Signs and submits the order to the gateway exactly once. A transport
    /// failure is reported to the caller and never retried, since a retry
    /// could charge the buyer twice.
    ///
    /// # Returns
    /// * `PaymentResponse` - gateway reference, routed provider and payment URL
    async fn initiate_payment(&self, request: PaymentRequest) -> AppResult<PaymentResponse>;

    /// Query the gateway for the status of an order
    ///
    /// Idempotent, so transient failures are retried with backoff.
    async fn query_status(&self, order_id: &str) -> AppResult<PaymentStatus>;

    /// Validate webhook signature
    ///
    /// Verifies that a webhook request body is authentic and came from the
    /// gateway. Returns false for any malformed input.
    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool;

    /// Whether webhook verification has a secret to work with
    fn webhook_configured(&self) -> bool;

    /// Whether outbound requests can be signed
    fn is_configured(&self) -> bool;
}
