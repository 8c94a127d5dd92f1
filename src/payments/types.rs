//! Payment gateway types and data structures
//!
//! Requests and responses exchanged with the gateway, the webhook event it
//! posts back, and the payment status of an order.

use crate::error::ValidationError;
use crate::payments::phone::Provider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Currency every checkout is charged in
pub const CURRENCY: &str = "TZS";

const MAX_ORDER_ID_LEN: usize = 64;

/// Amounts are stored as `NUMERIC(18, 2)`
const AMOUNT_SCALE: u32 = 2;
const MAX_AMOUNT_DIGITS: u32 = 16;

/// Payment request for a single checkout attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    /// Storefront order identifier, also used as the gateway order id
    pub order_id: String,
    /// Amount in TZS
    pub amount: Decimal,
    /// Buyer phone in local or international format
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
}

impl PaymentRequest {
    /// Check the input constraints that must hold before anything is signed
    pub fn validate(&self) -> Result<(), ValidationError> {
        let order_id = self.order_id.trim();
        if order_id.is_empty() {
            return Err(ValidationError::MissingField {
                field: "order_id".to_string(),
            });
        }
        if order_id.len() > MAX_ORDER_ID_LEN
            || !order_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::InvalidField {
                field: "order_id".to_string(),
                message: "only letters, digits, '-' and '_' are allowed (max 64)".to_string(),
            });
        }

        if self.amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount {
                amount: self.amount.to_string(),
            });
        }
        if self.amount.normalize().scale() > AMOUNT_SCALE {
            return Err(ValidationError::InvalidField {
                field: "amount".to_string(),
                message: format!("at most {} decimal places are allowed", AMOUNT_SCALE),
            });
        }
        if self.amount.trunc() >= Decimal::from(10_i64.pow(MAX_AMOUNT_DIGITS)) {
            return Err(ValidationError::InvalidField {
                field: "amount".to_string(),
                message: format!("at most {} integer digits are allowed", MAX_AMOUNT_DIGITS),
            });
        }

        if self.phone.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "phone".to_string(),
            });
        }

        Ok(())
    }
}

/// Result of a successful payment initiation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub order_id: String,
    /// Gateway reference for the created order
    pub reference: Option<String>,
    /// Provider the buyer's phone routes to
    pub provider: Provider,
    /// Hosted payment page, when the gateway returns one
    pub payment_url: Option<String>,
    /// Whether a USSD push was sent to the buyer's wallet
    pub wallet_push_sent: bool,
    /// Raw gateway `data` section
    pub provider_data: Option<serde_json::Value>,
}

/// Payment status as reported by the gateway's status query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PaymentStatus {
    /// Payment was successful
    Success {
        transaction_id: Option<String>,
        amount: Option<String>,
        channel: Option<String>,
    },
    /// Payment is pending
    Pending,
    /// Payment failed
    Failed { reason: Option<String> },
    /// Unknown status
    Unknown,
}

/// Payment state of a storefront order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderPaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl OrderPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPaymentStatus::Pending => "pending",
            OrderPaymentStatus::Completed => "completed",
            OrderPaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderPaymentStatus::Pending)
    }
}

impl fmt::Display for OrderPaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderPaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderPaymentStatus::Pending),
            "completed" => Ok(OrderPaymentStatus::Completed),
            "failed" => Ok(OrderPaymentStatus::Failed),
            other => Err(format!("unknown payment status '{}'", other)),
        }
    }
}

/// Status carried by a gateway webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebhookStatus {
    Completed,
    Failed,
    Pending,
    #[serde(other)]
    Unknown,
}

/// Payment-status callback posted by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub order_id: String,
    pub transaction_id: String,
    pub status: WebhookStatus,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payment_phone: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PaymentRequest {
        PaymentRequest {
            order_id: "ORD-2024-0001".to_string(),
            amount: Decimal::new(20000, 0),
            phone: "0715123456".to_string(),
            email: None,
            customer_name: None,
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_amount_must_be_positive() {
        let mut req = request();
        req.amount = Decimal::ZERO;
        assert!(matches!(
            req.validate(),
            Err(ValidationError::InvalidAmount { .. })
        ));
        req.amount = Decimal::new(-5, 0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_amount_fits_storage_precision() {
        let mut req = request();
        req.amount = "20000.50".parse().unwrap();
        assert!(req.validate().is_ok());
        // trailing zeros do not count
        req.amount = "20000.500".parse().unwrap();
        assert!(req.validate().is_ok());

        req.amount = "20000.505".parse().unwrap();
        assert!(matches!(
            req.validate(),
            Err(ValidationError::InvalidField { ref field, .. }) if field == "amount"
        ));

        req.amount = "9999999999999999.99".parse().unwrap();
        assert!(req.validate().is_ok());
        req.amount = "10000000000000000".parse().unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_phone_and_order_id_required() {
        let mut req = request();
        req.phone = "  ".to_string();
        assert_eq!(
            req.validate(),
            Err(ValidationError::MissingField {
                field: "phone".to_string()
            })
        );

        let mut req = request();
        req.order_id = "ORD 1?x=2".to_string();
        assert!(matches!(
            req.validate(),
            Err(ValidationError::InvalidField { .. })
        ));
    }

    #[test]
    fn test_webhook_event_parsing() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{
                "order_id": "ORD-1",
                "transaction_id": "TX-99",
                "status": "COMPLETED",
                "amount": "20000",
                "currency": "TZS",
                "payment_method": "MPESA",
                "payment_phone": "255755123456",
                "reference": "0289999288",
                "created_at": "2024-05-01T10:00:00+03:00"
            }"#,
        )
        .unwrap();
        assert_eq!(event.status, WebhookStatus::Completed);
        assert_eq!(event.amount, Some(Decimal::new(20000, 0)));

        let event: WebhookEvent = serde_json::from_str(
            r#"{"order_id": "ORD-1", "transaction_id": "TX-1", "status": "REVERSED"}"#,
        )
        .unwrap();
        assert_eq!(event.status, WebhookStatus::Unknown);
    }

    #[test]
    fn test_order_status_strings() {
        assert_eq!("completed".parse(), Ok(OrderPaymentStatus::Completed));
        assert!(OrderPaymentStatus::Failed.is_terminal());
        assert!(!OrderPaymentStatus::Pending.is_terminal());
    }
}
