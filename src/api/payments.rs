//! Checkout, webhook and order status handlers

use super::AppState;
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::payments::orders::NewOrder;
use crate::payments::phone::{normalize_phone, Provider};
use crate::payments::processor::ProcessOutcome;
use crate::payments::types::{OrderPaymentStatus, PaymentRequest, PaymentStatus, WebhookEvent};
use crate::payments::webhook::SIGNATURE_HEADER;
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub success: bool,
    pub order_id: String,
    pub status: OrderPaymentStatus,
    pub provider: Provider,
    pub reference: Option<String>,
    pub payment_url: Option<String>,
    pub wallet_push_sent: bool,
}

/// `POST /payment/checkout`
pub async fn checkout(
    State(state): State<AppState>,
    payload: Result<Json<PaymentRequest>, JsonRejection>,
) -> AppResult<Json<CheckoutResponse>> {
    let Json(mut request) = payload.map_err(|rejection| {
        AppError::from(ValidationError::InvalidField {
            field: "body".to_string(),
            message: rejection.body_text(),
        })
    })?;
    request.order_id = request.order_id.trim().to_string();
    request.validate()?;

    if !state.provider.is_configured() {
        return Err(AppError::not_configured("Selcom request signer"));
    }

    let provider = state.router.route(&request.phone)?;
    let phone = normalize_phone(&request.phone)?;

    let order = state
        .orders
        .create_pending(NewOrder {
            order_id: request.order_id.clone(),
            amount: request.amount,
            phone,
            provider: Some(provider),
            customer_name: request.customer_name.clone(),
        })
        .await?;
    // the gateway is always asked for the amount on record
    request.amount = order.amount;

    let response = state.provider.initiate_payment(request).await.map_err(|e| {
        error!("Payment initiation failed for order {}: {}", order.order_id, e);
        e
    })?;

    info!(
        "Checkout started: order_id={} provider={} wallet_push_sent={}",
        response.order_id, response.provider, response.wallet_push_sent
    );

    Ok(Json(CheckoutResponse {
        success: true,
        order_id: response.order_id,
        status: order.status,
        provider: response.provider,
        reference: response.reference,
        payment_url: response.payment_url,
        wallet_push_sent: response.wallet_push_sent,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub success: bool,
    pub status: String,
}

fn ack(status: &str) -> Response {
    (
        StatusCode::OK,
        Json(WebhookAck {
            success: true,
            status: status.to_string(),
        }),
    )
        .into_response()
}

fn reject(code: StatusCode, message: &str) -> Response {
    (
        code,
        Json(serde_json::json!({
            "success": false,
            "error": message,
        })),
    )
        .into_response()
}

/// `POST /payment/webhook`
///
/// Authentication failures are rejected; once the signature checks out the
/// gateway always gets a 200 so it stops redelivering, even when processing
/// fails on our side.
pub async fn webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.provider.webhook_configured() {
        return AppError::not_configured("Webhook verifier").into_response();
    }

    let signature = match headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        Some(signature) if !signature.trim().is_empty() => signature,
        _ => {
            warn!("Webhook rejected: missing {} header", SIGNATURE_HEADER);
            return reject(StatusCode::UNAUTHORIZED, "Missing webhook signature");
        }
    };

    if !state.provider.validate_webhook_signature(&body, signature) {
        warn!("Webhook rejected: invalid signature");
        return reject(StatusCode::FORBIDDEN, "Invalid webhook signature");
    }

    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Verified webhook has an unreadable body: {}", e);
            return ack("ignored");
        }
    };

    info!(
        "Webhook received: order_id={} transaction_id={} status={:?}",
        event.order_id, event.transaction_id, event.status
    );

    match state.processor.process(&event).await {
        Ok(outcome) => ack(match outcome {
            ProcessOutcome::Applied(_) => "applied",
            ProcessOutcome::Duplicate => "duplicate",
            ProcessOutcome::NoTransition => "no_transition",
            ProcessOutcome::UnknownOrder => "unknown_order",
            ProcessOutcome::AlreadySettled => "already_settled",
            ProcessOutcome::AmountMismatch => "amount_mismatch",
        }),
        Err(e) => {
            error!(
                "Webhook processing failed: order_id={} transaction_id={}: {}",
                event.order_id, event.transaction_id, e
            );
            ack("error")
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// Also ask the gateway while the order is still pending
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    pub order_id: String,
    pub status: OrderPaymentStatus,
    pub amount: Decimal,
    pub provider: Option<Provider>,
    pub transaction_id: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_status: Option<PaymentStatus>,
}

/// `GET /payment/status/:order_id`
pub async fn order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> AppResult<Json<OrderStatusResponse>> {
    let order = state
        .orders
        .find(&order_id)
        .await?
        .ok_or_else(|| DomainError::OrderNotFound {
            order_id: order_id.clone(),
        })?;

    let gateway_status = if query.refresh && order.status == OrderPaymentStatus::Pending {
        match state.provider.query_status(&order_id).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!("Gateway status query failed for order {}: {}", order_id, e);
                None
            }
        }
    } else {
        None
    };

    Ok(Json(OrderStatusResponse {
        order_id: order.order_id,
        status: order.status,
        amount: order.amount,
        provider: order.provider,
        transaction_id: order.transaction_id,
        updated_at: order.updated_at,
        gateway_status,
    }))
}
