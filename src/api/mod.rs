//! HTTP surface
//!
//! | Route                            | Handler                       |
//! |----------------------------------|-------------------------------|
//! | `POST /payment/checkout`         | [`payments::checkout`]        |
//! | `POST /payment/webhook`          | [`payments::webhook`]         |
//! | `GET  /payment/status/:order_id` | [`payments::order_status`]    |
//! | `GET  /health`                   | [`health::health_check`]      |

pub mod health;
pub mod payments;

use crate::middleware::{RateLimitLayer, RateLimiter};
use crate::payments::orders::OrderStore;
use crate::payments::phone::ProviderRouter;
use crate::payments::processor::WebhookProcessor;
use crate::payments::traits::PaymentProvider;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub environment: String,
    pub provider: Arc<dyn PaymentProvider>,
    pub router: ProviderRouter,
    pub orders: Arc<dyn OrderStore>,
    pub processor: Arc<WebhookProcessor>,
    pub probes: health::HealthProbes,
}

/// Build the application router
pub fn app(state: AppState, rate_limiter: Option<RateLimiter>) -> Router {
    let mut checkout = Router::new().route("/payment/checkout", post(payments::checkout));
    if let Some(limiter) = rate_limiter {
        checkout = checkout.route_layer(RateLimitLayer::new(limiter));
    }

    Router::new()
        .route("/health", get(health::health_check))
        .route("/payment/webhook", post(payments::webhook))
        .route("/payment/status/:order_id", get(payments::order_status))
        .merge(checkout)
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
