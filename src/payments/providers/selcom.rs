//! Selcom payment gateway implementation
//!
//! Integrates with Selcom's checkout API to collect TZS payments from
//! M-Pesa, Tigo Pesa, Airtel Money and HaloPesa wallets.

use crate::error::{AppError, AppResult, ExternalError};
use crate::payments::phone::{normalize_phone, Provider, ProviderRouter};
use crate::payments::signer::{CheckoutUrls, RequestSigner, SignedPayload, SignedRequest};
use crate::payments::traits::PaymentProvider;
use crate::payments::types::{PaymentRequest, PaymentResponse, PaymentStatus};
use crate::payments::webhook::WebhookVerifier;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_BASE_URL: &str = "https://apigw.selcommobile.com/v1";

const CREATE_ORDER: &str = "/checkout/create-order-minimal";
const WALLET_PAYMENT: &str = "/checkout/wallet-payment";
const ORDER_STATUS: &str = "/checkout/order-status";

const RESULT_SUCCESS: &str = "000";

/// Selcom gateway configuration
#[derive(Debug, Clone)]
pub struct SelcomConfig {
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub vendor_id: Option<String>,
    /// Secret for webhook signatures (falls back to `api_secret` when loading config)
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub urls: CheckoutUrls,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Maximum number of retries for status queries
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry
    pub retry_base_delay: Duration,
    pub fallback_provider: Option<Provider>,
    /// Send a USSD push to the buyer's wallet after creating the order
    pub wallet_push: bool,
}

impl Default for SelcomConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            vendor_id: None,
            webhook_secret: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            urls: CheckoutUrls {
                redirect_url: "http://localhost:8080/checkout/success".to_string(),
                cancel_url: "http://localhost:8080/checkout/cancel".to_string(),
                webhook_url: "http://localhost:8080/payment/webhook".to_string(),
            },
            timeout_secs: 30,
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            fallback_provider: None,
            wallet_push: true,
        }
    }
}

/// Selcom payment provider
pub struct SelcomProvider {
    config: SelcomConfig,
    client: Client,
    signer: Option<RequestSigner>,
    verifier: WebhookVerifier,
    router: ProviderRouter,
}

impl SelcomProvider {
    /// Create a new Selcom provider instance
    ///
    /// Missing credentials are not an error here: the provider is created
    /// unconfigured and every outbound call reports so.
    pub fn new(config: SelcomConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        let signer = RequestSigner::from_parts(
            config.api_key.as_deref(),
            config.api_secret.as_deref(),
            config.vendor_id.as_deref(),
        );
        if signer.is_none() {
            warn!("Selcom credentials are incomplete; payment initiation is disabled");
        }

        let verifier = WebhookVerifier::new(config.webhook_secret.clone());
        let router = ProviderRouter::new(config.fallback_provider);

        Ok(Self {
            config,
            client,
            signer,
            verifier,
            router,
        })
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    fn signer(&self) -> AppResult<&RequestSigner> {
        self.signer.as_ref().ok_or_else(|| {
            error!("Selcom request attempted without credentials");
            AppError::not_configured("Selcom request signer")
        })
    }

    /// Send one signed request and unwrap the gateway envelope
    async fn dispatch(
        &self,
        method: Method,
        endpoint: &str,
        signed: &SignedRequest,
    ) -> AppResult<SelcomResponse> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let headers = signed.headers.to_header_map()?;

        let request = if method == Method::GET {
            let mut url = reqwest::Url::parse(&url)
                .map_err(|e| AppError::configuration(format!("Invalid Selcom URL {}: {}", url, e)))?;
            for (key, value) in signed.payload.fields() {
                url.query_pairs_mut().append_pair(key, value);
            }
            self.client.get(url)
        } else {
            self.client
                .request(method, &url)
                .json(&signed.payload.to_json())
        };

        let response = request.headers(headers).send().await.map_err(|e| {
            warn!("Selcom request to {} failed: {}", endpoint, e);
            AppError::from(e)
        })?;

        let status = response.status();
        let response_text = response.text().await.unwrap_or_default();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ExternalError::RateLimit {
                service: "Selcom".to_string(),
                retry_after: None,
            }
            .into());
        }

        if !status.is_success() {
            error!("Selcom API error on {}: HTTP {}: {}", endpoint, status, response_text);
            return Err(AppError::payment_provider(
                format!("HTTP {}: {}", status, response_text),
                status.is_server_error(),
            ));
        }

        let envelope: SelcomResponse = serde_json::from_str(&response_text).map_err(|e| {
            error!("Failed to parse Selcom response: {}", e);
            AppError::payment_provider(format!("Invalid response format: {}", e), false)
        })?;

        if envelope.resultcode != RESULT_SUCCESS {
            let message = envelope
                .message
                .clone()
                .or_else(|| envelope.result.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            error!(
                "Selcom rejected request on {}: resultcode={} message={}",
                endpoint, envelope.resultcode, message
            );
            return Err(AppError::payment_provider(
                format!("resultcode {}: {}", envelope.resultcode, message),
                false,
            ));
        }

        Ok(envelope)
    }

    /// Send an idempotent request, re-signing and retrying transient failures
    async fn dispatch_with_retry(
        &self,
        method: Method,
        endpoint: &str,
        payload: &SignedPayload,
    ) -> AppResult<SelcomResponse> {
        let signer = self.signer()?;
        let mut attempt = 0;

        loop {
            let signed = SignedRequest {
                headers: signer.sign(payload, &Utc::now().fixed_offset()),
                payload: payload.clone(),
            };

            match self.dispatch(method.clone(), endpoint, &signed).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = backoff_delay(self.config.retry_base_delay, attempt);
                    warn!(
                        "Selcom request failed, retrying after {:?} (attempt {}): {}",
                        backoff,
                        attempt + 1,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Push a USSD payment prompt to the buyer's wallet
    pub async fn request_wallet_push(&self, order_id: &str, phone: &str) -> AppResult<()> {
        let signer = self.signer()?;
        let msisdn = normalize_phone(phone)?;

        let mut payload = SignedPayload::new();
        payload.insert("transid", Uuid::new_v4().simple().to_string());
        payload.insert("order_id", order_id);
        payload.insert("msisdn", msisdn);

        let signed = SignedRequest {
            headers: signer.sign(&payload, &Utc::now().fixed_offset()),
            payload,
        };

        self.dispatch(Method::POST, WALLET_PAYMENT, &signed).await?;
        info!("Selcom wallet push sent: order_id={}", order_id);
        Ok(())
    }
}

#[async_trait]
impl PaymentProvider for SelcomProvider {
    async fn initiate_payment(&self, request: PaymentRequest) -> AppResult<PaymentResponse> {
        request.validate()?;
        let provider = self.router.route(&request.phone)?;
        let signer = self.signer()?;

        info!(
            "Initiating Selcom payment: order_id={} amount={} provider={}",
            request.order_id, request.amount, provider
        );

        let signed =
            signer.build_signed_request(&request, &self.config.urls, &Utc::now().fixed_offset())?;
        let response = self.dispatch(Method::POST, CREATE_ORDER, &signed).await?;

        let order = response.first_data::<CreateOrderData>();
        let payment_url = order
            .as_ref()
            .and_then(|data| data.payment_gateway_url.as_deref())
            .map(decode_gateway_url);

        info!(
            "Selcom order created: order_id={} reference={:?}",
            request.order_id, response.reference
        );

        let wallet_push_sent = if self.config.wallet_push {
            match self.request_wallet_push(&request.order_id, &request.phone).await {
                Ok(()) => true,
                Err(e) => {
                    // the order exists; the buyer can still pay through the payment page
                    warn!(
                        "Wallet push failed for order {}: {}",
                        request.order_id, e
                    );
                    false
                }
            }
        } else {
            false
        };

        Ok(PaymentResponse {
            order_id: request.order_id,
            reference: response.reference,
            provider,
            payment_url,
            wallet_push_sent,
            provider_data: Some(response.data),
        })
    }

    async fn query_status(&self, order_id: &str) -> AppResult<PaymentStatus> {
        info!("Querying Selcom order status: order_id={}", order_id);

        let payload: SignedPayload = [("order_id", order_id)].into_iter().collect();
        let response = self
            .dispatch_with_retry(Method::GET, ORDER_STATUS, &payload)
            .await?;

        let status = match response.first_data::<OrderStatusData>() {
            Some(data) => {
                debug!(
                    "Selcom order {} payment_status={}",
                    order_id, data.payment_status
                );
                match data.payment_status.to_uppercase().as_str() {
                    "COMPLETED" => PaymentStatus::Success {
                        transaction_id: data.transid,
                        amount: data.amount.map(|v| json_scalar(&v)),
                        channel: data.channel,
                    },
                    "PENDING" | "INPROGRESS" => PaymentStatus::Pending,
                    "CANCELLED" | "USERCANCELLED" | "REJECTED" | "FAILED" => {
                        PaymentStatus::Failed {
                            reason: Some(data.payment_status),
                        }
                    }
                    _ => PaymentStatus::Unknown,
                }
            }
            None => PaymentStatus::Unknown,
        };

        Ok(status)
    }

    fn validate_webhook_signature(&self, payload: &[u8], signature: &str) -> bool {
        self.verifier.verify_body(payload, signature)
    }

    fn webhook_configured(&self) -> bool {
        self.verifier.is_configured()
    }

    fn is_configured(&self) -> bool {
        self.signer.is_some()
    }
}

/// `base * 2^attempt`, saturating instead of overflowing
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt))
}

/// The gateway returns the hosted page URL base64-encoded
fn decode_gateway_url(raw: &str) -> String {
    STANDARD
        .decode(raw)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .filter(|url| url.starts_with("http"))
        .unwrap_or_else(|| raw.to_string())
}

fn json_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// Selcom API response envelope
#[derive(Debug, Deserialize)]
struct SelcomResponse {
    #[serde(default)]
    reference: Option<String>,
    resultcode: String,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

impl SelcomResponse {
    fn first_data<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        let first = match &self.data {
            serde_json::Value::Array(items) => items.first()?.clone(),
            serde_json::Value::Object(_) => self.data.clone(),
            _ => return None,
        };
        serde_json::from_value(first).ok()
    }
}

// Create order response data
#[derive(Debug, Deserialize)]
struct CreateOrderData {
    #[serde(default)]
    payment_gateway_url: Option<String>,
}

// Order status response data
#[derive(Debug, Deserialize)]
struct OrderStatusData {
    payment_status: String,
    #[serde(default)]
    transid: Option<String>,
    #[serde(default)]
    amount: Option<serde_json::Value>,
    #[serde(default)]
    channel: Option<String>,
}
