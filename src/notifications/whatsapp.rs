//! WhatsApp Cloud API notifier

use super::{confirmation_message, Notifier};
use crate::error::{AppError, AppResult, ExternalError};
use crate::payments::orders::Order;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_API_URL: &str = "https://graph.facebook.com/v19.0";

#[derive(Debug, Clone)]
pub struct WhatsAppConfig {
    pub access_token: String,
    pub phone_number_id: String,
    pub api_url: String,
    pub timeout_secs: u64,
}

pub struct WhatsAppNotifier {
    config: WhatsAppConfig,
    client: Client,
}

#[derive(Serialize)]
struct TextMessage<'a> {
    messaging_product: &'static str,
    to: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    text: TextBody,
}

#[derive(Serialize)]
struct TextBody {
    body: String,
}

impl WhatsAppNotifier {
    pub fn new(config: WhatsAppConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub async fn send_text(&self, to: &str, body: String) -> AppResult<()> {
        let url = format!(
            "{}/{}/messages",
            self.config.api_url.trim_end_matches('/'),
            self.config.phone_number_id
        );
        let message = TextMessage {
            messaging_product: "whatsapp",
            to,
            kind: "text",
            text: TextBody { body },
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&message)
            .send()
            .await
            .map_err(|e| {
                AppError::from(ExternalError::Messaging {
                    message: format!("WhatsApp request failed: {}", e),
                })
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!("WhatsApp API returned HTTP {}: {}", status, text);
            return Err(ExternalError::Messaging {
                message: format!("WhatsApp API returned HTTP {}", status),
            }
            .into());
        }

        info!("WhatsApp message sent to {}", to);
        Ok(())
    }
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    async fn payment_confirmed(&self, order: &Order) -> AppResult<()> {
        self.send_text(&order.phone, confirmation_message(order)).await
    }
}
