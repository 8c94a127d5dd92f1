//! Request signing for the Selcom gateway
//!
//! Every outbound request carries an HMAC-SHA256 digest over a canonical
//! string built from a timestamp and the sorted, non-null payload fields:
//!
//! ```text
//! timestamp=<ISO8601>&field1=value1&field2=value2...
//! ```
//!
//! The gateway recomputes the digest from the `Signed-Fields` header, so the
//! field set and ordering must be reproducible on both sides.

use crate::error::{AppError, AppResult};
use crate::payments::phone::normalize_phone;
use crate::payments::types::{PaymentRequest, CURRENCY};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, FixedOffset, SecondsFormat};
use hmac::{Hmac, Mac};
use http::{HeaderMap, HeaderName, HeaderValue};
use sha2::Sha256;
use std::collections::BTreeMap;

type HmacSha256 = Hmac<Sha256>;

pub const DIGEST_METHOD: &str = "HS256";

/// Callback URLs handed to the gateway with every order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutUrls {
    pub redirect_url: String,
    pub cancel_url: String,
    pub webhook_url: String,
}

/// Sorted key/value payload; absent values are never inserted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignedPayload {
    fields: BTreeMap<String, String>,
}

impl SignedPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn insert_opt(&mut self, key: impl Into<String>, value: Option<impl Into<String>>) {
        if let Some(value) = value {
            self.insert(key, value);
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Field names in signing order
    pub fn signed_fields(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SignedPayload {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Authentication headers for one signed request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub digest_method: String,
    pub digest: String,
    pub timestamp: String,
    pub signed_fields: String,
}

impl SignedHeaders {
    pub fn to_header_map(&self) -> AppResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in [
            ("authorization", &self.authorization),
            ("digest-method", &self.digest_method),
            ("digest", &self.digest),
            ("timestamp", &self.timestamp),
            ("signed-fields", &self.signed_fields),
        ] {
            let value = HeaderValue::from_str(value).map_err(|e| {
                AppError::configuration(format!("Invalid value for header {}: {}", name, e))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }
}

#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub payload: SignedPayload,
    pub headers: SignedHeaders,
}

/// Render a timestamp the way the gateway expects it, e.g. `2024-05-01T10:00:00+03:00`
pub fn format_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Build `timestamp=<ts>&k1=v1&k2=v2...` with keys in ascending order
pub fn canonical_string(timestamp: &str, payload: &SignedPayload) -> String {
    let mut canonical = format!("timestamp={}", timestamp);
    for (key, value) in payload.fields() {
        canonical.push('&');
        canonical.push_str(key);
        canonical.push('=');
        canonical.push_str(value);
    }
    canonical
}

/// Signs gateway requests with the vendor's API credentials
///
/// Can only be constructed with a complete set of credentials; a service
/// without them holds no signer and reports "not configured" instead.
#[derive(Clone)]
pub struct RequestSigner {
    api_key: String,
    api_secret: String,
    vendor: String,
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("vendor", &self.vendor)
            .finish()
    }
}

impl RequestSigner {
    pub fn new(
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
        vendor: impl Into<String>,
    ) -> AppResult<Self> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        let vendor = vendor.into();

        if api_key.trim().is_empty() || api_secret.is_empty() || vendor.trim().is_empty() {
            return Err(AppError::not_configured("Selcom request signer"));
        }

        Ok(Self {
            api_key,
            api_secret,
            vendor,
        })
    }

    /// Build a signer from optional credentials, `None` when any is missing
    pub fn from_parts(
        api_key: Option<&str>,
        api_secret: Option<&str>,
        vendor: Option<&str>,
    ) -> Option<Self> {
        match (api_key, api_secret, vendor) {
            (Some(key), Some(secret), Some(vendor)) => Self::new(key, secret, vendor).ok(),
            _ => None,
        }
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Base64 HMAC-SHA256 over the canonical string
    pub fn digest(&self, timestamp: &str, payload: &SignedPayload) -> String {
        let canonical = canonical_string(timestamp, payload);
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(canonical.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Sign an arbitrary payload at the given instant
    pub fn sign(&self, payload: &SignedPayload, timestamp: &DateTime<FixedOffset>) -> SignedHeaders {
        let timestamp = format_timestamp(timestamp);
        SignedHeaders {
            authorization: format!("SELCOM {}", self.api_key),
            digest_method: DIGEST_METHOD.to_string(),
            digest: self.digest(&timestamp, payload),
            timestamp,
            signed_fields: payload.signed_fields().join(","),
        }
    }

    /// Build and sign a minimal checkout order for `request`
    pub fn build_signed_request(
        &self,
        request: &PaymentRequest,
        urls: &CheckoutUrls,
        timestamp: &DateTime<FixedOffset>,
    ) -> AppResult<SignedRequest> {
        request.validate()?;
        let buyer_phone = normalize_phone(&request.phone)?;

        let mut payload = SignedPayload::new();
        payload.insert("vendor", self.vendor.as_str());
        payload.insert("order_id", request.order_id.trim());
        payload.insert_opt("buyer_email", request.email.as_deref());
        payload.insert_opt("buyer_name", request.customer_name.as_deref());
        payload.insert("buyer_phone", buyer_phone);
        payload.insert("amount", request.amount.normalize().to_string());
        payload.insert("currency", CURRENCY);
        payload.insert("redirect_url", urls.redirect_url.as_str());
        payload.insert("cancel_url", urls.cancel_url.as_str());
        payload.insert("webhook", urls.webhook_url.as_str());

        let headers = self.sign(&payload, timestamp);
        Ok(SignedRequest { payload, headers })
    }
}
