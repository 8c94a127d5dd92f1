//! Webhook signature verification
//!
//! The gateway signs each callback with `hex(HMAC-SHA256(secret, body))` and
//! sends it in the `x-selcom-signature` header. Verification is a predicate:
//! it never errors, and any malformed input is simply "not verified".

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-selcom-signature";

/// Hex HMAC-SHA256 of raw bytes
pub fn sign_body(body: &[u8], secret: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Hex HMAC-SHA256 of the JSON serialisation of `payload`
pub fn sign(payload: &serde_json::Value, secret: &str) -> String {
    sign_body(payload.to_string().as_bytes(), secret)
}

/// Verify a signature over the exact request body
pub fn verify_body(body: &[u8], signature: &str, secret: &str) -> bool {
    if secret.is_empty() {
        tracing::error!("Webhook secret is empty, refusing to verify");
        return false;
    }

    let provided = match hex::decode(signature.trim()) {
        Ok(bytes) if !bytes.is_empty() => bytes,
        _ => return false,
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    expected.as_slice().ct_eq(provided.as_slice()).into()
}

/// Verify a signature over the JSON serialisation of `payload`
pub fn verify(payload: &serde_json::Value, signature: &str, secret: &str) -> bool {
    verify_body(payload.to_string().as_bytes(), signature, secret)
}

/// Holds the shared webhook secret; absent when the service is not configured
#[derive(Clone, Default)]
pub struct WebhookVerifier {
    secret: Option<String>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn verify_body(&self, body: &[u8], signature: &str) -> bool {
        match &self.secret {
            Some(secret) => verify_body(body, signature, secret),
            None => false,
        }
    }
}
