//! Tanzanian phone number normalisation and mobile-money provider routing

use crate::error::{AppError, DomainError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

const COUNTRY_CODE: &str = "255";

static MSISDN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^255[0-9]{9}$").expect("valid MSISDN pattern"));

/// Mobile-money networks reachable through the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "MPESA")]
    MPesa,
    #[serde(rename = "TIGOPESA")]
    TigoPesa,
    #[serde(rename = "AIRTELMONEY")]
    AirtelMoney,
    #[serde(rename = "HALOPESA")]
    HaloPesa,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::MPesa => "MPESA",
            Provider::TigoPesa => "TIGOPESA",
            Provider::AirtelMoney => "AIRTELMONEY",
            Provider::HaloPesa => "HALOPESA",
        }
    }

    /// Network prefixes (two digits after the country code) owned by the provider
    pub fn prefixes(&self) -> &'static [&'static str] {
        match self {
            Provider::MPesa => &["74", "75", "76"],
            Provider::TigoPesa => &["71", "65", "67"],
            Provider::AirtelMoney => &["68", "69", "78"],
            Provider::HaloPesa => &["62"],
        }
    }

    const ALL: [Provider; 4] = [
        Provider::MPesa,
        Provider::TigoPesa,
        Provider::AirtelMoney,
        Provider::HaloPesa,
    ];
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = PhoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().replace(['-', '_', ' '], "").as_str() {
            "MPESA" => Ok(Provider::MPesa),
            "TIGOPESA" => Ok(Provider::TigoPesa),
            "AIRTELMONEY" => Ok(Provider::AirtelMoney),
            "HALOPESA" => Ok(Provider::HaloPesa),
            _ => Err(PhoneError::UnknownProviderName(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,

    #[error("'{0}' is not a valid Tanzanian mobile number")]
    Invalid(String),

    #[error("no provider serves '{0}'")]
    UnknownProvider(String),

    #[error("unknown provider name '{0}'")]
    UnknownProviderName(String),
}

impl From<PhoneError> for AppError {
    fn from(err: PhoneError) -> Self {
        match err {
            PhoneError::UnknownProvider(phone) => DomainError::UnknownProvider { phone }.into(),
            other => ValidationError::InvalidField {
                field: "phone".to_string(),
                message: other.to_string(),
            }
            .into(),
        }
    }
}

/// Normalise a local or international number to `255XXXXXXXXX`
///
/// Spaces, dashes, dots and parentheses are stripped; a leading `+255` or `0`
/// becomes `255`.
pub fn normalize_phone(phone: &str) -> Result<String, PhoneError> {
    let cleaned: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')' | '\t'))
        .collect();

    if cleaned.is_empty() {
        return Err(PhoneError::Empty);
    }

    let normalized = if let Some(rest) = cleaned.strip_prefix('+') {
        rest.to_string()
    } else if let Some(rest) = cleaned.strip_prefix('0') {
        format!("{}{}", COUNTRY_CODE, rest)
    } else {
        cleaned
    };

    if !MSISDN.is_match(&normalized) {
        return Err(PhoneError::Invalid(phone.to_string()));
    }

    Ok(normalized)
}

/// Look up the provider for a phone number by its network prefix
///
/// Returns `Ok(None)` for a well-formed number whose prefix is not in the table.
pub fn detect_provider(phone: &str) -> Result<Option<Provider>, PhoneError> {
    let normalized = normalize_phone(phone)?;
    let prefix = &normalized[COUNTRY_CODE.len()..COUNTRY_CODE.len() + 2];

    Ok(Provider::ALL
        .into_iter()
        .find(|provider| provider.prefixes().contains(&prefix)))
}

/// Routes phone numbers to providers, with an explicit policy for unknown prefixes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderRouter {
    fallback: Option<Provider>,
}

impl ProviderRouter {
    pub fn new(fallback: Option<Provider>) -> Self {
        Self { fallback }
    }

    pub fn fallback(&self) -> Option<Provider> {
        self.fallback
    }

    pub fn route(&self, phone: &str) -> Result<Provider, PhoneError> {
        match detect_provider(phone)? {
            Some(provider) => Ok(provider),
            None => match self.fallback {
                Some(provider) => {
                    tracing::warn!(
                        fallback = %provider,
                        "Unrecognised phone prefix, routing to fallback provider"
                    );
                    Ok(provider)
                }
                None => Err(PhoneError::UnknownProvider(phone.to_string())),
            },
        }
    }
}
