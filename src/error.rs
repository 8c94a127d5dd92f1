//! Application error types
//!
//! `AppError` is the error every service-level operation returns. It wraps an
//! [`AppErrorKind`] and an optional context string, and knows how to render
//! itself as an HTTP response without leaking internal detail.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Result type for service operations
pub type AppResult<T> = Result<T, AppError>;

/// Input rejected before any work was done
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} is required")]
    MissingField { field: String },

    #[error("{field} is invalid: {message}")]
    InvalidField { field: String, message: String },

    #[error("amount must be greater than zero, got {amount}")]
    InvalidAmount { amount: String },
}

/// Business-rule failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("order '{order_id}' not found")]
    OrderNotFound { order_id: String },

    #[error("order '{order_id}' already exists with status {status}")]
    OrderAlreadyExists { order_id: String, status: String },

    #[error("cannot move order payment from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("no mobile-money provider for phone '{phone}'")]
    UnknownProvider { phone: String },
}

/// Failures talking to services outside this process
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExternalError {
    #[error("{provider} error: {message}")]
    PaymentProvider {
        provider: String,
        message: String,
        is_retryable: bool,
    },

    #[error("{service} rate limit exceeded")]
    RateLimit {
        service: String,
        retry_after: Option<u64>,
    },

    #[error("{service} request timed out")]
    Timeout { service: String },

    #[error("messaging error: {message}")]
    Messaging { message: String },
}

/// Failures of our own infrastructure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InfrastructureError {
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("{component} is not configured")]
    NotConfigured { component: String },

    #[error("database error: {message}")]
    Database { message: String, is_retryable: bool },

    #[error("cache error: {message}")]
    Cache { message: String },

    #[error("serialization error: {message}")]
    Serialization { message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppErrorKind {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    External(#[from] ExternalError),
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    pub fn with_context<S: Into<String>>(mut self, context: S) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn not_configured(component: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::NotConfigured {
                component: component.into(),
            },
        ))
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: message.into(),
            },
        ))
    }

    pub fn payment_provider(message: impl Into<String>, is_retryable: bool) -> Self {
        Self::new(AppErrorKind::External(ExternalError::PaymentProvider {
            provider: "Selcom".to_string(),
            message: message.into(),
            is_retryable,
        }))
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::External(ExternalError::PaymentProvider { is_retryable, .. }) => {
                *is_retryable
            }
            AppErrorKind::External(ExternalError::RateLimit { .. })
            | AppErrorKind::External(ExternalError::Timeout { .. }) => true,
            AppErrorKind::Infrastructure(InfrastructureError::Database { is_retryable, .. }) => {
                *is_retryable
            }
            _ => false,
        }
    }

    pub fn is_not_configured(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Infrastructure(InfrastructureError::NotConfigured { .. })
        )
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.kind {
            AppErrorKind::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppErrorKind::Domain(DomainError::OrderNotFound { .. }) => {
                (StatusCode::NOT_FOUND, "ORDER_NOT_FOUND")
            }
            AppErrorKind::Domain(DomainError::OrderAlreadyExists { .. }) => {
                (StatusCode::CONFLICT, "ORDER_EXISTS")
            }
            AppErrorKind::Domain(DomainError::InvalidTransition { .. }) => {
                (StatusCode::CONFLICT, "INVALID_TRANSITION")
            }
            AppErrorKind::Domain(DomainError::UnknownProvider { .. }) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "UNKNOWN_PROVIDER")
            }
            AppErrorKind::External(ExternalError::RateLimit { .. }) => {
                (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED")
            }
            AppErrorKind::External(_) => (StatusCode::BAD_GATEWAY, "PAYMENT_GATEWAY_ERROR"),
            AppErrorKind::Infrastructure(InfrastructureError::NotConfigured { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "NOT_CONFIGURED")
            }
            AppErrorKind::Infrastructure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        }
    }

    /// Message safe to show to an HTTP caller
    pub fn public_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Validation(e) => e.to_string(),
            AppErrorKind::Domain(e) => e.to_string(),
            AppErrorKind::External(ExternalError::RateLimit { .. }) => {
                "Too many requests. Please try again later".to_string()
            }
            AppErrorKind::External(_) => {
                "Payment could not be initiated. Please try again".to_string()
            }
            AppErrorKind::Infrastructure(InfrastructureError::NotConfigured { .. }) => {
                "Payments are temporarily unavailable".to_string()
            }
            AppErrorKind::Infrastructure(_) => "Internal server error".to_string(),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.kind, context),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for AppError {}

impl From<AppErrorKind> for AppError {
    fn from(kind: AppErrorKind) -> Self {
        AppError::new(kind)
    }
}

macro_rules! impl_from_kind {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for AppError {
                fn from(err: $source) -> Self {
                    AppError::new(AppErrorKind::from(err))
                }
            }
        )*
    };
}

impl_from_kind!(ValidationError, DomainError, ExternalError, InfrastructureError);

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Serialization {
                message: err.to_string(),
            },
        ))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            AppErrorKind::External(ExternalError::Timeout {
                service: "Selcom".to_string(),
            })
        } else {
            AppErrorKind::External(ExternalError::PaymentProvider {
                provider: "Selcom".to_string(),
                message: format!("Request error: {}", err),
                is_retryable: err.is_connect(),
            })
        };
        AppError::new(kind)
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub error_code: String,
    pub timestamp: chrono::DateTime<Utc>,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status, error_code) = self.status_and_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = error_code,
                request_id = %request_id,
                "Request failed"
            );
        } else {
            tracing::warn!(
                error = %self,
                error_code = error_code,
                request_id = %request_id,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            success: false,
            error: self.public_message(),
            error_code: error_code.to_string(),
            timestamp: Utc::now(),
            request_id,
        };

        (status, Json(body)).into_response()
    }
}
