use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use super::AppState;

#[cfg(feature = "cache")]
use crate::cache::RedisPool;
#[cfg(feature = "database")]
use sqlx::PgPool;

/// Backends the health endpoint pings
#[derive(Clone, Default)]
pub struct HealthProbes {
    #[cfg(feature = "database")]
    pub database: Option<PgPool>,
    #[cfg(feature = "cache")]
    pub cache: Option<RedisPool>,
}

impl HealthProbes {
    async fn database_ok(&self) -> Option<bool> {
        #[cfg(feature = "database")]
        if let Some(pool) = &self.database {
            return Some(crate::database::health_check(pool).await.is_ok());
        }
        None
    }

    async fn cache_ok(&self) -> Option<bool> {
        #[cfg(feature = "cache")]
        if let Some(pool) = &self.cache {
            return Some(crate::cache::health_check(pool).await.is_ok());
        }
        None
    }
}

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub selcom_configured: bool,
    pub webhook_configured: bool,
    /// `None` when no database is configured
    pub database: Option<bool>,
    /// `None` when no cache is configured
    pub cache: Option<bool>,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let database = state.probes.database_ok().await;
    let cache = state.probes.cache_ok().await;

    let healthy = database != Some(false) && cache != Some(false);
    let (code, status) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let response = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.environment.clone(),
        selcom_configured: state.provider.is_configured(),
        webhook_configured: state.provider.webhook_configured(),
        database,
        cache,
    };

    (code, Json(response))
}
