use crate::payments::phone::Provider;
use crate::payments::providers::SelcomConfig;
use crate::payments::signer::CheckoutUrls;
use anyhow::{anyhow, Context, Result};
use std::env;
use std::time::Duration;

/// Upper bound for `SELCOM_MAX_RETRIES`; the backoff doubles per attempt
pub const MAX_STATUS_RETRIES: u32 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub selcom: SelcomConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub whatsapp: Option<WhatsAppSettings>,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct WhatsAppSettings {
    pub access_token: String,
    pub phone_number_id: String,
    pub api_url: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Checkout requests allowed per client per minute; 0 disables the limiter
    pub per_minute: u32,
    /// Identify clients by `x-forwarded-for` because a reverse proxy sets it
    pub trust_proxy: bool,
}

impl ServerConfig {
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build the configuration from any variable source
    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // treat empty values as unset
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: var("PORT")
                .unwrap_or_else(|| "8080".to_string())
                .parse()
                .context("PORT must be a valid number")?,
            environment: var("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
        };

        let public_base_url = var("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://localhost:{}", server.port));
        let public_base_url = public_base_url.trim_end_matches('/');

        let urls = CheckoutUrls {
            redirect_url: var("SELCOM_REDIRECT_URL")
                .unwrap_or_else(|| format!("{}/checkout/success", public_base_url)),
            cancel_url: var("SELCOM_CANCEL_URL")
                .unwrap_or_else(|| format!("{}/checkout/cancel", public_base_url)),
            webhook_url: var("SELCOM_WEBHOOK_URL")
                .unwrap_or_else(|| format!("{}/payment/webhook", public_base_url)),
        };

        let api_secret = var("SELCOM_API_SECRET");
        let fallback_provider = var("SELCOM_FALLBACK_PROVIDER")
            .map(|name| {
                name.parse::<Provider>()
                    .map_err(|e| anyhow!("SELCOM_FALLBACK_PROVIDER: {}", e))
            })
            .transpose()?;

        let defaults = SelcomConfig::default();
        let selcom = SelcomConfig {
            api_key: var("SELCOM_API_KEY"),
            webhook_secret: var("SELCOM_WEBHOOK_SECRET").or_else(|| api_secret.clone()),
            api_secret,
            vendor_id: var("SELCOM_VENDOR_ID"),
            base_url: var("SELCOM_BASE_URL").unwrap_or(defaults.base_url),
            urls,
            timeout_secs: var("SELCOM_TIMEOUT_SECS")
                .map(|v| v.parse())
                .transpose()
                .context("SELCOM_TIMEOUT_SECS must be a valid number")?
                .unwrap_or(defaults.timeout_secs),
            max_retries: var("SELCOM_MAX_RETRIES")
                .map(|v| v.parse())
                .transpose()
                .context("SELCOM_MAX_RETRIES must be a valid number")?
                .unwrap_or(defaults.max_retries),
            retry_base_delay: Duration::from_secs(1),
            fallback_provider,
            wallet_push: var("SELCOM_WALLET_PUSH")
                .map(|v| parse_bool(&v))
                .transpose()
                .context("SELCOM_WALLET_PUSH must be true or false")?
                .unwrap_or(defaults.wallet_push),
        };

        let database = match var("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|| "20".to_string())
                    .parse()
                    .context("DATABASE_MAX_CONNECTIONS must be a valid number")?,
            }),
            None => None,
        };

        let redis = var("REDIS_URL").map(|url| RedisConfig { url });

        let whatsapp = match (var("WHATSAPP_ACCESS_TOKEN"), var("WHATSAPP_PHONE_NUMBER_ID")) {
            (Some(access_token), Some(phone_number_id)) => Some(WhatsAppSettings {
                access_token,
                phone_number_id,
                api_url: var("WHATSAPP_API_URL"),
            }),
            _ => None,
        };

        let rate_limit = RateLimitConfig {
            per_minute: var("RATE_LIMIT_PER_MINUTE")
                .unwrap_or_else(|| "30".to_string())
                .parse()
                .context("RATE_LIMIT_PER_MINUTE must be a valid number")?,
            trust_proxy: var("RATE_LIMIT_TRUST_PROXY")
                .map(|v| parse_bool(&v))
                .transpose()
                .context("RATE_LIMIT_TRUST_PROXY must be true or false")?
                .unwrap_or(false),
        };

        let config = Config {
            server,
            selcom,
            database,
            redis,
            whatsapp,
            rate_limit,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Validate port range
        if self.server.port < 1024 {
            return Err(anyhow!(
                "Port must be at least 1024, got {}",
                self.server.port
            ));
        }

        // Validate environment
        let valid_environments = ["development", "staging", "production"];
        if !valid_environments.contains(&self.server.environment.as_str()) {
            return Err(anyhow!(
                "Environment must be one of: {:?}, got {}",
                valid_environments,
                self.server.environment
            ));
        }

        // Gateway and callback URLs
        let urls = [
            ("SELCOM_BASE_URL", &self.selcom.base_url),
            ("SELCOM_REDIRECT_URL", &self.selcom.urls.redirect_url),
            ("SELCOM_CANCEL_URL", &self.selcom.urls.cancel_url),
            ("SELCOM_WEBHOOK_URL", &self.selcom.urls.webhook_url),
        ];
        for (name, url) in urls {
            if !is_http_url(url) {
                return Err(anyhow!("{} must be an http(s) URL, got {}", name, url));
            }
        }

        if self.selcom.timeout_secs == 0 {
            return Err(anyhow!("SELCOM_TIMEOUT_SECS must be greater than 0"));
        }

        if self.selcom.max_retries > MAX_STATUS_RETRIES {
            return Err(anyhow!(
                "SELCOM_MAX_RETRIES must be at most {}, got {}",
                MAX_STATUS_RETRIES,
                self.selcom.max_retries
            ));
        }

        if self.server.is_production() {
            let missing: Vec<&str> = [
                ("SELCOM_API_KEY", &self.selcom.api_key),
                ("SELCOM_API_SECRET", &self.selcom.api_secret),
                ("SELCOM_VENDOR_ID", &self.selcom.vendor_id),
            ]
            .into_iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name)
            .collect();
            if !missing.is_empty() {
                return Err(anyhow!(
                    "Selcom credentials are required in production, missing: {}",
                    missing.join(", ")
                ));
            }
        }

        // Validate database max connections
        if let Some(database) = &self.database {
            if database.max_connections == 0 {
                return Err(anyhow!("DATABASE_MAX_CONNECTIONS must be greater than 0"));
            }
        }

        if let Some(whatsapp) = &self.whatsapp {
            if let Some(url) = &whatsapp.api_url {
                if !is_http_url(url) {
                    return Err(anyhow!("WHATSAPP_API_URL must be an http(s) URL, got {}", url));
                }
            }
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("https://") || url.starts_with("http://")
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(anyhow!("invalid boolean '{}'", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.environment, "development");
        assert_eq!(config.selcom.base_url, "https://apigw.selcommobile.com/v1");
        assert_eq!(
            config.selcom.urls.webhook_url,
            "http://localhost:8080/payment/webhook"
        );
        assert!(config.selcom.api_key.is_none());
        assert!(config.selcom.wallet_push);
        assert!(config.database.is_none());
        assert!(config.redis.is_none());
        assert!(config.whatsapp.is_none());
        assert_eq!(config.rate_limit.per_minute, 30);
    }

    #[test]
    fn test_webhook_secret_falls_back_to_api_secret() {
        let config = load(&[("SELCOM_API_SECRET", "s3cret")]).unwrap();
        assert_eq!(config.selcom.webhook_secret.as_deref(), Some("s3cret"));

        let config = load(&[
            ("SELCOM_API_SECRET", "s3cret"),
            ("SELCOM_WEBHOOK_SECRET", "whsec"),
        ])
        .unwrap();
        assert_eq!(config.selcom.webhook_secret.as_deref(), Some("whsec"));
    }

    #[test]
    fn test_public_base_url_derives_callbacks() {
        let config = load(&[
            ("PUBLIC_BASE_URL", "https://shop.example.co.tz/"),
            ("SELCOM_CANCEL_URL", "https://shop.example.co.tz/cart"),
        ])
        .unwrap();
        assert_eq!(
            config.selcom.urls.redirect_url,
            "https://shop.example.co.tz/checkout/success"
        );
        assert_eq!(config.selcom.urls.cancel_url, "https://shop.example.co.tz/cart");
    }

    #[test]
    fn test_status_retries_are_bounded() {
        let config = load(&[("SELCOM_MAX_RETRIES", "10")]).unwrap();
        assert_eq!(config.selcom.max_retries, 10);
        assert!(load(&[("SELCOM_MAX_RETRIES", "11")]).is_err());
        assert!(load(&[("SELCOM_MAX_RETRIES", "40")]).is_err());
    }

    #[test]
    fn test_proxy_trust_is_opt_in() {
        assert!(!load(&[]).unwrap().rate_limit.trust_proxy);
        let config = load(&[("RATE_LIMIT_TRUST_PROXY", "true")]).unwrap();
        assert!(config.rate_limit.trust_proxy);
        assert!(load(&[("RATE_LIMIT_TRUST_PROXY", "maybe")]).is_err());
    }

    #[test]
    fn test_fallback_provider() {
        let config = load(&[("SELCOM_FALLBACK_PROVIDER", "mpesa")]).unwrap();
        assert_eq!(config.selcom.fallback_provider, Some(Provider::MPesa));
        assert!(load(&[("SELCOM_FALLBACK_PROVIDER", "VODA")]).is_err());
    }

    #[test]
    fn test_validation_failures() {
        assert!(load(&[("PORT", "80")]).is_err());
        assert!(load(&[("PORT", "abc")]).is_err());
        assert!(load(&[("ENVIRONMENT", "qa")]).is_err());
        assert!(load(&[("SELCOM_BASE_URL", "ftp://gateway")]).is_err());
        assert!(load(&[
            ("DATABASE_URL", "postgres://localhost/shop"),
            ("DATABASE_MAX_CONNECTIONS", "0")
        ])
        .is_err());
        assert!(load(&[("SELCOM_WALLET_PUSH", "maybe")]).is_err());
    }

    #[test]
    fn test_production_requires_credentials() {
        let err = load(&[("ENVIRONMENT", "production"), ("SELCOM_API_KEY", "k")]).unwrap_err();
        assert!(err.to_string().contains("SELCOM_VENDOR_ID"));

        let config = load(&[
            ("ENVIRONMENT", "production"),
            ("SELCOM_API_KEY", "k"),
            ("SELCOM_API_SECRET", "s"),
            ("SELCOM_VENDOR_ID", "TILL1"),
        ])
        .unwrap();
        assert!(config.server.is_production());
    }
}
