use anyhow::{Context, Result};
use selcom_gateway::{
    api::{self, health::HealthProbes, AppState},
    config::Config,
    middleware::{CounterStore, InMemoryCounterStore, RateLimiter},
    notifications::{whatsapp, LogNotifier, Notifier, WhatsAppConfig, WhatsAppNotifier},
    payments::{
        InMemoryLedger, InMemoryOrderStore, OrderStore, PaymentProvider, ProviderRouter,
        SelcomProvider, TransactionLedger, WebhookProcessor,
    },
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

struct Stores {
    orders: Arc<dyn OrderStore>,
    ledger: Arc<dyn TransactionLedger>,
    counters: Arc<dyn CounterStore>,
    probes: HealthProbes,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;

    init_tracing(config.server.is_production());

    info!("Starting Selcom gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {}", config.server.environment);
    info!("Selcom base URL: {}", config.selcom.base_url);

    let stores = build_stores(&config).await?;
    let notifier = build_notifier(&config)?;

    let selcom = SelcomProvider::new(config.selcom.clone())?;
    if !selcom.webhook_configured() {
        warn!("No webhook secret configured; webhooks will be refused");
    }
    let router: ProviderRouter = *selcom.router();

    let processor = Arc::new(WebhookProcessor::new(
        stores.orders.clone(),
        stores.ledger.clone(),
        notifier,
    ));

    let state = AppState {
        environment: config.server.environment.clone(),
        provider: Arc::new(selcom),
        router,
        orders: stores.orders,
        processor,
        probes: stores.probes,
    };

    let rate_limiter = (config.rate_limit.per_minute > 0)
        .then(|| {
            RateLimiter::per_minute(stores.counters, config.rate_limit.per_minute)
                .trust_forwarded(config.rate_limit.trust_proxy)
        });

    let app = api::app(state, rate_limiter);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_notifier(config: &Config) -> Result<Arc<dyn Notifier>> {
    match &config.whatsapp {
        Some(settings) => {
            let notifier = WhatsAppNotifier::new(WhatsAppConfig {
                access_token: settings.access_token.clone(),
                phone_number_id: settings.phone_number_id.clone(),
                api_url: settings
                    .api_url
                    .clone()
                    .unwrap_or_else(|| whatsapp::DEFAULT_API_URL.to_string()),
                timeout_secs: config.selcom.timeout_secs,
            })?;
            info!("WhatsApp payment confirmations enabled");
            Ok(Arc::new(notifier))
        }
        None => {
            info!("WhatsApp not configured; confirmations are logged only");
            Ok(Arc::new(LogNotifier))
        }
    }
}

async fn build_stores(config: &Config) -> Result<Stores> {
    let mut stores = Stores {
        orders: Arc::new(InMemoryOrderStore::new()),
        ledger: Arc::new(InMemoryLedger::new()),
        counters: Arc::new(InMemoryCounterStore::new()),
        probes: HealthProbes::default(),
    };

    #[cfg(feature = "cache")]
    let redis_cache = match &config.redis {
        Some(redis) => {
            use selcom_gateway::cache::{self, CacheConfig, RedisCache, RedisTransactionLedger};
            use selcom_gateway::middleware::RedisCounterStore;

            let pool = cache::init_cache_pool(CacheConfig {
                redis_url: redis.url.clone(),
                ..Default::default()
            })
            .await?;
            let redis_cache = RedisCache::new(pool.clone());
            stores.ledger = Arc::new(RedisTransactionLedger::new(redis_cache.clone()));
            stores.counters = Arc::new(RedisCounterStore::new(redis_cache.clone()));
            stores.probes.cache = Some(pool);
            Some(redis_cache)
        }
        None => None,
    };
    #[cfg(not(feature = "cache"))]
    if config.redis.is_some() {
        warn!("REDIS_URL is set but the cache feature is disabled");
    }

    #[cfg(feature = "database")]
    match &config.database {
        Some(database) => {
            use selcom_gateway::database::{
                self, PgOrderStore, PgTransactionLedger, PoolConfig,
            };

            let pool = database::init_pool(
                &database.url,
                Some(PoolConfig {
                    max_connections: database.max_connections,
                    ..Default::default()
                }),
            )
            .await?;
            database::run_migrations(&pool).await?;

            #[allow(unused_mut)]
            let mut orders = PgOrderStore::new(pool.clone());
            #[cfg(feature = "cache")]
            if let Some(redis_cache) = redis_cache {
                orders.enable_cache(redis_cache);
            }

            stores.orders = Arc::new(orders);
            // the ledger shares the database with the orders it guards
            stores.ledger = Arc::new(PgTransactionLedger::new(pool.clone()));
            stores.probes.database = Some(pool);
        }
        None => warn!("DATABASE_URL not set; orders are kept in memory and lost on restart"),
    }
    #[cfg(not(feature = "database"))]
    if config.database.is_some() {
        warn!("DATABASE_URL is set but the database feature is disabled");
    }

    Ok(stores)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down gracefully...");
}
