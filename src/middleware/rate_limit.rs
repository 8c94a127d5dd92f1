//! Fixed-window rate limiting for the checkout endpoint
//!
//! Counters live in memory for a single instance or in Redis when several
//! instances share a limit. A counter store failure lets the request through.

use crate::error::AppResult;
use async_trait::async_trait;
use axum::{
    extract::ConnectInfo,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tower::{Layer, Service};
use tracing::warn;

/// Window counter storage
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one hit for `client` in `window` and return the new total
    async fn hit(&self, client: &str, window: u64, window_len: Duration) -> AppResult<u64>;
}

/// Process-local counters; stale windows are dropped as new ones start
#[derive(Default)]
pub struct InMemoryCounterStore {
    counters: Mutex<HashMap<String, (u64, u64)>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn hit(&self, client: &str, window: u64, _window_len: Duration) -> AppResult<u64> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters.retain(|_, (w, _)| *w >= window);

        let entry = counters.entry(client.to_string()).or_insert((window, 0));
        entry.1 += 1;
        Ok(entry.1)
    }
}

#[cfg(feature = "cache")]
pub use redis_store::RedisCounterStore;

#[cfg(feature = "cache")]
mod redis_store {
    use super::CounterStore;
    use crate::cache::{keys::rate_limit::WindowKey, Cache, RedisCache};
    use crate::error::AppResult;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Counters shared across instances through Redis `INCR`
    pub struct RedisCounterStore {
        cache: RedisCache,
    }

    impl RedisCounterStore {
        pub fn new(cache: RedisCache) -> Self {
            Self { cache }
        }
    }

    #[async_trait]
    impl CounterStore for RedisCounterStore {
        async fn hit(&self, client: &str, window: u64, window_len: Duration) -> AppResult<u64> {
            let key = WindowKey::new(client, window).to_string();
            let count = <RedisCache as Cache<i64>>::increment(&self.cache, &key, 1).await?;
            if count == 1 {
                <RedisCache as Cache<i64>>::expire(&self.cache, &key, window_len).await?;
            }
            Ok(count.max(0) as u64)
        }
    }
}

#[derive(Debug, Serialize)]
struct RateLimitResponse {
    success: bool,
    error: String,
    error_code: String,
    retry_after_secs: u64,
}

/// Shared limiter state
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u32,
    window: Duration,
    trust_forwarded: bool,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: u32, window: Duration) -> Self {
        Self {
            store,
            limit,
            window,
            trust_forwarded: false,
        }
    }

    /// Key clients by the hop a reverse proxy appended to `x-forwarded-for`
    /// instead of the socket peer
    pub fn trust_forwarded(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    pub fn per_minute(store: Arc<dyn CounterStore>, limit: u32) -> Self {
        Self::new(store, limit, Duration::from_secs(60))
    }

    /// Record a request; `Err(retry_after_secs)` when over the limit
    pub async fn check(&self, client: &str) -> Result<(), u64> {
        if self.limit == 0 {
            return Ok(());
        }

        let window_secs = self.window.as_secs().max(1);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let window = now / window_secs;

        match self.store.hit(client, window, self.window).await {
            Ok(count) if count > self.limit as u64 => Err(window_secs - now % window_secs),
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Rate limit store failed, allowing request: {}", e);
                Ok(())
            }
        }
    }
}

/// Rate limiting layer for Axum
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
}

impl RateLimitLayer {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: RateLimiter,
}

type BoxFuture<T, E> =
    std::pin::Pin<Box<dyn std::future::Future<Output = std::result::Result<T, E>> + Send>>;

impl<S, B> Service<Request<B>> for RateLimitService<S>
where
    S: Service<Request<B>, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> BoxFuture<Response, S::Error> {
        let limiter = self.limiter.clone();
        // take the service that was driven to readiness
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let client = client_key(&req, limiter.trust_forwarded);

            match limiter.check(&client).await {
                Ok(()) => inner.call(req).await,
                Err(retry_after) => {
                    warn!(client = %client, retry_after_secs = retry_after, "Rate limit exceeded");

                    let body = RateLimitResponse {
                        success: false,
                        error: "Too many requests. Please try again later".to_string(),
                        error_code: "RATE_LIMIT_EXCEEDED".to_string(),
                        retry_after_secs: retry_after,
                    };

                    Ok((
                        StatusCode::TOO_MANY_REQUESTS,
                        [("Retry-After", retry_after.to_string())],
                        Json(body),
                    )
                        .into_response())
                }
            }
        })
    }
}

/// Client identity for the counters
///
/// The socket peer wins unless a trusted proxy sits in front, in which case
/// the last `x-forwarded-for` hop (the one the proxy appended) is used. The
/// header is only read without a peer address, as in in-process tests.
fn client_key<B>(req: &Request<B>, trust_forwarded: bool) -> String {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let forwarded = || {
        req.headers()
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.rsplit(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
    };

    let ip = match (trust_forwarded, peer) {
        (true, peer) => forwarded().or(peer),
        (false, Some(peer)) => Some(peer),
        (false, None) => forwarded(),
    };

    format!("ip:{}", ip.as_deref().unwrap_or("unknown"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, routing::post, Router};
    use tower::ServiceExt;

    fn limiter(limit: u32) -> RateLimiter {
        RateLimiter::per_minute(Arc::new(InMemoryCounterStore::new()), limit)
    }

    #[tokio::test]
    async fn test_limit_per_client() {
        let limiter = limiter(2);
        assert!(limiter.check("ip:1").await.is_ok());
        assert!(limiter.check("ip:1").await.is_ok());
        let retry_after = limiter.check("ip:1").await.unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 60);
        assert!(limiter.check("ip:2").await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_disables() {
        let limiter = limiter(0);
        for _ in 0..100 {
            assert!(limiter.check("ip:1").await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_layer_returns_429() {
        let app = Router::new()
            .route("/checkout", post(|| async { "ok" }))
            .layer(RateLimitLayer::new(limiter(1)));

        let request = || {
            Request::builder()
                .method("POST")
                .uri("/checkout")
                .header("x-forwarded-for", "41.59.0.7")
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
    }

    fn from_peer(forwarded_for: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/checkout")
            .header("x-forwarded-for", forwarded_for)
            .extension(ConnectInfo(SocketAddr::from(([41, 59, 0, 7], 50000))))
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_rotating_forwarded_header_does_not_reset_count() {
        let app = Router::new()
            .route("/checkout", post(|| async { "ok" }))
            .layer(RateLimitLayer::new(limiter(2)));

        let mut statuses = Vec::new();
        for hop in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            statuses.push(app.clone().oneshot(from_peer(hop)).await.unwrap().status());
        }
        assert_eq!(
            statuses,
            vec![StatusCode::OK, StatusCode::OK, StatusCode::TOO_MANY_REQUESTS]
        );
    }

    #[test]
    fn test_client_key_sources() {
        let req = from_peer("198.51.100.9, 10.0.0.1");
        assert_eq!(client_key(&req, false), "ip:41.59.0.7");
        // behind a proxy the appended hop identifies the client
        assert_eq!(client_key(&req, true), "ip:10.0.0.1");

        let bare = Request::builder()
            .header("x-forwarded-for", "198.51.100.9")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_key(&bare, false), "ip:198.51.100.9");

        let nothing = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(client_key(&nothing, true), "ip:unknown");
    }
}
