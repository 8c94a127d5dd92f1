pub mod rate_limit;

pub use rate_limit::{CounterStore, InMemoryCounterStore, RateLimitLayer, RateLimiter};

#[cfg(feature = "cache")]
pub use rate_limit::RedisCounterStore;
