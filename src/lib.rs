//! Selcom mobile-money checkout service
//!
//! Signs checkout requests for the Selcom gateway, routes Tanzanian phone
//! numbers to their mobile-money provider, verifies payment webhooks and
//! settles storefront orders exactly once.

pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod notifications;
pub mod payments;

#[cfg(feature = "cache")]
pub mod cache;
#[cfg(feature = "database")]
pub mod database;
