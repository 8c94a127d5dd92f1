//! Payment provider implementations
//!
//! Concrete implementations of the PaymentProvider trait.

pub mod selcom;

pub use selcom::{SelcomConfig, SelcomProvider};
