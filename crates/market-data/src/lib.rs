//! External exchange-rate provider client.
//!
//! This crate provides a small HTTP client abstraction for fetching current
//! inter-currency rates from a single external provider. It is consumed by
//! the core crate's Daily Refresh Loop, Rate Capture Engine, and Conversion
//! Engine fallback chain; none of them depend on the provider's HTTP shape
//! directly.

pub mod errors;
pub mod provider;

pub use errors::{MarketDataError, RetryClass};
pub use provider::{HttpRateProvider, RateLimit, RateProvider};
