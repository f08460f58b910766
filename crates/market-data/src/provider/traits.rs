//! Rate provider trait definition.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

use crate::errors::MarketDataError;

/// Rate limiting configuration advertised by a provider.
#[derive(Clone, Copy, Debug)]
pub struct RateLimit {
    pub requests_per_minute: u32,
    pub max_concurrency: u32,
    pub min_delay: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            max_concurrency: 2,
            min_delay: Duration::from_millis(200),
        }
    }
}

/// Trait for an external currency rate provider.
///
/// Implement this trait to add support for a new rate source. The core's
/// Conversion Engine and Daily Refresh Loop consume it through this
/// provider-agnostic interface; they never depend on a specific HTTP shape.
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Unique identifier for this provider, used in logs and error messages.
    fn id(&self) -> &'static str;

    /// Rate limiting configuration to respect when calling this provider.
    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    /// Fetch current rates for `base`, covering at least `targets`.
    ///
    /// Returns a map of target currency code to rate (1 unit of `base` is
    /// worth `rate` units of the target). Targets the provider did not
    /// return are simply absent from the map; this is a partial result,
    /// not an error, unless the provider call itself failed.
    async fn get_latest_rates(
        &self,
        base: &str,
        targets: &[String],
    ) -> Result<HashMap<String, Decimal>, MarketDataError>;
}
