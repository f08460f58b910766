//! Shared environment-driven configuration for the exchange-rate subsystem.
//!
//! Both `apps/server` and `apps/migrator` embed a [`CoreConfig`] inside
//! their own binary-specific `Config`, following the teacher's
//! `Config::from_env()` pattern: `dotenvy::dotenv().ok()` followed by
//! `std::env::var(..).unwrap_or_else(..)` per field with typed parsing and
//! defaults.

use std::env;
use std::time::Duration;

use crate::errors::{Error, Result};
use crate::fx::currencies::{parse_currency_list, CurrencySet};

/// Configuration shared by every binary that touches the Rate Store,
/// Cache, or rate provider.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// `{base}`-templated URL for the external rate provider, e.g.
    /// `https://api.exchangerate.host/latest/{base}`.
    pub provider_endpoint_template: String,

    /// The configured currency set `S` plus its designated base currency.
    pub currencies: CurrencySet,

    /// The base set the Daily Refresh Loop queries directly (typically 2).
    pub refresh_bases: Vec<String>,

    /// Max entries held by the in-process cache before LRU eviction.
    pub cache_capacity: usize,

    /// Timeout applied to each provider HTTP call.
    pub provider_timeout: Duration,

    /// Window (days) used by the interpolated conversion fallback step.
    pub interpolation_window_days: i64,

    /// Window (days) used by the Migrator's tier-2 nearest-rate lookup.
    pub migration_nearest_window_days: i64,

    /// Filesystem path to the SQLite database.
    pub database_path: String,
}

impl CoreConfig {
    /// Loads configuration from the process environment, applying the
    /// same defaults documented in the deployment guide. Call
    /// `dotenvy::dotenv().ok()` before this in binary entry points.
    pub fn from_env() -> Result<Self> {
        let provider_endpoint_template = env::var("FXLEDGER_PROVIDER_ENDPOINT")
            .unwrap_or_else(|_| "https://api.exchangerate.host/latest/{base}".to_string());

        let currency_codes = env::var("FXLEDGER_CURRENCIES")
            .map(|raw| parse_currency_list(&raw))
            .unwrap_or_else(|_| {
                vec!["EUR".to_string(), "USD".to_string(), "GBP".to_string()]
            });

        let base_currency = env::var("FXLEDGER_BASE_CURRENCY").unwrap_or_else(|_| "EUR".to_string());

        let refresh_bases = env::var("FXLEDGER_REFRESH_BASES")
            .map(|raw| parse_currency_list(&raw))
            .unwrap_or_else(|_| vec![base_currency.clone(), "USD".to_string()]);

        let cache_capacity = parse_env_usize("FXLEDGER_CACHE_CAPACITY", 10_000)?;
        let provider_timeout_secs = parse_env_u64("FXLEDGER_PROVIDER_TIMEOUT_SECS", 5)?;
        let interpolation_window_days = parse_env_i64("FXLEDGER_INTERPOLATION_WINDOW_DAYS", 7)?;
        let migration_nearest_window_days =
            parse_env_i64("FXLEDGER_MIGRATION_NEAREST_WINDOW_DAYS", 30)?;

        let database_path =
            env::var("DATABASE_URL").unwrap_or_else(|_| "./fxledger.db".to_string());

        Ok(Self {
            provider_endpoint_template,
            currencies: CurrencySet::new(currency_codes, base_currency),
            refresh_bases,
            cache_capacity,
            provider_timeout: Duration::from_secs(provider_timeout_secs),
            interpolation_window_days,
            migration_nearest_window_days,
            database_path,
        })
    }
}

fn parse_env_usize(key: &str, default: usize) -> Result<usize> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidConfigValue(format!("{key}={raw} is not a valid usize"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidConfigValue(format!("{key}={raw} is not a valid u64"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_i64(key: &str, default: i64) -> Result<i64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| Error::InvalidConfigValue(format!("{key}={raw} is not a valid i64"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_defaults_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in [
            "FXLEDGER_PROVIDER_ENDPOINT",
            "FXLEDGER_CURRENCIES",
            "FXLEDGER_BASE_CURRENCY",
            "FXLEDGER_REFRESH_BASES",
            "FXLEDGER_CACHE_CAPACITY",
        ] {
            env::remove_var(key);
        }
        let config = CoreConfig::from_env().unwrap();
        assert_eq!(config.currencies.base(), "EUR");
        assert_eq!(config.cache_capacity, 10_000);
    }

    #[test]
    fn test_invalid_numeric_value_reports_config_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("FXLEDGER_CACHE_CAPACITY", "not-a-number");
        let result = CoreConfig::from_env();
        env::remove_var("FXLEDGER_CACHE_CAPACITY");
        assert!(result.is_err());
    }
}
