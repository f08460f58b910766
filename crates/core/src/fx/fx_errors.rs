//! Errors specific to the exchange-rate subsystem, rolled into the crate's
//! root `Error` via `#[from]`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FxError {
    #[error("rate store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("no conversion rate available for {from}->{to}")]
    RateNotFound { from: String, to: String },

    #[error("invalid currency pair: {from}->{to}")]
    InvalidCurrencyPair { from: String, to: String },

    #[error("currency '{0}' is not in the configured set")]
    UnsupportedCurrency(String),

    #[error("invalid rate {rate} for {from}->{to}: must be > 0")]
    InvalidRate {
        from: String,
        to: String,
        rate: String,
    },

    #[error("cache error: {0}")]
    Cache(String),

    #[error("migration failure: {0}")]
    Migration(String),
}
