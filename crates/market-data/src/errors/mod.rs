//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for rate provider operations
//! - [`RetryClass`]: Classification for determining retry behavior

mod retry;

pub use retry::RetryClass;

use thiserror::Error;

/// Errors that can occur while fetching rates from the external provider.
///
/// Each variant is classified into a [`RetryClass`] via the [`retry_class`](Self::retry_class)
/// method. The Conversion Engine's fallback chain (and the Daily Refresh Loop)
/// use this classification to decide whether to retry, skip to the next
/// fallback step, or give up for this cycle.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// The provider rate limited the request (HTTP 429).
    #[error("Rate limited by provider: {provider}")]
    RateLimited {
        /// The provider that rate limited the request.
        provider: String,
    },

    /// The request to the provider timed out.
    #[error("Timeout calling provider: {provider}")]
    Timeout {
        /// The provider that timed out.
        provider: String,
    },

    /// A provider-specific error occurred (non-2xx, unexpected body shape).
    #[error("Provider error: {provider} - {message}")]
    ProviderError {
        /// The provider that returned the error.
        provider: String,
        /// The error message from the provider.
        message: String,
    },

    /// The response was missing one or more requested target currencies.
    /// This is a partial failure: the caller receives the rates that were
    /// present and treats the missing ones as absent, not as a hard error.
    #[error("Provider {provider} response missing targets: {targets:?}")]
    MissingTargets {
        provider: String,
        targets: Vec<String>,
    },

    /// Data validation failed (non-positive rate, malformed number).
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    /// The requested operation is not supported by this provider
    /// (e.g. historical rates on a latest-only endpoint).
    #[error("Operation '{operation}' not supported by provider: {provider}")]
    NotSupported { operation: String, provider: String },

    /// A network error occurred while communicating with the provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::Never`]: the error is terminal for this cycle
    /// - [`RetryClass::WithBackoff`]: retry with exponential backoff
    /// - [`RetryClass::NextProvider`]: try the next provider in the chain
    /// - [`RetryClass::CircuitOpen`]: provider circuit is open, skip it
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { .. } | Self::Timeout { .. } => RetryClass::WithBackoff,
            Self::ProviderError { .. } => RetryClass::NextProvider,
            Self::MissingTargets { .. } | Self::ValidationFailed { .. } | Self::NotSupported { .. } => {
                RetryClass::Never
            }
            Self::Network(_) => RetryClass::WithBackoff,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_retries_with_backoff() {
        let error = MarketDataError::RateLimited {
            provider: "EXCHANGE_RATES_API".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    }

    #[test]
    fn test_timeout_retries_with_backoff() {
        let error = MarketDataError::Timeout {
            provider: "EXCHANGE_RATES_API".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::WithBackoff);
    }

    #[test]
    fn test_provider_error_tries_next_provider() {
        let error = MarketDataError::ProviderError {
            provider: "EXCHANGE_RATES_API".to_string(),
            message: "internal server error".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::NextProvider);
    }

    #[test]
    fn test_missing_targets_never_retries() {
        let error = MarketDataError::MissingTargets {
            provider: "EXCHANGE_RATES_API".to_string(),
            targets: vec!["ZAR".to_string()],
        };
        assert_eq!(error.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_validation_failed_never_retries() {
        let error = MarketDataError::ValidationFailed {
            message: "rate must be positive".to_string(),
        };
        assert_eq!(error.retry_class(), RetryClass::Never);
    }

    #[test]
    fn test_error_display() {
        let error = MarketDataError::ProviderError {
            provider: "EXCHANGE_RATES_API".to_string(),
            message: "API key invalid".to_string(),
        };
        assert_eq!(
            format!("{}", error),
            "Provider error: EXCHANGE_RATES_API - API key invalid"
        );
    }
}
