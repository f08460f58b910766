//! Rate Capture Engine: freezes, for one expense, the rates needed to
//! reconstruct all plausible later conversions.
//!
//! Triggered from `DomainEvent::ExpenseCreated` / `DomainEvent::ExpenseDateChanged`
//! handlers (see `crate::events`); never blocks or fails the enclosing
//! Expense write. A failed or partial capture only means the expense's
//! frozen rates lag until the next retry.

use std::sync::Arc;

use log::warn;
use rust_decimal::Decimal;

use crate::errors::Result;
use crate::fx::cache::{Cache, CacheKeyType};
use crate::fx::currencies::CurrencySet;
use crate::fx::rate_store::{RatePair, RateStoreTrait};
use fxledger_market_data::RateProvider;

/// Freezes rates for one expense across every ordered pair in the configured
/// currency set.
pub struct CaptureEngine {
    store: Arc<dyn RateStoreTrait>,
    provider: Arc<dyn RateProvider>,
    cache: Arc<Cache>,
    currencies: CurrencySet,
}

/// Outcome of one capture attempt, surfaced for logging/metrics at the
/// caller's discretion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOutcome {
    pub pairs_captured: usize,
    pub pairs_failed: usize,
}

impl CaptureEngine {
    pub fn new(
        store: Arc<dyn RateStoreTrait>,
        provider: Arc<dyn RateProvider>,
        cache: Arc<Cache>,
        currencies: CurrencySet,
    ) -> Self {
        Self {
            store,
            provider,
            cache,
            currencies,
        }
    }

    /// Runs the capture algorithm for `expense_id`. Never returns an error
    /// that should propagate to the Expense write path; callers that want
    /// to surface capture failure as a domain event should log the
    /// returned `CaptureOutcome` themselves.
    pub async fn capture(&self, expense_id: i64) -> Result<CaptureOutcome> {
        let mut batch: Vec<RatePair> = Vec::new();
        let mut pairs_failed = 0usize;

        for (from, to) in self.currencies.ordered_pairs() {
            match self.current_rate(&from, &to).await {
                Ok(rate) => batch.push((from, to, rate)),
                Err(err) => {
                    pairs_failed += 1;
                    warn!(
                        "capture: skipping pair {}->{} for expense {}: {}",
                        from, to, expense_id, err
                    );
                }
            }
        }

        if batch.is_empty() {
            warn!(
                "capture: no rates captured for expense {} ({} pairs attempted)",
                expense_id, pairs_failed
            );
            return Ok(CaptureOutcome {
                pairs_captured: 0,
                pairs_failed,
            });
        }

        let pairs_captured = batch.len();
        self.store.put_frozen(expense_id, &batch).await?;

        Ok(CaptureOutcome {
            pairs_captured,
            pairs_failed,
        })
    }

    /// The current-rate lookup shared with the Conversion Engine and Daily
    /// Refresh Loop: cache first, provider on miss.
    async fn current_rate(&self, from: &str, to: &str) -> Result<Decimal> {
        let key = format!("{}:{}", from, to);
        let provider = Arc::clone(&self.provider);
        let from_owned = from.to_string();
        let to_owned = to.to_string();

        self.cache
            .get_or_compute(CacheKeyType::CurrentRate, &key, move || {
                let provider = Arc::clone(&provider);
                let from_owned = from_owned.clone();
                let to_owned = to_owned.clone();
                async move {
                    let rates = provider
                        .get_latest_rates(&from_owned, &[to_owned.clone()])
                        .await?;
                    rates
                        .get(&to_owned)
                        .copied()
                        .ok_or_else(|| {
                            crate::errors::Error::Fx(crate::fx::FxError::RateNotFound {
                                from: from_owned.clone(),
                                to: to_owned.clone(),
                            })
                        })
                }
            })
            .await
    }
}
