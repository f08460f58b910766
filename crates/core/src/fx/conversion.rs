//! Conversion Engine: resolves an amount in currency X to currency Y via a
//! strict, ordered fallback chain that always terminates with a result.
//!
//! Mirrors the ordered-fallback-with-`last_error` walk used by the market
//! data provider registry: attempt each step in order, downgrade to the
//! next on failure, never abort the call.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use log::warn;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::errors::Result;
use crate::fx::cache::{Cache, CacheKeyType};
use crate::fx::currencies::{hardcoded_fallback_rate, CurrencySet};
use crate::fx::model::{ConversionResult, Provenance};
use crate::fx::rate_store::RateStoreTrait;
use fxledger_market_data::RateProvider;

/// Default match window (in days) for the interpolated fallback step, used
/// unless the caller configures a different `FXLEDGER_INTERPOLATION_WINDOW_DAYS`.
const DEFAULT_INTERPOLATION_WINDOW_DAYS: i64 = 7;

/// A recent DailyRate is considered "current" if sampled within this many
/// hours of now.
const CURRENT_WINDOW_HOURS: i64 = 1;

/// Optional context identifying the expense a conversion is performed on
/// behalf of, enabling the frozen-rate and interpolated fallback steps.
#[derive(Debug, Clone, Copy)]
pub struct ExpenseContext {
    pub expense_id: i64,
    pub transaction_date: NaiveDate,
}

pub struct ConversionEngine {
    store: Arc<dyn RateStoreTrait>,
    provider: Arc<dyn RateProvider>,
    cache: Arc<Cache>,
    currencies: CurrencySet,
    interpolation_window_days: i64,
}

impl ConversionEngine {
    pub fn new(
        store: Arc<dyn RateStoreTrait>,
        provider: Arc<dyn RateProvider>,
        cache: Arc<Cache>,
        currencies: CurrencySet,
    ) -> Self {
        Self::with_interpolation_window(
            store,
            provider,
            cache,
            currencies,
            DEFAULT_INTERPOLATION_WINDOW_DAYS,
        )
    }

    /// Same as [`Self::new`], but with an explicit interpolation window (the
    /// spec's configurable "nearest-rate window, default 7 days for
    /// conversion").
    pub fn with_interpolation_window(
        store: Arc<dyn RateStoreTrait>,
        provider: Arc<dyn RateProvider>,
        cache: Arc<Cache>,
        currencies: CurrencySet,
        interpolation_window_days: i64,
    ) -> Self {
        Self {
            store,
            provider,
            cache,
            currencies,
            interpolation_window_days,
        }
    }

    /// Converts `amount` from `from` to `to`, optionally in the context of
    /// a specific expense. Never returns an error: the chain's last step
    /// always yields a result.
    pub async fn convert(
        &self,
        amount: Decimal,
        from: &str,
        to: &str,
        expense: Option<ExpenseContext>,
    ) -> Result<ConversionResult> {
        if from == to {
            return Ok(ConversionResult {
                converted_amount: amount,
                rate: Decimal::ONE,
                provenance: Provenance::Identity,
                days_difference: None,
            });
        }

        let cache_key_type = if expense.is_some() {
            CacheKeyType::ConversionHistorical
        } else {
            CacheKeyType::ConversionCurrent
        };
        let cache_key = match expense {
            Some(ctx) => format!("{}:{}:{}:{}", from, to, ctx.expense_id, ctx.transaction_date),
            None => format!("{}:{}", from, to),
        };

        if let Some(hit) = self.cache.get::<ConversionResult>(cache_key_type, &cache_key) {
            return Ok(ConversionResult {
                converted_amount: amount * hit.rate,
                ..hit
            });
        }

        let (rate, provenance, days_difference) =
            self.resolve_rate(from, to, expense).await;

        let result = ConversionResult {
            converted_amount: amount * rate,
            rate,
            provenance,
            days_difference,
        };

        if let Err(err) = self.cache.set(cache_key_type, &cache_key, &result) {
            warn!("conversion: failed to cache result for {}->{}: {}", from, to, err);
        }

        Ok(result)
    }

    /// Walks the fallback chain (steps 1-7; step 0 identity is handled by
    /// the caller) and returns the first successful `(rate, provenance,
    /// days_difference)`.
    async fn resolve_rate(
        &self,
        from: &str,
        to: &str,
        expense: Option<ExpenseContext>,
    ) -> (Decimal, Provenance, Option<i64>) {
        // Step 1: frozen per-expense rate.
        if let Some(ctx) = expense {
            match self.store.find_frozen(ctx.expense_id, from, to).await {
                Ok(Some(rate)) => return (rate, Provenance::Frozen, None),
                Ok(None) => {}
                Err(err) => warn!("conversion: frozen lookup failed for {}->{}: {}", from, to, err),
            }
        }

        // Step 2: interpolated nearest historical rate.
        if let Some(ctx) = expense {
            match self
                .store
                .find_nearest_daily(from, to, ctx.transaction_date, self.interpolation_window_days)
                .await
            {
                Ok(Some(nearest)) => {
                    return (
                        nearest.rate,
                        Provenance::Interpolated,
                        Some(nearest.days_difference),
                    )
                }
                Ok(None) => {}
                Err(err) => warn!(
                    "conversion: nearest-daily lookup failed for {}->{}: {}",
                    from, to, err
                ),
            }
        }

        // Step 3: recent DailyRate (within the last hour).
        match self
            .store
            .find_daily(from, to, ChronoDuration::hours(CURRENT_WINDOW_HOURS))
            .await
        {
            Ok(Some(daily)) => return (daily.rate, Provenance::Current, None),
            Ok(None) => {}
            Err(err) => warn!("conversion: recent-daily lookup failed for {}->{}: {}", from, to, err),
        }

        // Step 4: live provider rate, persisted as today's DailyRate.
        match self.provider.get_latest_rates(from, &[to.to_string()]).await {
            Ok(rates) => {
                if let Some(rate) = rates.get(to).copied() {
                    let today = Utc::now().date_naive();
                    if let Err(err) = self.store.put_daily(from, to, rate, today).await {
                        warn!(
                            "conversion: failed to persist provider rate for {}->{}: {}",
                            from, to, err
                        );
                    }
                    return (rate, Provenance::Current, None);
                }
                warn!("conversion: provider response missing target {}->{}", from, to);
            }
            Err(err) => warn!("conversion: provider call failed for {}->{}: {}", from, to, err),
        }

        // Step 5: any DailyRate for the pair, however stale.
        match self.store.find_any_daily(from, to).await {
            Ok(Some(daily)) => return (daily.rate, Provenance::Current, None),
            Ok(None) => {}
            Err(err) => warn!("conversion: stale-daily lookup failed for {}->{}: {}", from, to, err),
        }

        // Step 6: hardcoded last-resort map.
        if let Some(rate) = hardcoded_fallback_rate(from, to) {
            return (rate, Provenance::FallbackHardcoded, None);
        }

        // Step 7: give up gracefully rather than fail the call.
        warn!(
            "conversion: every fallback step exhausted for {}->{}, defaulting to identity rate",
            from, to
        );
        (dec!(1), Provenance::Current, None)
    }

    /// Exposes the configured currency set so callers (e.g. API handlers)
    /// can validate inputs before invoking `convert`.
    pub fn currencies(&self) -> &CurrencySet {
        &self.currencies
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use fxledger_market_data::{MarketDataError, RateLimit};
    use std::collections::HashMap;

    use crate::fx::model::{DailyRate, NearestRate};
    use crate::fx::rate_store::RatePair;

    #[derive(Default)]
    struct ScenarioStore {
        frozen: Option<Decimal>,
        nearest: Option<NearestRate>,
        recent_daily: Option<DailyRate>,
        any_daily: Option<DailyRate>,
    }

    #[async_trait]
    impl RateStoreTrait for ScenarioStore {
        async fn put_daily(&self, _f: &str, _t: &str, _r: Decimal, _d: NaiveDate) -> Result<()> {
            Ok(())
        }
        async fn clear_all_daily(&self) -> Result<()> {
            Ok(())
        }
        async fn batch_put_daily(&self, _p: &[RatePair], _ts: DateTime<Utc>) -> Result<()> {
            Ok(())
        }
        async fn list_currencies(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn latest_daily_update(&self) -> Result<Option<NaiveDate>> {
            Ok(None)
        }
        async fn find_daily(&self, _f: &str, _t: &str, _w: Duration) -> Result<Option<DailyRate>> {
            Ok(self.recent_daily.clone())
        }
        async fn find_nearest_daily(
            &self,
            _f: &str,
            _t: &str,
            _d: NaiveDate,
            _w: i64,
        ) -> Result<Option<NearestRate>> {
            Ok(self.nearest.clone())
        }
        async fn put_frozen(&self, _e: i64, _p: &[RatePair]) -> Result<()> {
            Ok(())
        }
        async fn find_frozen(&self, _e: i64, _f: &str, _t: &str) -> Result<Option<Decimal>> {
            Ok(self.frozen)
        }
        async fn count_frozen(&self, _e: i64) -> Result<i64> {
            Ok(0)
        }
        async fn find_any_daily(&self, _f: &str, _t: &str) -> Result<Option<DailyRate>> {
            Ok(self.any_daily.clone())
        }
        async fn delete_frozen_by_expense_ids(&self, _e: &[i64]) -> Result<()> {
            Ok(())
        }
        async fn frozen_expense_ids(&self) -> Result<Vec<i64>> {
            Ok(vec![])
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl RateProvider for FailingProvider {
        fn id(&self) -> &'static str {
            "FAILING"
        }
        fn rate_limit(&self) -> RateLimit {
            RateLimit::default()
        }
        async fn get_latest_rates(
            &self,
            _base: &str,
            _targets: &[String],
        ) -> std::result::Result<HashMap<String, Decimal>, MarketDataError> {
            Err(MarketDataError::ProviderError {
                provider: "FAILING".to_string(),
                message: "down".to_string(),
            })
        }
    }

    fn engine(store: ScenarioStore) -> ConversionEngine {
        ConversionEngine::new(
            Arc::new(store),
            Arc::new(FailingProvider),
            Arc::new(Cache::new()),
            CurrencySet::new(vec!["USD".to_string()], "EUR"),
        )
    }

    #[tokio::test]
    async fn test_identity_conversion_short_circuits() {
        let eng = engine(ScenarioStore::default());
        let result = eng.convert(dec!(10), "USD", "USD", None).await.unwrap();
        assert_eq!(result.provenance, Provenance::Identity);
        assert_eq!(result.converted_amount, dec!(10));
    }

    #[tokio::test]
    async fn test_frozen_rate_takes_priority() {
        let store = ScenarioStore {
            frozen: Some(dec!(2)),
            any_daily: Some(DailyRate {
                from_currency: "USD".into(),
                to_currency: "EUR".into(),
                rate: dec!(99),
                sample_date: Utc::now().date_naive(),
            }),
            ..Default::default()
        };
        let eng = engine(store);
        let ctx = ExpenseContext {
            expense_id: 1,
            transaction_date: Utc::now().date_naive(),
        };
        let result = eng
            .convert(dec!(10), "USD", "EUR", Some(ctx))
            .await
            .unwrap();
        assert_eq!(result.provenance, Provenance::Frozen);
        assert_eq!(result.converted_amount, dec!(20));
    }

    #[tokio::test]
    async fn test_falls_back_to_hardcoded_when_all_else_fails() {
        let eng = engine(ScenarioStore::default());
        let result = eng.convert(dec!(10), "USD", "EUR", None).await.unwrap();
        assert_eq!(result.provenance, Provenance::FallbackHardcoded);
    }

    #[tokio::test]
    async fn test_stale_daily_used_when_provider_and_recent_fail() {
        let store = ScenarioStore {
            any_daily: Some(DailyRate {
                from_currency: "USD".into(),
                to_currency: "ZZZ".into(),
                rate: dec!(5),
                sample_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            }),
            ..Default::default()
        };
        let eng = engine(store);
        let result = eng.convert(dec!(2), "USD", "ZZZ", None).await.unwrap();
        assert_eq!(result.provenance, Provenance::Current);
        assert_eq!(result.converted_amount, dec!(10));
    }
}
