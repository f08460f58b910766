//! Daily Refresh Loop: ensures the DailyRate table holds one rate row per
//! (base, target) pair in the configured matrix, at least once per UTC day.
//!
//! The scheduling wrapper (initial delay, `tokio::time::interval`, spawned
//! background task) lives in the host binary's scheduler module, mirroring
//! the teacher's `start_broker_sync_scheduler`; this type is the
//! precondition-check-and-act pair that wrapper invokes on each tick.

use std::sync::Arc;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};

use crate::errors::Result;
use crate::fx::currencies::CurrencySet;
use crate::fx::model::RefreshOutcome;
use crate::fx::rate_store::{RatePair, RateStoreTrait};
use fxledger_market_data::RateProvider;

/// Runs the Daily Refresh algorithm, serializing concurrent invocations
/// with a process-wide single-flight guard keyed on the current day.
pub struct DailyRefreshLoop {
    store: Arc<dyn RateStoreTrait>,
    provider: Arc<dyn RateProvider>,
    currencies: CurrencySet,
    bases: Vec<String>,
    in_flight_day: Mutex<Option<NaiveDate>>,
}

impl DailyRefreshLoop {
    /// `bases` is the configured base set (typically 2); `currencies` is
    /// the full set S whose members act as targets.
    pub fn new(
        store: Arc<dyn RateStoreTrait>,
        provider: Arc<dyn RateProvider>,
        currencies: CurrencySet,
        bases: Vec<String>,
    ) -> Self {
        Self {
            store,
            provider,
            currencies,
            bases,
            in_flight_day: Mutex::new(None),
        }
    }

    /// Runs one refresh cycle. `force` bypasses the `existsRatesForDay`
    /// short-circuit and clears the table before re-populating it so every
    /// pair shares an identical sample date.
    pub async fn run(&self, force: bool) -> Result<RefreshOutcome> {
        let today = Utc::now().date_naive();

        {
            let mut guard = self.in_flight_day.lock().unwrap();
            if *guard == Some(today) && !force {
                return Ok(RefreshOutcome {
                    updated: 0,
                    skipped: true,
                });
            }
            *guard = Some(today);
        }

        if !force {
            match self.store.latest_daily_update().await {
                Ok(Some(last)) if last == today => {
                    return Ok(RefreshOutcome {
                        updated: 0,
                        skipped: true,
                    });
                }
                Ok(_) => {}
                Err(err) => warn!("refresh: failed to read latest_daily_update: {}", err),
            }
        }

        let mut pairs: Vec<RatePair> = Vec::new();
        let targets: Vec<String> = self
            .currencies
            .codes()
            .iter()
            .filter(|c| !self.bases.contains(c))
            .cloned()
            .collect();

        for base in &self.bases {
            let mut requested_targets = targets.clone();
            for other_base in &self.bases {
                if other_base != base && !requested_targets.contains(other_base) {
                    requested_targets.push(other_base.clone());
                }
            }

            match self.provider.get_latest_rates(base, &requested_targets).await {
                Ok(rates) => {
                    for (target, rate) in rates {
                        if target == *base {
                            continue;
                        }
                        pairs.push((base.clone(), target, rate));
                    }
                }
                Err(err) => {
                    warn!("refresh: provider call failed for base {}: {}", base, err);
                }
            }
        }

        if pairs.is_empty() {
            warn!("refresh: no rates obtained from any base, nothing to persist");
            *self.in_flight_day.lock().unwrap() = None;
            return Ok(RefreshOutcome {
                updated: 0,
                skipped: false,
            });
        }

        let now: DateTime<Utc> = Utc::now();

        let persisted = async {
            if force {
                self.store.clear_all_daily().await?;
            }
            self.store.batch_put_daily(&pairs, now).await
        }
        .await;

        if let Err(err) = persisted {
            *self.in_flight_day.lock().unwrap() = None;
            return Err(err);
        }

        info!("refresh: persisted {} rate pairs for {}", pairs.len(), today);

        Ok(RefreshOutcome {
            updated: pairs.len(),
            skipped: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use fxledger_market_data::{MarketDataError, RateLimit};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    use crate::fx::model::{DailyRate, NearestRate};

    struct StubProvider;

    #[async_trait]
    impl RateProvider for StubProvider {
        fn id(&self) -> &'static str {
            "STUB"
        }
        fn rate_limit(&self) -> RateLimit {
            RateLimit::default()
        }
        async fn get_latest_rates(
            &self,
            _base: &str,
            targets: &[String],
        ) -> std::result::Result<HashMap<String, Decimal>, MarketDataError> {
            Ok(targets.iter().map(|t| (t.clone(), dec!(1.1))).collect())
        }
    }

    #[derive(Default)]
    struct StubStore {
        latest: StdMutex<Option<NaiveDate>>,
        persisted: StdMutex<Vec<RatePair>>,
        cleared: StdMutex<bool>,
    }

    #[async_trait]
    impl RateStoreTrait for StubStore {
        async fn put_daily(&self, _f: &str, _t: &str, _r: Decimal, _d: NaiveDate) -> Result<()> {
            Ok(())
        }
        async fn clear_all_daily(&self) -> Result<()> {
            *self.cleared.lock().unwrap() = true;
            Ok(())
        }
        async fn batch_put_daily(&self, pairs: &[RatePair], _ts: DateTime<Utc>) -> Result<()> {
            self.persisted.lock().unwrap().extend(pairs.iter().cloned());
            Ok(())
        }
        async fn list_currencies(&self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn latest_daily_update(&self) -> Result<Option<NaiveDate>> {
            Ok(*self.latest.lock().unwrap())
        }
        async fn find_daily(&self, _f: &str, _t: &str, _w: Duration) -> Result<Option<DailyRate>> {
            Ok(None)
        }
        async fn find_nearest_daily(
            &self,
            _f: &str,
            _t: &str,
            _d: NaiveDate,
            _w: i64,
        ) -> Result<Option<NearestRate>> {
            Ok(None)
        }
        async fn put_frozen(&self, _e: i64, _p: &[RatePair]) -> Result<()> {
            Ok(())
        }
        async fn find_frozen(&self, _e: i64, _f: &str, _t: &str) -> Result<Option<Decimal>> {
            Ok(None)
        }
        async fn count_frozen(&self, _e: i64) -> Result<i64> {
            Ok(0)
        }
        async fn find_any_daily(&self, _f: &str, _t: &str) -> Result<Option<DailyRate>> {
            Ok(None)
        }
        async fn delete_frozen_by_expense_ids(&self, _e: &[i64]) -> Result<()> {
            Ok(())
        }
        async fn frozen_expense_ids(&self) -> Result<Vec<i64>> {
            Ok(vec![])
        }
    }

    fn currencies() -> CurrencySet {
        CurrencySet::new(vec!["USD".to_string(), "GBP".to_string()], "EUR")
    }

    #[tokio::test]
    async fn test_refresh_skips_when_already_run_today() {
        let store = Arc::new(StubStore {
            latest: StdMutex::new(Some(Utc::now().date_naive())),
            ..Default::default()
        });
        let loop_ = DailyRefreshLoop::new(
            store,
            Arc::new(StubProvider),
            currencies(),
            vec!["EUR".to_string()],
        );
        let outcome = loop_.run(false).await.unwrap();
        assert!(outcome.skipped);
        assert_eq!(outcome.updated, 0);
    }

    #[tokio::test]
    async fn test_refresh_persists_pairs_when_stale() {
        let store = Arc::new(StubStore::default());
        let loop_ = DailyRefreshLoop::new(
            store.clone(),
            Arc::new(StubProvider),
            currencies(),
            vec!["EUR".to_string()],
        );
        let outcome = loop_.run(false).await.unwrap();
        assert!(!outcome.skipped);
        assert!(outcome.updated > 0);
        assert!(!store.persisted.lock().unwrap().is_empty());
    }

    struct EmptyProvider;

    #[async_trait]
    impl RateProvider for EmptyProvider {
        fn id(&self) -> &'static str {
            "EMPTY"
        }
        fn rate_limit(&self) -> RateLimit {
            RateLimit::default()
        }
        async fn get_latest_rates(
            &self,
            _base: &str,
            _targets: &[String],
        ) -> std::result::Result<HashMap<String, Decimal>, MarketDataError> {
            Ok(HashMap::new())
        }
    }

    #[tokio::test]
    async fn test_retries_same_day_after_empty_provider_response() {
        let store = Arc::new(StubStore::default());
        let loop_ = DailyRefreshLoop::new(
            store.clone(),
            Arc::new(EmptyProvider),
            currencies(),
            vec!["EUR".to_string()],
        );

        let first = loop_.run(false).await.unwrap();
        assert!(!first.skipped);
        assert_eq!(first.updated, 0);

        // A provider outage must not latch the day as "done" — the next
        // call the same day has to retry, not short-circuit to skipped.
        let second = loop_.run(false).await.unwrap();
        assert!(!second.skipped);
    }

    #[tokio::test]
    async fn test_force_refresh_clears_table_first() {
        let store = Arc::new(StubStore {
            latest: StdMutex::new(Some(Utc::now().date_naive())),
            ..Default::default()
        });
        let loop_ = DailyRefreshLoop::new(
            store.clone(),
            Arc::new(StubProvider),
            currencies(),
            vec!["EUR".to_string()],
        );
        let outcome = loop_.run(true).await.unwrap();
        assert!(!outcome.skipped);
        assert!(*store.cleared.lock().unwrap());
    }
}
