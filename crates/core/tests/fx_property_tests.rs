//! Property-based tests for the exchange-rate subsystem's invariants:
//! currency-pair matrix shape, cache TTL/invalidation bookkeeping, and
//! fallback-chain totality (the Conversion Engine must never error, no
//! matter how badly every upstream source fails).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use proptest::prelude::*;
use rust_decimal::Decimal;

use fxledger_core::errors::Result;
use fxledger_core::fx::model::{DailyRate, NearestRate};
use fxledger_core::fx::rate_store::RatePair;
use fxledger_core::fx::{Cache, CacheKeyType, ConversionEngine, CurrencySet, RateStoreTrait};
use fxledger_market_data::{MarketDataError, RateLimit, RateProvider};

fn arb_currency_code() -> impl Strategy<Value = String> {
    "[A-Z]{3}"
}

fn arb_distinct_codes(min: usize, max: usize) -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec(arb_currency_code(), min..=max).prop_map(|codes| {
        let mut seen = std::collections::HashSet::new();
        codes.into_iter().filter(|c| seen.insert(c.clone())).collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// The ordered pair matrix over a currency set of size n always has
    /// exactly n*(n-1) entries: every ordered pair except the n identity
    /// pairs.
    #[test]
    fn prop_ordered_pairs_count_matches_formula(codes in arb_distinct_codes(1, 10)) {
        let base = "XYZ".to_string();
        let mut codes = codes;
        codes.retain(|c| c != &base);
        let n = codes.len() + 1; // + base, inserted by CurrencySet::new
        let set = CurrencySet::new(codes, base);
        let pairs = set.ordered_pairs();
        prop_assert_eq!(pairs.len(), n * n.saturating_sub(1));
        for (from, to) in &pairs {
            prop_assert_ne!(from, to);
        }
    }

    /// A value set into the cache is immediately readable back unchanged:
    /// TTLs are always positive, so a set-then-get within the same
    /// instant can never observe expiry.
    #[test]
    fn prop_cache_set_then_get_roundtrips(
        key in "[a-z]{1,12}",
        value in 0u64..1_000_000,
    ) {
        let cache = Cache::new();
        cache.set(CacheKeyType::CurrentRate, &key, &value).unwrap();
        let hit: Option<u64> = cache.get(CacheKeyType::CurrentRate, &key);
        prop_assert_eq!(hit, Some(value));
    }

    /// Invalidating by key-type family never leaves a matching entry
    /// behind, and never touches entries of a different family.
    #[test]
    fn prop_invalidate_by_type_is_exhaustive_and_selective(
        keys in proptest::collection::vec("[a-z]{1,8}", 1..20),
    ) {
        let cache = Cache::new();
        for (i, key) in keys.iter().enumerate() {
            cache.set(CacheKeyType::CurrentRate, key, &i).unwrap();
            cache.set(CacheKeyType::ApiResponse, key, &i).unwrap();
        }

        cache.invalidate(None, Some(CacheKeyType::CurrentRate));

        for key in &keys {
            prop_assert!(cache.get::<usize>(CacheKeyType::CurrentRate, key).is_none());
            prop_assert!(cache.get::<usize>(CacheKeyType::ApiResponse, key).is_some());
        }
    }

    /// `ConversionEngine::convert` never returns an error and never panics,
    /// regardless of currency codes, as long as `from != to` is not
    /// assumed: every upstream source (store, provider) fails here, so the
    /// chain must bottom out at the hardcoded table or the identity
    /// last-resort rate.
    #[test]
    fn prop_conversion_fallback_chain_always_terminates(
        from in arb_currency_code(),
        to in arb_currency_code(),
        amount in 1i64..1_000_000,
    ) {
        prop_assume!(from != to);
        let amount = Decimal::from(amount);

        let engine = ConversionEngine::new(
            Arc::new(AlwaysEmptyStore),
            Arc::new(AlwaysFailingProvider),
            Arc::new(Cache::new()),
            CurrencySet::new(vec![from.clone(), to.clone()], "XXX"),
        );

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let result = runtime.block_on(engine.convert(amount, &from, &to, None));

        prop_assert!(result.is_ok());
        let result = result.unwrap();
        prop_assert!(result.rate > Decimal::ZERO);
        prop_assert!(result.converted_amount >= Decimal::ZERO);
    }
}

struct AlwaysEmptyStore;

#[async_trait]
impl RateStoreTrait for AlwaysEmptyStore {
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
    async fn find_daily(
        &self,
        _f: &str,
        _t: &str,
        _w: chrono::Duration,
    ) -> Result<Option<DailyRate>> {
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

struct AlwaysFailingProvider;

#[async_trait]
impl RateProvider for AlwaysFailingProvider {
    fn id(&self) -> &'static str {
        "ALWAYS_FAILING"
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
            provider: "ALWAYS_FAILING".to_string(),
            message: "simulated outage".to_string(),
        })
    }
}
