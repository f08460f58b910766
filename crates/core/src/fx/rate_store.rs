//! The Rate Store contract: durable, indexed access to `DailyRate` and
//! `FrozenRate`. Implemented by the `storage-sqlite` crate; consumed by the
//! Conversion Engine, Capture Engine, Daily Refresh Loop, and Migrator.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use crate::errors::Result;
use crate::fx::model::{DailyRate, NearestRate};

/// A single (from, to, rate) triple destined for `batch_put_daily`/`put_frozen`.
pub type RatePair = (String, String, Decimal);

#[async_trait]
pub trait RateStoreTrait: Send + Sync {
    /// Idempotent upsert on (from, to, day). Callers must reject `rate <= 0`
    /// or currencies outside the configured set before calling; the store
    /// itself only enforces the uniqueness constraint.
    async fn put_daily(
        &self,
        from: &str,
        to: &str,
        rate: Decimal,
        day: NaiveDate,
    ) -> Result<()>;

    /// Truncates the entire DailyRate table. Used only by explicit
    /// force-refresh.
    async fn clear_all_daily(&self) -> Result<()>;

    /// Inserts every pair with a single shared timestamp, so the resulting
    /// rows are guaranteed to carry an identical `sample_date`.
    async fn batch_put_daily(&self, pairs: &[RatePair], ts: DateTime<Utc>) -> Result<()>;

    /// Distinct currencies appearing in DailyRate, sorted.
    async fn list_currencies(&self) -> Result<Vec<String>>;

    /// Max `sample_date` across all DailyRate rows, or `None` if empty.
    async fn latest_daily_update(&self) -> Result<Option<NaiveDate>>;

    /// Most recent DailyRate for (from, to) sampled within `recent_within` of
    /// now, or `None`.
    async fn find_daily(
        &self,
        from: &str,
        to: &str,
        recent_within: chrono::Duration,
    ) -> Result<Option<DailyRate>>;

    /// Nearest-in-time DailyRate for (from, to) within `window` days of
    /// `target_day`, or `None` if nothing falls inside the window.
    async fn find_nearest_daily(
        &self,
        from: &str,
        to: &str,
        target_day: NaiveDate,
        window_days: i64,
    ) -> Result<Option<NearestRate>>;

    /// Batch insert with conflict-ignore on (expense_id, from, to). Existing
    /// frozen rates are never updated.
    async fn put_frozen(&self, expense_id: i64, pairs: &[RatePair]) -> Result<()>;

    /// The frozen rate for (expense_id, from, to), or `None`.
    async fn find_frozen(
        &self,
        expense_id: i64,
        from: &str,
        to: &str,
    ) -> Result<Option<Decimal>>;

    /// Number of frozen rates recorded for `expense_id`.
    async fn count_frozen(&self, expense_id: i64) -> Result<i64>;

    /// The most recent DailyRate for (from, to) regardless of age, or
    /// `None` if no row for the pair has ever been stored. Backs the
    /// stale-but-usable conversion fallback tier.
    async fn find_any_daily(&self, from: &str, to: &str) -> Result<Option<DailyRate>>;

    /// Deletes all frozen rates for the given expense ids. Used by Migrator
    /// rollback.
    async fn delete_frozen_by_expense_ids(&self, expense_ids: &[i64]) -> Result<()>;

    /// Distinct expense ids that have at least one frozen rate, for rollback
    /// bookkeeping.
    async fn frozen_expense_ids(&self) -> Result<Vec<i64>>;
}
