//! Diesel-backed implementation of `fxledger_core::fx::RateStoreTrait`.
//!
//! Reads go straight to a pooled connection; every write is routed through
//! the single-writer actor (`crate::db::WriteHandle`) so concurrent
//! Capture/Migrator/Refresh writers never contend for SQLite's single
//! writer lock outside of bounded, serialized batches.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use fxledger_core::errors::{Error, Result};
use fxledger_core::fx::model::{DailyRate, NearestRate};
use fxledger_core::fx::rate_store::{RatePair, RateStoreTrait};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::{daily_rates, frozen_rates};
use crate::utils::chunk_for_sqlite;

#[derive(Queryable)]
struct DailyRateRow {
    #[diesel(column_name = id)]
    _id: i64,
    from_currency: String,
    to_currency: String,
    rate: String,
    sample_date: NaiveDate,
    #[diesel(column_name = created_at)]
    _created_at: NaiveDateTime,
}

impl DailyRateRow {
    fn into_model(self) -> Result<DailyRate> {
        Ok(DailyRate {
            from_currency: self.from_currency,
            to_currency: self.to_currency,
            rate: parse_rate(&self.rate)?,
            sample_date: self.sample_date,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = daily_rates)]
struct NewDailyRate {
    from_currency: String,
    to_currency: String,
    rate: String,
    sample_date: NaiveDate,
    created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = frozen_rates)]
struct NewFrozenRate {
    expense_id: i64,
    from_currency: String,
    to_currency: String,
    rate: String,
    captured_at: NaiveDateTime,
}

fn parse_rate(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| Error::Repository(format!("stored rate '{raw}' is not a valid decimal: {e}")))
}

pub struct SqliteRateStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteRateStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl RateStoreTrait for SqliteRateStore {
    async fn put_daily(&self, from: &str, to: &str, rate: Decimal, day: NaiveDate) -> Result<()> {
        let from = from.to_string();
        let to = to.to_string();
        let rate_str = rate.to_string();

        self.writer
            .exec(move |conn| {
                let new_row = NewDailyRate {
                    from_currency: from.clone(),
                    to_currency: to.clone(),
                    rate: rate_str.clone(),
                    sample_date: day,
                    created_at: Utc::now().naive_utc(),
                };

                diesel::insert_into(daily_rates::table)
                    .values(&new_row)
                    .on_conflict((
                        daily_rates::from_currency,
                        daily_rates::to_currency,
                        daily_rates::sample_date,
                    ))
                    .do_update()
                    .set(daily_rates::rate.eq(rate_str))
                    .execute(conn)
                    .into_core()?;
                Ok(())
            })
            .await
    }

    async fn clear_all_daily(&self) -> Result<()> {
        self.writer
            .exec(|conn| {
                diesel::delete(daily_rates::table).execute(conn).into_core()?;
                Ok(())
            })
            .await
    }

    async fn batch_put_daily(&self, pairs: &[RatePair], ts: DateTime<Utc>) -> Result<()> {
        let rows: Vec<(String, String, String, NaiveDate)> = pairs
            .iter()
            .map(|(from, to, rate)| (from.clone(), to.clone(), rate.to_string(), ts.date_naive()))
            .collect();
        let created_at = ts.naive_utc();

        self.writer
            .exec(move |conn| {
                for (from, to, rate_str, day) in &rows {
                    let new_row = NewDailyRate {
                        from_currency: from.clone(),
                        to_currency: to.clone(),
                        rate: rate_str.clone(),
                        sample_date: *day,
                        created_at,
                    };
                    diesel::insert_into(daily_rates::table)
                        .values(&new_row)
                        .on_conflict((
                            daily_rates::from_currency,
                            daily_rates::to_currency,
                            daily_rates::sample_date,
                        ))
                        .do_update()
                        .set(daily_rates::rate.eq(rate_str.clone()))
                        .execute(conn)
                        .into_core()?;
                }
                Ok(())
            })
            .await
    }

    async fn list_currencies(&self) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;

        let froms: Vec<String> = daily_rates::table
            .select(daily_rates::from_currency)
            .distinct()
            .load(&mut conn)
            .into_core()?;
        let tos: Vec<String> = daily_rates::table
            .select(daily_rates::to_currency)
            .distinct()
            .load(&mut conn)
            .into_core()?;

        let mut currencies: Vec<String> = froms.into_iter().chain(tos).collect();
        currencies.sort();
        currencies.dedup();
        Ok(currencies)
    }

    async fn latest_daily_update(&self) -> Result<Option<NaiveDate>> {
        let mut conn = get_connection(&self.pool)?;
        let result: Option<NaiveDate> = daily_rates::table
            .select(diesel::dsl::max(daily_rates::sample_date))
            .first(&mut conn)
            .into_core()?;
        Ok(result)
    }

    async fn find_daily(
        &self,
        from: &str,
        to: &str,
        recent_within: Duration,
    ) -> Result<Option<DailyRate>> {
        let mut conn = get_connection(&self.pool)?;
        let cutoff = (Utc::now() - recent_within).date_naive();

        let row: Option<DailyRateRow> = daily_rates::table
            .filter(daily_rates::from_currency.eq(from))
            .filter(daily_rates::to_currency.eq(to))
            .filter(daily_rates::sample_date.ge(cutoff))
            .order(daily_rates::sample_date.desc())
            .first(&mut conn)
            .optional()
            .into_core()?;

        row.map(DailyRateRow::into_model).transpose()
    }

    async fn find_nearest_daily(
        &self,
        from: &str,
        to: &str,
        target_day: NaiveDate,
        window_days: i64,
    ) -> Result<Option<NearestRate>> {
        let mut conn = get_connection(&self.pool)?;
        let lower = target_day - Duration::days(window_days);
        let upper = target_day + Duration::days(window_days);

        let rows: Vec<DailyRateRow> = daily_rates::table
            .filter(daily_rates::from_currency.eq(from))
            .filter(daily_rates::to_currency.eq(to))
            .filter(daily_rates::sample_date.ge(lower))
            .filter(daily_rates::sample_date.le(upper))
            .load(&mut conn)
            .into_core()?;

        let mut nearest: Option<(DailyRate, i64)> = None;
        for row in rows {
            let model = row.into_model()?;
            let diff = (model.sample_date - target_day).num_days().abs();
            if nearest.as_ref().map(|(_, d)| diff < *d).unwrap_or(true) {
                nearest = Some((model, diff));
            }
        }

        Ok(nearest.map(|(model, diff)| NearestRate {
            rate: model.rate,
            sample_date: model.sample_date,
            days_difference: diff,
        }))
    }

    async fn put_frozen(&self, expense_id: i64, pairs: &[RatePair]) -> Result<()> {
        let rows: Vec<(String, String, String)> = pairs
            .iter()
            .map(|(from, to, rate)| (from.clone(), to.clone(), rate.to_string()))
            .collect();
        let captured_at = Utc::now().naive_utc();

        self.writer
            .exec(move |conn| {
                for (from, to, rate_str) in &rows {
                    let new_row = NewFrozenRate {
                        expense_id,
                        from_currency: from.clone(),
                        to_currency: to.clone(),
                        rate: rate_str.clone(),
                        captured_at,
                    };
                    diesel::insert_into(frozen_rates::table)
                        .values(&new_row)
                        .on_conflict((
                            frozen_rates::expense_id,
                            frozen_rates::from_currency,
                            frozen_rates::to_currency,
                        ))
                        .do_nothing()
                        .execute(conn)
                        .into_core()?;
                }
                Ok(())
            })
            .await
    }

    async fn find_frozen(&self, expense_id: i64, from: &str, to: &str) -> Result<Option<Decimal>> {
        let mut conn = get_connection(&self.pool)?;
        let rate: Option<String> = frozen_rates::table
            .filter(frozen_rates::expense_id.eq(expense_id))
            .filter(frozen_rates::from_currency.eq(from))
            .filter(frozen_rates::to_currency.eq(to))
            .select(frozen_rates::rate)
            .first(&mut conn)
            .optional()
            .into_core()?;

        rate.map(|r| parse_rate(&r)).transpose()
    }

    async fn count_frozen(&self, expense_id: i64) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let count: i64 = frozen_rates::table
            .filter(frozen_rates::expense_id.eq(expense_id))
            .count()
            .get_result(&mut conn)
            .into_core()?;
        Ok(count)
    }

    async fn find_any_daily(&self, from: &str, to: &str) -> Result<Option<DailyRate>> {
        let mut conn = get_connection(&self.pool)?;
        let row: Option<DailyRateRow> = daily_rates::table
            .filter(daily_rates::from_currency.eq(from))
            .filter(daily_rates::to_currency.eq(to))
            .order(daily_rates::sample_date.desc())
            .first(&mut conn)
            .optional()
            .into_core()?;

        row.map(DailyRateRow::into_model).transpose()
    }

    async fn delete_frozen_by_expense_ids(&self, expense_ids: &[i64]) -> Result<()> {
        let ids = expense_ids.to_vec();
        self.writer
            .exec(move |conn| {
                for chunk in chunk_for_sqlite(&ids) {
                    diesel::delete(
                        frozen_rates::table.filter(frozen_rates::expense_id.eq_any(chunk)),
                    )
                    .execute(conn)
                    .into_core()?;
                }
                Ok(())
            })
            .await
    }

    async fn frozen_expense_ids(&self) -> Result<Vec<i64>> {
        let mut conn = get_connection(&self.pool)?;
        let ids: Vec<i64> = frozen_rates::table
            .select(frozen_rates::expense_id)
            .distinct()
            .load(&mut conn)
            .into_core()?;
        Ok(ids)
    }
}
