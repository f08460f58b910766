use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;

use fxledger_core::errors::{Error, Result};
use fxledger_core::expenses::{Expense, ExpenseSource};

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::IntoCore;
use crate::schema::expenses;

#[derive(Queryable)]
struct ExpenseRow {
    id: i64,
    amount: String,
    currency: String,
    transaction_date: NaiveDate,
    description: String,
    legacy_conversion_rate: Option<String>,
    #[diesel(column_name = created_at)]
    _created_at: chrono::NaiveDateTime,
    #[diesel(column_name = updated_at)]
    _updated_at: chrono::NaiveDateTime,
}

impl ExpenseRow {
    fn into_model(self) -> Result<Expense> {
        Ok(Expense {
            id: self.id,
            amount: parse_decimal(&self.amount)?,
            currency: self.currency,
            transaction_date: self.transaction_date,
            description: self.description,
            legacy_conversion_rate: self
                .legacy_conversion_rate
                .as_deref()
                .map(parse_decimal)
                .transpose()?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = expenses)]
struct NewExpenseRow {
    amount: String,
    currency: String,
    transaction_date: NaiveDate,
    description: String,
    legacy_conversion_rate: Option<String>,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| Error::Repository(format!("stored amount '{raw}' is not a valid decimal: {e}")))
}

pub struct SqliteExpenseRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteExpenseRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Creates a new expense row, returning the persisted model with its
    /// assigned id. Callers are responsible for emitting
    /// `DomainEvent::ExpenseCreated` once this returns successfully.
    pub async fn create(
        &self,
        amount: Decimal,
        currency: String,
        transaction_date: NaiveDate,
        description: String,
        legacy_conversion_rate: Option<Decimal>,
    ) -> Result<Expense> {
        let now = Utc::now().naive_utc();
        let new_row = NewExpenseRow {
            amount: amount.to_string(),
            currency: currency.clone(),
            transaction_date,
            description: description.clone(),
            legacy_conversion_rate: legacy_conversion_rate.map(|r| r.to_string()),
            created_at: now,
            updated_at: now,
        };

        self.writer
            .exec(move |conn| {
                let id: i64 = diesel::insert_into(expenses::table)
                    .values(&new_row)
                    .returning(expenses::id)
                    .get_result(conn)
                    .into_core()?;

                Ok(Expense {
                    id,
                    amount,
                    currency,
                    transaction_date,
                    description,
                    legacy_conversion_rate,
                })
            })
            .await
    }

    /// Updates an expense's transaction date, returning whether it
    /// actually changed (callers use this to decide whether to re-run
    /// Rate Capture).
    pub async fn update_transaction_date(
        &self,
        expense_id: i64,
        new_date: NaiveDate,
    ) -> Result<bool> {
        let current = self.find(expense_id).await?;
        let Some(current) = current else {
            return Err(Error::Repository(format!("expense {expense_id} not found")));
        };

        if current.transaction_date == new_date {
            return Ok(false);
        }

        let now = Utc::now().naive_utc();
        self.writer
            .exec(move |conn| {
                diesel::update(expenses::table.filter(expenses::id.eq(expense_id)))
                    .set((
                        expenses::transaction_date.eq(new_date),
                        expenses::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .into_core()?;
                Ok(())
            })
            .await?;

        Ok(true)
    }

    /// Deletes an expense; its frozen rates cascade-delete via the
    /// foreign key.
    pub async fn delete(&self, expense_id: i64) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::delete(expenses::table.filter(expenses::id.eq(expense_id)))
                    .execute(conn)
                    .into_core()?;
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl ExpenseSource for SqliteExpenseRepository {
    async fn count(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let count: i64 = expenses::table.count().get_result(&mut conn).into_core()?;
        Ok(count)
    }

    async fn next_batch(&self, after_id: i64, limit: i64) -> Result<Vec<Expense>> {
        let mut conn = get_connection(&self.pool)?;
        let rows: Vec<ExpenseRow> = expenses::table
            .filter(expenses::id.gt(after_id))
            .order(expenses::id.asc())
            .limit(limit)
            .load(&mut conn)
            .into_core()?;

        rows.into_iter().map(ExpenseRow::into_model).collect()
    }

    async fn find(&self, id: i64) -> Result<Option<Expense>> {
        let mut conn = get_connection(&self.pool)?;
        let row: Option<ExpenseRow> = expenses::table
            .filter(expenses::id.eq(id))
            .first(&mut conn)
            .optional()
            .into_core()?;

        row.map(ExpenseRow::into_model).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_pool, run_migrations, spawn_writer};
    use rust_decimal_macros::dec;

    async fn test_repo() -> (tempfile::TempDir, SqliteExpenseRepository) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = create_pool(db_path.to_str().unwrap()).unwrap();
        run_migrations(&pool).unwrap();
        let writer = spawn_writer((*pool).clone());
        (dir, SqliteExpenseRepository::new(pool, writer))
    }

    #[tokio::test]
    async fn test_create_then_find_round_trips() {
        let (_dir, repo) = test_repo().await;
        let created = repo
            .create(
                dec!(42.50),
                "ZAR".to_string(),
                NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
                "lunch".to_string(),
                None,
            )
            .await
            .unwrap();

        let found = repo.find(created.id).await.unwrap().unwrap();
        assert_eq!(found.amount, dec!(42.50));
        assert_eq!(found.currency, "ZAR");
    }

    #[tokio::test]
    async fn test_next_batch_pages_by_id_ascending() {
        let (_dir, repo) = test_repo().await;
        for i in 0..5 {
            repo.create(
                dec!(10),
                "USD".to_string(),
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                format!("expense {i}"),
                None,
            )
            .await
            .unwrap();
        }

        let first_batch = repo.next_batch(0, 2).await.unwrap();
        assert_eq!(first_batch.len(), 2);
        let second_batch = repo.next_batch(first_batch[1].id, 2).await.unwrap();
        assert_eq!(second_batch.len(), 2);
        assert!(second_batch[0].id > first_batch[1].id);
    }

    #[tokio::test]
    async fn test_update_transaction_date_reports_whether_it_changed() {
        let (_dir, repo) = test_repo().await;
        let created = repo
            .create(
                dec!(10),
                "USD".to_string(),
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                "test".to_string(),
                None,
            )
            .await
            .unwrap();

        let same_date = created.transaction_date;
        assert!(!repo.update_transaction_date(created.id, same_date).await.unwrap());

        let new_date = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        assert!(repo.update_transaction_date(created.id, new_date).await.unwrap());

        let found = repo.find(created.id).await.unwrap().unwrap();
        assert_eq!(found.transaction_date, new_date);
    }
}
