//! The Expense read model.
//!
//! Expense ownership lives entirely outside this crate: Expense CRUD
//! belongs to the host application's own expense table. This module
//! defines only the minimal shape needed by the expense-id-bearing
//! operations (Capture, Conversion, Migrator) and the [`ExpenseSource`]
//! trait the host implements over its real storage.

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::errors::Result;

/// A read-only view of one expense, as seen by the exchange-rate subsystem.
///
/// `legacy_conversion_rate` is the pre-existing single-column rate field
/// some hosts carried before this subsystem existed; it feeds Migrator
/// tier 1 and is otherwise ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Expense {
    pub id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub transaction_date: NaiveDate,
    pub description: String,
    pub legacy_conversion_rate: Option<Decimal>,
}

/// Read-only access to the host application's expense table, implemented
/// by the binary wiring this crate together (not by `storage-sqlite`,
/// which only owns the Rate Store).
#[async_trait]
pub trait ExpenseSource: Send + Sync {
    /// Total number of expenses currently stored.
    async fn count(&self) -> Result<i64>;

    /// The next batch of expenses with `id > after_id`, ordered by id
    /// ascending, at most `limit` rows. Used by the Migrator to page
    /// through the table without loading it all into memory.
    async fn next_batch(&self, after_id: i64, limit: i64) -> Result<Vec<Expense>>;

    /// A single expense by id, or `None` if it does not exist (e.g. it was
    /// deleted between event emission and Capture Engine invocation).
    async fn find(&self, id: i64) -> Result<Option<Expense>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample(id: i64) -> Expense {
        Expense {
            id,
            amount: dec!(100),
            currency: "ZAR".to_string(),
            transaction_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
            description: "groceries".to_string(),
            legacy_conversion_rate: None,
        }
    }

    #[test]
    fn test_expense_is_plain_data() {
        let e = sample(1);
        assert_eq!(e.currency, "ZAR");
        assert_eq!(e.amount, dec!(100));
    }
}
