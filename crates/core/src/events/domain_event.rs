//! Domain event types.

use serde::{Deserialize, Serialize};

/// Domain events emitted by core services after successful mutations.
///
/// These events represent facts about expense data changes. Runtime adapters
/// translate them into platform-specific actions: scheduling Rate Capture,
/// invalidating cache entries, or refreshing a UI.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// An expense was created. Carries enough to schedule Rate Capture
    /// without the event consumer re-reading the expense.
    ExpenseCreated {
        expense_id: i64,
        currency: String,
        transaction_date: chrono::NaiveDate,
    },

    /// An expense's transaction date changed on update. Rate Capture must
    /// re-run because frozen rates are keyed by the transaction date.
    ExpenseDateChanged {
        expense_id: i64,
        currency: String,
        transaction_date: chrono::NaiveDate,
    },

    /// An expense was deleted. Its FrozenRates are cascade-deleted at the
    /// store layer; this event exists for cache/metrics observers only.
    ExpenseDeleted { expense_id: i64 },

    /// Rate Capture finished for an expense, successfully or partially.
    RatesCaptured {
        expense_id: i64,
        pairs_captured: usize,
    },

    /// The Daily Refresh Loop completed a cycle.
    DailyRatesRefreshed { updated: usize, skipped: bool },
}

impl DomainEvent {
    /// Creates an ExpenseCreated event.
    pub fn expense_created(
        expense_id: i64,
        currency: String,
        transaction_date: chrono::NaiveDate,
    ) -> Self {
        Self::ExpenseCreated {
            expense_id,
            currency,
            transaction_date,
        }
    }

    /// Creates an ExpenseDateChanged event.
    pub fn expense_date_changed(
        expense_id: i64,
        currency: String,
        transaction_date: chrono::NaiveDate,
    ) -> Self {
        Self::ExpenseDateChanged {
            expense_id,
            currency,
            transaction_date,
        }
    }

    /// Creates an ExpenseDeleted event.
    pub fn expense_deleted(expense_id: i64) -> Self {
        Self::ExpenseDeleted { expense_id }
    }

    /// Creates a RatesCaptured event.
    pub fn rates_captured(expense_id: i64, pairs_captured: usize) -> Self {
        Self::RatesCaptured {
            expense_id,
            pairs_captured,
        }
    }

    /// Creates a DailyRatesRefreshed event.
    pub fn daily_rates_refreshed(updated: usize, skipped: bool) -> Self {
        Self::DailyRatesRefreshed { updated, skipped }
    }
}
