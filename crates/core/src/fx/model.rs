//! Domain types for the exchange-rate subsystem.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A daily-sampled inter-currency rate.
///
/// `from != to`; `rate > 0`; at most one row exists per (from, to, sample_date).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRate {
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub sample_date: NaiveDate,
}

/// A rate captured for one expense at the moment it was recorded (or its
/// transaction date changed). Never overwritten once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrozenRate {
    pub expense_id: i64,
    pub from_currency: String,
    pub to_currency: String,
    pub rate: Decimal,
    pub captured_at: DateTime<Utc>,
}

/// A daily rate found within a tolerance window of a target day, tagged
/// with how far the match sits from that target.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestRate {
    pub rate: Decimal,
    pub sample_date: NaiveDate,
    pub days_difference: i64,
}

/// How a conversion's rate was ultimately sourced. Exposed to callers so
/// historical reports can distinguish an exact reconstruction from a
/// best-effort approximation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Identity,
    Frozen,
    Interpolated,
    Current,
    FallbackHardcoded,
}

/// Result of a single `convert` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub converted_amount: Decimal,
    pub rate: Decimal,
    pub provenance: Provenance,
    pub days_difference: Option<i64>,
}

/// Outcome of one Daily Refresh Loop invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshOutcome {
    pub updated: usize,
    pub skipped: bool,
}
