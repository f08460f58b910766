//! The configured currency set `S` and its designated base/pivot currency.
//!
//! `S` is closed and small (the spec: "≤ ~15 codes"); it is configuration,
//! not a compiled-in constant, so it is threaded through every component
//! that needs to reason about "every pair in S×S" (the Capture Engine, the
//! Refresh Loop's pair matrix, the Migrator's tier 2).

use std::collections::HashSet;

use crate::fx::fx_errors::FxError;

/// The set of currencies the system operates on, plus the designated base
/// (pivot) currency. `base` is always a member of `codes`.
#[derive(Debug, Clone)]
pub struct CurrencySet {
    codes: Vec<String>,
    base: String,
}

impl CurrencySet {
    /// Builds a currency set from an explicit code list and base currency.
    /// `base` is inserted into `codes` if missing. Codes are upper-cased and
    /// deduplicated.
    pub fn new(codes: impl IntoIterator<Item = String>, base: impl Into<String>) -> Self {
        let base = base.into().to_uppercase();
        let mut seen = HashSet::new();
        let mut codes: Vec<String> = codes
            .into_iter()
            .map(|c| c.to_uppercase())
            .filter(|c| seen.insert(c.clone()))
            .collect();
        if seen.insert(base.clone()) {
            codes.push(base.clone());
        }
        codes.sort();
        Self { codes, base }
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.iter().any(|c| c == code)
    }

    /// Rejects a currency that is not a member of this set.
    pub fn validate(&self, code: &str) -> Result<(), FxError> {
        if self.contains(code) {
            Ok(())
        } else {
            Err(FxError::UnsupportedCurrency(code.to_string()))
        }
    }

    /// Every ordered pair (X, Y) with X != Y across the full set, the
    /// matrix the Capture Engine and the Refresh Loop iterate over.
    pub fn ordered_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.codes.len() * self.codes.len().saturating_sub(1));
        for x in &self.codes {
            for y in &self.codes {
                if x != y {
                    pairs.push((x.clone(), y.clone()));
                }
            }
        }
        pairs
    }
}

/// Parses a comma-separated currency list from configuration, e.g.
/// `"EUR,USD,GBP,ZAR"`.
pub fn parse_currency_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Last-resort hardcoded rates, consulted only at fallback-chain step 6 when
/// every other source has failed. These are deliberately coarse and only
/// cover a handful of common pairs; they exist to guarantee the chain never
/// has to fall through to an identity rate=1 for currencies that plausibly
/// appear together.
pub fn hardcoded_fallback_rate(from: &str, to: &str) -> Option<rust_decimal::Decimal> {
    use rust_decimal_macros::dec;

    let rate = match (from, to) {
        ("USD", "EUR") => dec!(0.92),
        ("EUR", "USD") => dec!(1.09),
        ("USD", "GBP") => dec!(0.79),
        ("GBP", "USD") => dec!(1.27),
        ("EUR", "GBP") => dec!(0.86),
        ("GBP", "EUR") => dec!(1.16),
        ("USD", "ZAR") => dec!(18.50),
        ("ZAR", "USD") => dec!(0.054),
        ("EUR", "ZAR") => dec!(20.10),
        ("ZAR", "EUR") => dec!(0.0497),
        _ => return None,
    };
    Some(rate)
}

/// Display name and symbol for a currency code, for the
/// `getAvailableCurrencies` RPC. Unknown codes return empty strings rather
/// than erroring: the caller substitutes the code itself for display. This
/// is a presentation convenience, not a validation boundary.
pub fn currency_metadata(code: &str) -> (&'static str, &'static str) {
    match code {
        "USD" => ("US Dollar", "$"),
        "EUR" => ("Euro", "\u{20ac}"),
        "GBP" => ("British Pound", "\u{a3}"),
        "ZAR" => ("South African Rand", "R"),
        "JPY" => ("Japanese Yen", "\u{a5}"),
        "CHF" => ("Swiss Franc", "CHF"),
        "CAD" => ("Canadian Dollar", "CA$"),
        "AUD" => ("Australian Dollar", "A$"),
        "NZD" => ("New Zealand Dollar", "NZ$"),
        "CNY" => ("Chinese Yuan", "\u{a5}"),
        "INR" => ("Indian Rupee", "\u{20b9}"),
        _ => ("", ""),
    }
}

/// Fixed fallback list surfaced by `getAvailableCurrencies` when DailyRate
/// is empty (e.g. before the first Daily Refresh Loop run).
pub const FALLBACK_CURRENCY_CODES: &[&str] = &["USD", "EUR", "GBP", "ZAR", "JPY", "CHF"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_inserted_when_missing() {
        let set = CurrencySet::new(vec!["USD".to_string(), "ZAR".to_string()], "eur");
        assert!(set.contains("EUR"));
        assert_eq!(set.base(), "EUR");
    }

    #[test]
    fn test_ordered_pairs_excludes_identity() {
        let set = CurrencySet::new(vec!["USD".to_string()], "EUR");
        let pairs = set.ordered_pairs();
        assert_eq!(pairs.len(), 2);
        assert!(pairs.contains(&("USD".to_string(), "EUR".to_string())));
        assert!(pairs.contains(&("EUR".to_string(), "USD".to_string())));
    }

    #[test]
    fn test_validate_rejects_unknown_currency() {
        let set = CurrencySet::new(vec!["USD".to_string()], "EUR");
        assert!(set.validate("JPY").is_err());
        assert!(set.validate("USD").is_ok());
    }

    #[test]
    fn test_parse_currency_list() {
        assert_eq!(
            parse_currency_list(" eur, usd ,, gbp"),
            vec!["EUR".to_string(), "USD".to_string(), "GBP".to_string()]
        );
    }
}
