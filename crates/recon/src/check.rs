use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Round to cents, half away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Sum of one grid row.
pub fn account_total(row: &BTreeMap<String, Decimal>) -> Decimal {
    row.values().copied().sum()
}

/// A non-fatal consistency finding.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CheckFailure {
    #[error(
        "deviation check failed: deviation is {absolute_diff:.2} ({percent_diff:.2}%), \
         max deviation allowed is {allowed_percent}% (value was {total:.2}, standard value {expected:.2})"
    )]
    DeviationExceeded {
        total: Decimal,
        expected: Decimal,
        absolute_diff: Decimal,
        percent_diff: Decimal,
        allowed_percent: u32,
    },

    #[error("cost mismatch: {a} vs {b}")]
    Mismatch { a: Decimal, b: Decimal },
}

/// Compare an account total against its declared expected value. Skipped
/// (passes) unless `expected` is positive; a deviation equal to the allowed
/// percentage passes.
pub fn check_deviation(total: Decimal, expected: Decimal, allowed_percent: u32) -> Result<(), CheckFailure> {
    if expected <= Decimal::ZERO {
        return Ok(());
    }
    let absolute_diff = (expected - total).abs();
    let percent_diff = absolute_diff / expected * Decimal::ONE_HUNDRED;
    if percent_diff > Decimal::from(allowed_percent) {
        return Err(CheckFailure::DeviationExceeded {
            total,
            expected,
            absolute_diff,
            percent_diff,
            allowed_percent,
        });
    }
    Ok(())
}

/// Compare two totals for the same account after rounding both to cents.
pub fn cross_check(a: Decimal, b: Decimal) -> Result<(), CheckFailure> {
    let (a, b) = (round_cents(a), round_cents(b));
    if a != b {
        return Err(CheckFailure::Mismatch { a, b });
    }
    Ok(())
}

/// Ordered consistency findings, one per line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsistencyReport {
    entries: Vec<(String, CheckFailure)>,
}

impl ConsistencyReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, account: impl Into<String>, failure: CheckFailure) {
        let account = account.into();
        tracing::warn!(account = %account, "{failure}");
        self.entries.push((account, failure));
    }

    /// Record `result` if it is a failure.
    pub fn record(&mut self, account: &str, result: Result<(), CheckFailure>) {
        if let Err(failure) = result {
            self.push(account, failure);
        }
    }

    pub fn entries(&self) -> &[(String, CheckFailure)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `<account>: <failure>` per finding.
    pub fn lines(&self) -> Vec<String> {
        self.entries.iter().map(|(account, f)| format!("{account}: {f}")).collect()
    }
}

impl fmt::Display for ConsistencyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in self.lines() {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn rounding_is_half_away_from_zero() {
        assert_eq!(round_cents(d("123.455")), d("123.46"));
        assert_eq!(round_cents(d("123.454")), d("123.45"));
        assert_eq!(round_cents(d("-0.005")), d("-0.01"));
        assert_eq!(round_cents(d("0.125")), d("0.13"));
    }

    #[test]
    fn deviation_boundaries() {
        assert!(check_deviation(d("100"), d("100"), 0).is_ok());
        assert!(check_deviation(d("100"), d("90"), 5).is_err());
        assert!(check_deviation(d("100"), d("0"), 0).is_ok());
        assert!(check_deviation(d("100"), d("-5"), 0).is_ok());
        // exactly at the limit passes
        assert!(check_deviation(d("110"), d("100"), 10).is_ok());
        assert!(check_deviation(d("110.01"), d("100"), 10).is_err());
    }

    #[test]
    fn deviation_failure_carries_diffs() {
        match check_deviation(d("100"), d("90"), 5) {
            Err(CheckFailure::DeviationExceeded { absolute_diff, percent_diff, allowed_percent, .. }) => {
                assert_eq!(absolute_diff, d("10"));
                assert_eq!(round_cents(percent_diff), d("11.11"));
                assert_eq!(allowed_percent, 5);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn deviation_message() {
        let err = check_deviation(d("100"), d("90"), 5).unwrap_err();
        assert_eq!(
            err.to_string(),
            "deviation check failed: deviation is 10.00 (11.11%), max deviation allowed is 5% \
             (value was 100.00, standard value 90.00)"
        );
    }

    #[test]
    fn cross_check_rounds_before_comparing() {
        assert_eq!(
            cross_check(d("123.455"), d("123.454")),
            Err(CheckFailure::Mismatch { a: d("123.46"), b: d("123.45") })
        );
        assert!(cross_check(d("10.001"), d("10.004")).is_ok());
    }

    #[test]
    fn account_total_sums_row() {
        let mut row = BTreeMap::new();
        row.insert("Storage".to_string(), d("95"));
        row.insert("Compute".to_string(), d("5.50"));
        row.insert("Credit".to_string(), d("-0.50"));
        assert_eq!(account_total(&row), d("100.00"));
        assert_eq!(account_total(&BTreeMap::new()), Decimal::ZERO);
    }

    #[test]
    fn report_lines_keep_order() {
        let mut report = ConsistencyReport::new();
        report.record("b", cross_check(d("1"), d("2")));
        report.record("a", Ok(()));
        report.record("a", cross_check(d("3"), d("4")));
        assert_eq!(report.len(), 2);
        assert_eq!(report.lines(), vec!["b: cost mismatch: 1 vs 2", "a: cost mismatch: 3 vs 4"]);
        assert_eq!(report.to_string(), "b: cost mismatch: 1 vs 2\na: cost mismatch: 3 vs 4\n");
    }
}
