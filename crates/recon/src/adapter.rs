use rust_decimal::Decimal;

use crate::check::round_cents;
use crate::error::{FetchError, ReconError};
use crate::model::{CostRecord, ReportMonth};

/// Unit every source must report in.
pub const USD: &str = "USD";

/// One response from a source that covers many accounts at once.
#[derive(Debug, Clone, Default)]
pub struct BulkPull {
    pub records: Vec<CostRecord>,
    /// The source-side filters the query ran under, already rendered for
    /// display (`"label" == "value"`).
    pub filters: Vec<String>,
    /// The response advertised more pages.
    pub paginated: bool,
}

impl BulkPull {
    /// Fail if the response was paginated. Bulk queries are expected to
    /// return everything in one page.
    pub fn ensure_complete(self, source_name: &str) -> Result<Self, FetchError> {
        if self.paginated {
            return Err(FetchError::Paginated { source_name: source_name.to_string() });
        }
        Ok(self)
    }
}

/// One account's breakdown plus the source's own total for that account.
#[derive(Debug, Clone)]
pub struct ScopedPull {
    pub account_id: String,
    pub records: Vec<CostRecord>,
    pub total: Decimal,
    pub unit: String,
}

impl ScopedPull {
    /// Every record and the total must be in USD, and the breakdown must add
    /// up to the total once both are rounded to cents.
    pub fn verify(&self, source_name: &str) -> Result<(), ReconError> {
        let mismatch = |unit: &str| ReconError::UnitMismatch {
            source_name: source_name.to_string(),
            account: self.account_id.clone(),
            unit: unit.to_string(),
        };
        if self.unit != USD {
            return Err(mismatch(&self.unit));
        }
        if let Some(r) = self.records.iter().find(|r| r.currency != USD) {
            return Err(mismatch(&r.currency));
        }

        let breakdown = round_cents(self.records.iter().map(|r| r.amount).sum());
        let total = round_cents(self.total);
        if breakdown != total {
            return Err(ReconError::InconsistentTotals {
                account: self.account_id.clone(),
                breakdown,
                total,
            });
        }
        Ok(())
    }
}

/// A source that returns every account it knows about in one query.
pub trait BulkSource {
    fn name(&self) -> &str;

    fn fetch(&self, month: &ReportMonth, cost_type: &str) -> Result<BulkPull, FetchError>;
}

/// A source queried one account at a time.
pub trait ScopedSource {
    fn name(&self) -> &str;

    fn fetch_scoped(&self, account_id: &str, month: &ReportMonth, cost_type: &str) -> Result<ScopedPull, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn service(name: &str, amount: &str, currency: &str) -> CostRecord {
        CostRecord {
            account_id: "1234-5678-9012".into(),
            account_name: String::new(),
            provider: "Amazon".into(),
            category: name.into(),
            amount: d(amount),
            currency: currency.into(),
            cost_center: String::new(),
            payer_id: None,
            reporting_date: "2024-08".into(),
        }
    }

    fn pull(records: Vec<CostRecord>, total: &str, unit: &str) -> ScopedPull {
        ScopedPull { account_id: "1234-5678-9012".into(), records, total: d(total), unit: unit.into() }
    }

    #[test]
    fn verify_accepts_rounded_agreement() {
        let p = pull(
            vec![service("Amazon S3", "10.004", "USD"), service("AWS Lambda", "5.001", "USD")],
            "15.0051",
            "USD",
        );
        assert!(p.verify("aws").is_ok());
    }

    #[test]
    fn verify_rejects_total_mismatch() {
        let p = pull(vec![service("Amazon S3", "10.00", "USD")], "10.02", "USD");
        match p.verify("aws") {
            Err(ReconError::InconsistentTotals { account, breakdown, total }) => {
                assert_eq!(account, "1234-5678-9012");
                assert_eq!(breakdown, d("10.00"));
                assert_eq!(total, d("10.02"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn verify_rejects_non_usd() {
        let p = pull(vec![service("Amazon S3", "1", "EUR")], "1", "USD");
        assert!(matches!(p.verify("aws"), Err(ReconError::UnitMismatch { unit, .. }) if unit == "EUR"));

        let p = pull(vec![service("Amazon S3", "1", "USD")], "1", "GBP");
        assert!(matches!(p.verify("aws"), Err(ReconError::UnitMismatch { unit, .. }) if unit == "GBP"));
    }

    #[test]
    fn empty_breakdown_with_zero_total_is_consistent() {
        assert!(pull(vec![], "0", "USD").verify("aws").is_ok());
    }

    #[test]
    fn paginated_bulk_is_fatal() {
        let ok = BulkPull::default().ensure_complete("cloudability");
        assert!(ok.is_ok());
        let bad = BulkPull { paginated: true, ..Default::default() }.ensure_complete("cloudability");
        assert!(matches!(bad, Err(FetchError::Paginated { .. })));
    }
}
