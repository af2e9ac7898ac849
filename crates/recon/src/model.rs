use std::fmt;

use chrono::{Datelike, Months, NaiveDate};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Provider labels
// ---------------------------------------------------------------------------

pub const AMAZON: &str = "Amazon";
pub const AZURE: &str = "Azure";
pub const IBM_CLOUD: &str = "IBMCloud";

/// Map a `cloud_providers` key from the accounts file to the provider label
/// used by the sources. `aws` predates the aggregated source and is kept as
/// an alias.
pub fn provider_label(config_key: &str) -> String {
    if config_key == "aws" {
        AMAZON.to_string()
    } else {
        config_key.to_string()
    }
}

/// Whether a directory label and a source label name the same provider.
pub fn labels_agree(directory: &str, source: &str) -> bool {
    directory == source || (source == AMAZON && directory == "AWS")
}

// ---------------------------------------------------------------------------
// Reporting month
// ---------------------------------------------------------------------------

/// The calendar month a run reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReportMonth {
    first_day: NaiveDate,
}

impl ReportMonth {
    /// Parse a `YYYY-MM` string.
    pub fn parse(value: &str) -> Result<Self, ReconError> {
        let trimmed = value.trim();
        if trimmed.len() != 7 || trimmed.as_bytes()[4] != b'-' {
            return Err(ReconError::InvalidMonth(value.to_string()));
        }
        let first_day = NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
            .map_err(|_| ReconError::InvalidMonth(value.to_string()))?;
        Ok(Self { first_day })
    }

    /// The month before the one containing `today`.
    pub fn previous(today: NaiveDate) -> Self {
        let this_month = today.with_day(1).expect("day 1 exists in every month");
        let first_day = this_month
            .checked_sub_months(Months::new(1))
            .expect("previous month is representable");
        Self { first_day }
    }

    pub fn from_first_day(first_day: NaiveDate) -> Self {
        Self { first_day: first_day.with_day(1).unwrap_or(first_day) }
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    /// First day of the following month (the exclusive end of this one).
    pub fn next_month_start(&self) -> NaiveDate {
        self.first_day
            .checked_add_months(Months::new(1))
            .expect("next month is representable")
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next_month_start().pred_opt().unwrap_or(self.first_day)
    }

    pub fn year(&self) -> i32 {
        self.first_day.year()
    }

    pub fn month(&self) -> u32 {
        self.first_day.month()
    }

    /// Reject months that have not started yet.
    pub fn ensure_started(&self, today: NaiveDate) -> Result<(), ReconError> {
        if self.first_day > today {
            return Err(ReconError::FutureMonth(self.to_string()));
        }
        Ok(())
    }

    /// Inclusive end date for range queries: the last day of the month,
    /// clipped to `today` when the month is still in progress.
    pub fn inclusive_end(&self, today: NaiveDate) -> NaiveDate {
        let last = self.last_day();
        if last > today {
            tracing::warn!(month = %self, "specified month extends into the future; clipping to {today}");
            today
        } else {
            last
        }
    }
}

impl fmt::Display for ReportMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first_day.format("%Y-%m"))
    }
}

// ---------------------------------------------------------------------------
// Declared accounts
// ---------------------------------------------------------------------------

/// One account as declared in configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub account_id: String,
    /// Provider label (already translated from the config key).
    pub provider: String,
    /// Owning team.
    pub group: String,
    /// Cost bucket; defaults to the group name.
    pub category: String,
    /// Expected monthly spend; only checked when positive.
    pub expected_value: Option<Decimal>,
    /// Allowed deviation from `expected_value`, in whole percent.
    pub deviation_percent: u32,
    pub description: String,
}

// ---------------------------------------------------------------------------
// Source observations
// ---------------------------------------------------------------------------

/// One cost observation from a source adapter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostRecord {
    /// Account ID in the source's own format.
    pub account_id: String,
    pub account_name: String,
    pub provider: String,
    /// Usage family, service name, or bucket.
    pub category: String,
    pub amount: Decimal,
    pub currency: String,
    pub cost_center: String,
    pub payer_id: Option<String>,
    /// Reporting period as the source labels it (e.g. `2024-08`).
    pub reporting_date: String,
}

/// Display fields captured from the first record seen for an account.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AccountCostMetadata {
    pub account_name: String,
    pub cost_center: String,
    pub payer_id: String,
    pub reporting_date: String,
}

impl AccountCostMetadata {
    pub fn from_record(record: &CostRecord) -> Self {
        Self {
            account_name: record.account_name.clone(),
            cost_center: record.cost_center.clone(),
            payer_id: record.payer_id.clone().unwrap_or_default(),
            reporting_date: record.reporting_date.clone(),
        }
    }
}
