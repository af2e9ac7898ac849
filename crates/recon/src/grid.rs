use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use rust_decimal::Decimal;

use crate::adapter::USD;
use crate::check::account_total;
use crate::directory::{AccountDirectory, ProviderLabelOutcome};
use crate::error::ReconError;
use crate::model::{AccountCostMetadata, CostRecord, IBM_CLOUD};

/// How a pass treats a second amount for a cell it already filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPolicy {
    /// Primary aggregated source: one amount per (account, category).
    RejectDuplicates,
    /// Resource-level source: amounts for the same bucket are summed.
    Accumulate,
}

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions<'a> {
    pub source_name: &'a str,
    pub policy: IngestPolicy,
    /// The operator's own cost center; untracked accounts outside it are
    /// only logged at debug level.
    pub cost_center: Option<&'a str>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestSummary {
    pub records: usize,
    pub matched: usize,
    pub untracked: usize,
    /// Canonical IDs of the accounts this pass populated.
    pub accounts: BTreeSet<String>,
    pub corrections: Vec<(String, ProviderLabelOutcome)>,
}

/// Sparse `account × category → amount` grid.
#[derive(Debug, Clone, Default)]
pub struct CostGrid {
    rows: BTreeMap<String, BTreeMap<String, Decimal>>,
    categories: BTreeSet<String>,
    metadata: BTreeMap<String, AccountCostMetadata>,
    /// Which pass (index, source name) populated each account.
    owners: BTreeMap<String, (usize, String)>,
    untracked_seen: HashSet<String>,
    passes: usize,
}

impl CostGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one source pass into the grid.
    pub fn ingest(
        &mut self,
        records: &[CostRecord],
        directory: &mut AccountDirectory,
        options: IngestOptions<'_>,
    ) -> Result<IngestSummary, ReconError> {
        let pass = self.passes;
        self.passes += 1;
        let mut summary = IngestSummary { records: records.len(), ..Default::default() };

        for record in records {
            if record.currency != USD {
                return Err(ReconError::UnitMismatch {
                    source_name: options.source_name.to_string(),
                    account: record.account_id.clone(),
                    unit: record.currency.clone(),
                });
            }

            let Some(resolution) = directory.resolve(record) else {
                summary.untracked += 1;
                self.note_untracked(record, &options);
                continue;
            };
            let account = resolution.canonical_id;
            summary.matched += 1;

            if let ProviderLabelOutcome::Corrected { from, to } = &resolution.outcome {
                tracing::warn!(
                    source = options.source_name,
                    account = %account,
                    "account listed under provider {from:?} but source reports {to:?}; using {to:?}"
                );
                summary.corrections.push((account.clone(), resolution.outcome.clone()));
            }

            match self.owners.get(&account) {
                Some((owner_pass, owner)) if *owner_pass != pass => {
                    return Err(ReconError::AccountAlreadyPopulated {
                        source_name: options.source_name.to_string(),
                        account,
                        previous: owner.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    self.owners.insert(account.clone(), (pass, options.source_name.to_string()));
                }
            }

            self.categories.insert(record.category.clone());
            self.metadata
                .entry(account.clone())
                .or_insert_with(|| AccountCostMetadata::from_record(record));

            let row = self.rows.entry(account.clone()).or_default();
            match options.policy {
                IngestPolicy::RejectDuplicates => {
                    if let Some(first) = row.get(&record.category) {
                        return Err(ReconError::DuplicateCell {
                            source_name: options.source_name.to_string(),
                            account,
                            category: record.category.clone(),
                            first: *first,
                            second: record.amount,
                        });
                    }
                    row.insert(record.category.clone(), record.amount);
                }
                IngestPolicy::Accumulate => {
                    *row.entry(record.category.clone()).or_insert(Decimal::ZERO) += record.amount;
                }
            }
            summary.accounts.insert(account);
        }

        tracing::info!(
            source = options.source_name,
            records = summary.records,
            matched = summary.matched,
            untracked = summary.untracked,
            accounts = summary.accounts.len(),
            "ingested source pass"
        );
        Ok(summary)
    }

    fn note_untracked(&mut self, record: &CostRecord, options: &IngestOptions<'_>) {
        if !self.untracked_seen.insert(record.account_id.clone()) {
            return;
        }
        let ours = options.cost_center.map_or(true, |cc| cc == record.cost_center);
        if ours {
            tracing::warn!(
                source = options.source_name,
                cost_center = %record.cost_center,
                provider = %record.provider,
                account = %record.account_id,
                name = %record.account_name,
                "account is not tracked in the accounts file"
            );
        } else {
            tracing::debug!(
                source = options.source_name,
                cost_center = %record.cost_center,
                provider = %record.provider,
                account = %record.account_id,
                name = %record.account_name,
                "account is not tracked in the accounts file"
            );
        }
    }

    /// Category → amount for one account.
    pub fn row(&self, account: &str) -> Option<&BTreeMap<String, Decimal>> {
        self.rows.get(account)
    }

    /// The cell amount, zero when absent.
    pub fn amount(&self, account: &str, category: &str) -> Decimal {
        self.rows
            .get(account)
            .and_then(|row| row.get(category))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    /// Sum of an account's row, zero for accounts with no data.
    pub fn total(&self, account: &str) -> Decimal {
        self.rows.get(account).map(account_total).unwrap_or(Decimal::ZERO)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &String> {
        self.rows.keys()
    }

    /// Discovered categories, sorted.
    pub fn categories(&self) -> &BTreeSet<String> {
        &self.categories
    }

    pub fn metadata(&self, account: &str) -> Option<&AccountCostMetadata> {
        self.metadata.get(account)
    }

    pub fn contains(&self, account: &str) -> bool {
        self.rows.contains_key(account)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Missing accounts
// ---------------------------------------------------------------------------

/// Providers the aggregated source never covers; their missing-account
/// notices omit the bulk filters.
const OUTSIDE_BULK_SOURCE: &[&str] = &[IBM_CLOUD];

/// A declared account that no source reported.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingAccount {
    pub provider: String,
    pub group: String,
    pub account_id: String,
    pub filters: Vec<String>,
}

impl fmt::Display for MissingAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no cost data found for {} account {} ({})",
            self.provider, self.account_id, self.group
        )?;
        if !self.filters.is_empty() {
            write!(f, " with filters {}", self.filters.join(" && "))?;
        }
        Ok(())
    }
}

/// One notice per declared account that is still unmatched, in directory
/// order. Each is logged at warn.
pub fn report_missing(directory: &AccountDirectory, filters: &[String]) -> Vec<MissingAccount> {
    directory
        .unmatched_entries()
        .into_iter()
        .map(|entry| {
            let filters = if OUTSIDE_BULK_SOURCE.contains(&entry.provider.as_str()) {
                Vec::new()
            } else {
                filters.to_vec()
            };
            let missing = MissingAccount {
                provider: entry.provider.clone(),
                group: entry.group.clone(),
                account_id: entry.canonical_id.clone(),
                filters,
            };
            tracing::warn!("{missing}");
            missing
        })
        .collect()
}
