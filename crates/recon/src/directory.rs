use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;

use crate::error::ReconError;
use crate::model::{labels_agree, AccountRecord, CostRecord, AMAZON, AZURE};

// ---------------------------------------------------------------------------
// ID shapes
// ---------------------------------------------------------------------------

/// Provider label, pattern, and human description of each fixed ID layout.
/// Each capture group is one hyphen-separated group of the canonical form.
const ID_PATTERNS: &[(&str, &str, &str)] = &[
    (
        AMAZON,
        r"^([0-9]{4})-?([0-9]{4})-?([0-9]{4})$",
        "NNNN-NNNN-NNNN (12 decimal digits)",
    ),
    (
        AZURE,
        r"^([0-9a-f]{8})-?([0-9a-f]{4})-?([0-9a-f]{4})-?([0-9a-f]{4})-?([0-9a-f]{12})$",
        "xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx (32 lowercase hex digits)",
    ),
];

/// Fixed account-ID layout for a provider.
#[derive(Debug)]
pub struct IdShape {
    pub provider: &'static str,
    pub description: &'static str,
    pattern: Regex,
}

fn id_shapes() -> &'static [IdShape] {
    static SHAPES: OnceLock<Vec<IdShape>> = OnceLock::new();
    SHAPES.get_or_init(|| {
        ID_PATTERNS
            .iter()
            .map(|&(provider, pattern, description)| IdShape {
                provider,
                description,
                pattern: Regex::new(pattern).expect("ID shape patterns are valid"),
            })
            .collect()
    })
}

/// The shape registered for a provider label, if any.
pub fn shape_for(provider: &str) -> Option<&'static IdShape> {
    id_shapes().iter().find(|s| labels_agree(s.provider, provider) || labels_agree(provider, s.provider))
}

impl IdShape {
    /// Match `raw` against the shape, accepting a hyphen (or none) at each
    /// group boundary, and re-emit it fully hyphenated.
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let caps = self.pattern.captures(raw)?;
        let groups: Vec<&str> = caps.iter().skip(1).flatten().map(|m| m.as_str()).collect();
        Some(groups.join("-"))
    }
}

/// Canonical form of `raw` for `provider`. Providers without a registered
/// shape pass through unchanged.
pub fn canonicalize(provider: &str, raw: &str) -> Result<String, ReconError> {
    match shape_for(provider) {
        None => Ok(raw.to_string()),
        Some(shape) => shape.canonicalize(raw).ok_or_else(|| ReconError::MalformedAccountId {
            provider: provider.to_string(),
            id: raw.to_string(),
            shape: shape.description,
        }),
    }
}

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub canonical_id: String,
    pub declared_id: String,
    pub group: String,
    pub category: String,
    pub provider: String,
    pub description: String,
    pub expected_value: Option<Decimal>,
    pub deviation_percent: u32,
    pub matched: bool,
}

/// Result of reconciling a source's provider label with the directory's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderLabelOutcome {
    /// Labels agree (including the `AWS`/`Amazon` alias).
    Kept,
    /// The source's label replaced the directory's.
    Corrected { from: String, to: String },
    /// The source supplied no label; the directory's label stays.
    Rejected,
}

/// A source record resolved to a directory entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub canonical_id: String,
    pub outcome: ProviderLabelOutcome,
}

/// Declared accounts keyed by canonical ID.
#[derive(Debug, Clone, Default)]
pub struct AccountDirectory {
    entries: BTreeMap<String, DirectoryEntry>,
}

impl AccountDirectory {
    /// Index the declared accounts. Fails on the first malformed ID or on
    /// two declarations that canonicalize to the same account.
    pub fn load(accounts: &[AccountRecord]) -> Result<Self, ReconError> {
        let mut entries: BTreeMap<String, DirectoryEntry> = BTreeMap::new();

        for account in accounts {
            let canonical_id = canonicalize(&account.provider, account.account_id.trim())?;
            if let Some(existing) = entries.get(&canonical_id) {
                return Err(ReconError::DuplicateAccount {
                    canonical_id,
                    first_group: existing.group.clone(),
                    second_group: account.group.clone(),
                });
            }
            let category = if account.category.is_empty() {
                account.group.clone()
            } else {
                account.category.clone()
            };
            entries.insert(
                canonical_id.clone(),
                DirectoryEntry {
                    canonical_id,
                    declared_id: account.account_id.clone(),
                    group: account.group.clone(),
                    category,
                    provider: account.provider.clone(),
                    description: account.description.clone(),
                    expected_value: account.expected_value,
                    deviation_percent: account.deviation_percent,
                    matched: false,
                },
            );
        }

        tracing::debug!(accounts = entries.len(), "account directory loaded");
        Ok(Self { entries })
    }

    pub fn lookup(&self, canonical_id: &str) -> Option<&DirectoryEntry> {
        self.entries.get(canonical_id)
    }

    /// All entries in canonical-ID order.
    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.values()
    }

    /// Entries declared under `provider` (alias-aware).
    pub fn entries_for(&self, provider: &str) -> Vec<&DirectoryEntry> {
        self.entries
            .values()
            .filter(|e| labels_agree(&e.provider, provider))
            .collect()
    }

    pub fn unmatched_entries(&self) -> Vec<&DirectoryEntry> {
        self.entries.values().filter(|e| !e.matched).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the entry a source record belongs to, mark it matched, and
    /// reconcile its provider label against the record's.
    ///
    /// The record ID is tried verbatim first, then in canonical form for the
    /// record's provider. Returns `None` for accounts that are not declared.
    pub fn resolve(&mut self, record: &CostRecord) -> Option<Resolution> {
        let key = self.find_key(&record.account_id, &record.provider)?;
        let entry = self.entries.get_mut(&key)?;
        entry.matched = true;

        let outcome = if record.provider.is_empty() {
            ProviderLabelOutcome::Rejected
        } else if labels_agree(&entry.provider, &record.provider) {
            ProviderLabelOutcome::Kept
        } else {
            let from = std::mem::replace(&mut entry.provider, record.provider.clone());
            ProviderLabelOutcome::Corrected { from, to: record.provider.clone() }
        };

        Some(Resolution { canonical_id: key, outcome })
    }

    fn find_key(&self, raw_id: &str, provider: &str) -> Option<String> {
        let raw_id = raw_id.trim();
        if self.entries.contains_key(raw_id) {
            return Some(raw_id.to_string());
        }
        let canonical = shape_for(provider)?.canonicalize(raw_id)?;
        self.entries.contains_key(&canonical).then_some(canonical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(provider: &str, id: &str, group: &str) -> AccountRecord {
        AccountRecord {
            account_id: id.into(),
            provider: provider.into(),
            group: group.into(),
            category: String::new(),
            expected_value: None,
            deviation_percent: 0,
            description: format!("{group} account"),
        }
    }

    fn record(provider: &str, id: &str) -> CostRecord {
        CostRecord {
            account_id: id.into(),
            account_name: "name".into(),
            provider: provider.into(),
            category: "Storage".into(),
            amount: Decimal::ONE,
            currency: "USD".into(),
            cost_center: String::new(),
            payer_id: None,
            reporting_date: "2024-08".into(),
        }
    }

    #[test]
    fn amazon_ids_are_hyphenated() {
        assert_eq!(canonicalize("Amazon", "123456789012").unwrap(), "1234-5678-9012");
        assert_eq!(canonicalize("Amazon", "1234-5678-9012").unwrap(), "1234-5678-9012");
        assert_eq!(canonicalize("Amazon", "1234-56789012").unwrap(), "1234-5678-9012");
        assert_eq!(canonicalize("AWS", "123456789012").unwrap(), "1234-5678-9012");
    }

    #[test]
    fn amazon_rejects_wrong_shapes() {
        for bad in ["12345678901", "1234567890123", "1234--5678-9012", "12-34567890123", "abcd56789012", "-123456789012"] {
            let err = canonicalize("Amazon", bad).unwrap_err();
            assert!(matches!(err, ReconError::MalformedAccountId { .. }), "{bad}");
            assert!(err.to_string().contains(bad));
        }
    }

    #[test]
    fn azure_ids_are_lowercase_hex() {
        let compact = "0123456789abcdef0123456789abcdef";
        assert_eq!(
            canonicalize("Azure", compact).unwrap(),
            "01234567-89ab-cdef-0123-456789abcdef"
        );
        assert!(canonicalize("Azure", "01234567-89AB-cdef-0123-456789abcdef").is_err());
        assert!(canonicalize("Azure", "01234567-89ab-cdef-0123-456789abcde").is_err());
    }

    #[test]
    fn every_pattern_compiles_to_a_shape() {
        assert_eq!(id_shapes().len(), ID_PATTERNS.len());
        assert_eq!(shape_for("AWS").map(|s| s.provider), Some(AMAZON));
        assert_eq!(shape_for("Azure").map(|s| s.provider), Some(AZURE));
        assert!(shape_for("IBMCloud").is_none());
    }

    #[test]
    fn unshaped_providers_pass_through() {
        assert_eq!(canonicalize("IBMCloud", "a1b2c3").unwrap(), "a1b2c3");
        assert_eq!(canonicalize("GCP", "My-Project").unwrap(), "My-Project");
    }

    #[test]
    fn load_rejects_duplicates_after_canonicalization() {
        let accounts = vec![
            account("Amazon", "123456789012", "Team A"),
            account("Amazon", "1234-5678-9012", "Team B"),
        ];
        match AccountDirectory::load(&accounts) {
            Err(ReconError::DuplicateAccount { canonical_id, first_group, second_group }) => {
                assert_eq!(canonical_id, "1234-5678-9012");
                assert_eq!(first_group, "Team A");
                assert_eq!(second_group, "Team B");
            }
            other => panic!("expected duplicate error, got {other:?}"),
        }
    }

    #[test]
    fn category_defaults_to_group() {
        let mut a = account("Amazon", "123456789012", "Team A");
        let dir = AccountDirectory::load(std::slice::from_ref(&a)).unwrap();
        assert_eq!(dir.lookup("1234-5678-9012").unwrap().category, "Team A");

        a.category = "Shared".into();
        let dir = AccountDirectory::load(&[a]).unwrap();
        assert_eq!(dir.lookup("1234-5678-9012").unwrap().category, "Shared");
    }

    #[test]
    fn resolve_tries_verbatim_then_canonical() {
        let mut dir = AccountDirectory::load(&[
            account("Amazon", "123456789012", "A"),
            account("IBMCloud", "ibm-1", "B"),
        ])
        .unwrap();

        let hit = dir.resolve(&record("Amazon", "123456789012")).unwrap();
        assert_eq!(hit.canonical_id, "1234-5678-9012");
        assert_eq!(hit.outcome, ProviderLabelOutcome::Kept);

        let hit = dir.resolve(&record("IBMCloud", "ibm-1")).unwrap();
        assert_eq!(hit.canonical_id, "ibm-1");

        assert!(dir.resolve(&record("Amazon", "999999999999")).is_none());
        assert!(dir.resolve(&record("Amazon", "not-an-id")).is_none());
        assert!(dir.unmatched_entries().is_empty());
    }

    #[test]
    fn provider_label_outcomes() {
        let mut dir = AccountDirectory::load(&[
            account("AWS", "123456789012", "A"),
            account("GCP", "proj-1", "B"),
            account("GCP", "proj-2", "C"),
        ])
        .unwrap();

        let alias = dir.resolve(&record("Amazon", "1234-5678-9012")).unwrap();
        assert_eq!(alias.outcome, ProviderLabelOutcome::Kept);
        assert_eq!(dir.lookup("1234-5678-9012").unwrap().provider, "AWS");

        let corrected = dir.resolve(&record("Google", "proj-1")).unwrap();
        assert_eq!(
            corrected.outcome,
            ProviderLabelOutcome::Corrected { from: "GCP".into(), to: "Google".into() }
        );
        assert_eq!(dir.lookup("proj-1").unwrap().provider, "Google");

        let rejected = dir.resolve(&record("", "proj-2")).unwrap();
        assert_eq!(rejected.outcome, ProviderLabelOutcome::Rejected);
        assert_eq!(dir.lookup("proj-2").unwrap().provider, "GCP");
    }

    #[test]
    fn unmatched_entries_shrink_as_records_resolve() {
        let mut dir = AccountDirectory::load(&[
            account("Amazon", "111111111111", "A"),
            account("Amazon", "222222222222", "B"),
        ])
        .unwrap();
        assert_eq!(dir.unmatched_entries().len(), 2);
        dir.resolve(&record("Amazon", "1111-1111-1111"));
        let left: Vec<_> = dir.unmatched_entries().iter().map(|e| e.canonical_id.clone()).collect();
        assert_eq!(left, vec!["2222-2222-2222".to_string()]);
    }
}
