// Accounts file: source configuration plus the declared account list
// Loaded from accounts.yaml (or --accounts)

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use costpull_recon::model::provider_label;
use costpull_recon::{AccountDirectory, AccountRecord};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::sources::Configuration;

pub const DEFAULT_ACCOUNTS_FILE: &str = "accounts.yaml";

/// One declared account as written in the file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountEntry {
    #[serde(rename = "accountid")]
    pub account_id: String,
    /// Plain or quoted decimal; quoting keeps every digit as written.
    #[serde(rename = "standardvalue", default)]
    pub standard_value: Option<Decimal>,
    #[serde(rename = "deviationpercent", default)]
    pub deviation_percent: Option<u32>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub description: String,
}

/// provider key → team → accounts
pub type Providers = BTreeMap<String, BTreeMap<String, Vec<AccountEntry>>>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountsFile {
    #[serde(default)]
    pub configuration: Configuration,
    #[serde(default)]
    pub cloud_providers: Providers,
}

impl AccountsFile {
    /// Read and validate an accounts file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = Self::from_yaml(&text)?;
        tracing::debug!(path = %path.display(), accounts = file.account_count(), "loaded accounts file");
        Ok(file)
    }

    /// Parse and validate accounts-file text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let file: Self = serde_yaml::from_str(text)?;
        file.validate()?;
        Ok(file)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.configuration.is_empty() {
            return Err(ConfigError::EmptySection("configuration"));
        }
        if self.cloud_providers.values().all(|teams| teams.is_empty()) {
            return Err(ConfigError::EmptySection("cloud_providers"));
        }
        for teams in self.cloud_providers.values() {
            for entry in teams.values().flatten() {
                if entry.account_id.trim().is_empty() {
                    return Err(ConfigError::invalid("cloud_providers", "accountid", "must not be empty"));
                }
            }
        }
        Ok(())
    }

    pub fn account_count(&self) -> usize {
        self.cloud_providers.values().flat_map(|t| t.values()).map(Vec::len).sum()
    }

    /// Flatten the provider/team tree into account records, translating
    /// provider keys to source labels. Teams are visited in name order.
    pub fn account_records(&self) -> Vec<AccountRecord> {
        let mut records = Vec::with_capacity(self.account_count());
        for (provider_key, teams) in &self.cloud_providers {
            let provider = provider_label(provider_key);
            for (team, entries) in teams {
                for entry in entries {
                    records.push(AccountRecord {
                        account_id: entry.account_id.trim().to_string(),
                        provider: provider.clone(),
                        group: team.clone(),
                        category: entry.category.clone(),
                        expected_value: entry.standard_value,
                        deviation_percent: entry.deviation_percent.unwrap_or(0),
                        description: entry.description.clone(),
                    });
                }
            }
        }
        records
    }

    /// Build the account directory, failing on malformed or duplicate IDs.
    pub fn directory(&self) -> Result<AccountDirectory, ConfigError> {
        Ok(AccountDirectory::load(&self.account_records())?)
    }
}
