//! AWS Organizations: the account list as an alternative to the accounts
//! file, taken from the `costpuller_category` tag on each member account,
//! and the reverse operation that writes the tag from the accounts file.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::json;

use costpull_recon::model::AMAZON;
use costpull_recon::{AccountRecord, DirectoryEntry, FetchError};

use super::aws::{AwsCredentials, AwsJsonEndpoint};

pub const SOURCE_NAME: &str = "aws-organizations";
/// Tag holding an account's team; discovered accounts are grouped by it.
pub const CATEGORY_TAG: &str = "costpuller_category";

const SERVICE: &str = "organizations";
// Organizations is a global service homed in us-east-1.
const REGION: &str = "us-east-1";
const PAGE_SIZE: u32 = 20;
const ACTIVE: &str = "ACTIVE";

fn target(action: &str) -> String {
    format!("AWSOrganizationsV20161128.{action}")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountPage {
    #[serde(default)]
    accounts: Vec<OrgAccount>,
    #[serde(default)]
    next_token: Option<String>,
}

/// One member account as Organizations lists it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrgAccount {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagPage {
    #[serde(default)]
    tags: Vec<Tag>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    #[serde(default)]
    value: String,
}

pub struct OrganizationsClient {
    api: AwsJsonEndpoint,
}

impl OrganizationsClient {
    pub fn new(credentials: AwsCredentials) -> Self {
        Self::with_endpoint(credentials, format!("https://organizations.{REGION}.amazonaws.com/"))
    }

    pub fn with_endpoint(credentials: AwsCredentials, endpoint: String) -> Self {
        Self { api: AwsJsonEndpoint::new(SOURCE_NAME, SERVICE, credentials, REGION, endpoint) }
    }

    /// Every account in the organization, following `NextToken`.
    pub fn list_accounts(&self) -> Result<Vec<OrgAccount>, FetchError> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({ "MaxResults": PAGE_SIZE });
            if let Some(token) = &next_token {
                body["NextToken"] = json!(token);
            }
            let page: AccountPage = self.api.call(&target("ListAccounts"), &body)?;
            accounts.extend(page.accounts);
            next_token = page.next_token.filter(|t| !t.is_empty());
            if next_token.is_none() {
                break;
            }
            tracing::debug!(pulled = accounts.len(), "pulling more account metadata");
        }
        tracing::info!(accounts = accounts.len(), "organization accounts listed");
        Ok(accounts)
    }

    pub fn account_tags(&self, account_id: &str) -> Result<BTreeMap<String, String>, FetchError> {
        let mut tags = BTreeMap::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut body = json!({ "ResourceId": account_id });
            if let Some(token) = &next_token {
                body["NextToken"] = json!(token);
            }
            let page: TagPage = self.api.call(&target("ListTagsForResource"), &body)?;
            tags.extend(page.tags.into_iter().map(|t| (t.key, t.value)));
            next_token = page.next_token.filter(|t| !t.is_empty());
            if next_token.is_none() {
                return Ok(tags);
            }
        }
    }

    /// Active accounts carrying the category tag, as declared accounts of
    /// the team the tag names. Untagged accounts are logged and skipped.
    pub fn tagged_accounts(&self) -> Result<Vec<AccountRecord>, FetchError> {
        let accounts = self.list_accounts()?;
        let mut records = Vec::new();

        for (n, account) in accounts.iter().enumerate() {
            if account.status != ACTIVE {
                tracing::debug!(account = %account.id, status = %account.status, "skipping inactive account");
                continue;
            }
            tracing::debug!(account = %account.id, n = n + 1, of = accounts.len(), "pulling account tags");
            let tags = self.account_tags(&account.id)?;
            let Some(category) = tags.get(CATEGORY_TAG).filter(|c| !c.is_empty()) else {
                tracing::warn!(account = %account.id, name = %account.name, "account has no {} tag", CATEGORY_TAG);
                continue;
            };
            tracing::info!(account = %account.id, name = %account.name, category = %category, "tagged account found");
            records.push(AccountRecord {
                account_id: account.id.clone(),
                provider: AMAZON.to_string(),
                group: category.clone(),
                category: category.clone(),
                expected_value: None,
                deviation_percent: 0,
                description: account.name.clone(),
            });
        }

        records.sort_by(|a, b| (&a.group, &a.account_id).cmp(&(&b.group, &b.account_id)));
        Ok(records)
    }

    /// Tag each account with its team. With `dry_run` nothing is sent.
    /// Returns the number of accounts tagged (or that would have been).
    pub fn write_category_tags(&self, entries: &[&DirectoryEntry], dry_run: bool) -> Result<usize, FetchError> {
        for entry in entries {
            let resource_id = entry.canonical_id.replace('-', "");
            if dry_run {
                eprintln!("would set {CATEGORY_TAG} = {} on account {}", entry.group, entry.canonical_id);
                continue;
            }
            let body = json!({
                "ResourceId": resource_id,
                "Tags": [{ "Key": CATEGORY_TAG, "Value": entry.group }],
            });
            self.api.call_unit(&target("TagResource"), &body)?;
            tracing::info!(account = %entry.canonical_id, category = %entry.group, "account tagged");
        }
        Ok(entries.len())
    }
}
