//! IBM Cloud: the augmenting, resource-level bulk source.
//!
//! Flow: IAM API-key exchange → enterprise usage report for the configured
//! account group (the group itself names the cost center, its children
//! are the accounts) → one account summary per child. Every resource in a
//! summary becomes one record, bucketed through [`BucketTable`].

use serde::Deserialize;

use costpull_config::IbmCloudConfig;
use costpull_recon::adapter::USD;
use costpull_recon::model::IBM_CLOUD;
use costpull_recon::{BucketTable, BulkPull, BulkSource, CostRecord, FetchError, ReportMonth};

use super::common::{decimal_from_json, FetchClient, DEFAULT_TIMEOUT};

// ── Constants ───────────────────────────────────────────────────────

pub const SOURCE_NAME: &str = "ibmcloud";
const API_KEY_GRANT: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// Service roots; tests point all three at one mock server.
#[derive(Debug, Clone)]
pub struct IbmEndpoints {
    pub iam: String,
    pub enterprise: String,
    pub billing: String,
}

impl Default for IbmEndpoints {
    fn default() -> Self {
        Self {
            iam: "https://iam.cloud.ibm.com".to_string(),
            enterprise: "https://enterprise.cloud.ibm.com".to_string(),
            billing: "https://billing.cloud.ibm.com".to_string(),
        }
    }
}

impl IbmEndpoints {
    pub fn all(base: &str) -> Self {
        Self { iam: base.to_string(), enterprise: base.to_string(), billing: base.to_string() }
    }
}

// ── Response schema ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IamToken {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct UsageReports {
    #[serde(default)]
    reports: Vec<UsageReport>,
    #[serde(default)]
    next: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct UsageReport {
    entity_id: String,
    #[serde(default)]
    entity_name: String,
    #[serde(default)]
    billing_unit_id: String,
}

#[derive(Debug, Deserialize)]
struct AccountSummary {
    #[serde(default)]
    month: String,
    #[serde(default)]
    billing_currency_code: String,
    #[serde(default)]
    account_resources: Vec<Resource>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(default)]
    resource_id: String,
    #[serde(default)]
    resource_name: String,
    #[serde(default)]
    billable_cost: serde_json::Value,
}

// ── Client ──────────────────────────────────────────────────────────

pub struct IbmCloudClient {
    client: FetchClient,
    api_key: String,
    account_group_id: String,
    endpoints: IbmEndpoints,
    buckets: BucketTable,
}

impl IbmCloudClient {
    pub fn new(config: &IbmCloudConfig, buckets: BucketTable) -> Self {
        Self::with_endpoints(config, buckets, IbmEndpoints::default())
    }

    pub fn with_endpoints(config: &IbmCloudConfig, buckets: BucketTable, endpoints: IbmEndpoints) -> Self {
        Self {
            client: FetchClient::new(SOURCE_NAME, DEFAULT_TIMEOUT),
            api_key: config.api_key.clone(),
            account_group_id: config.account_id.clone(),
            endpoints,
            buckets,
        }
    }

    fn access_token(&self) -> Result<String, FetchError> {
        tracing::info!("creating IBM Cloud session");
        let request = self
            .client
            .http
            .post(format!("{}/identity/token", self.endpoints.iam))
            .header("Accept", "application/json")
            .form(&[("grant_type", API_KEY_GRANT), ("apikey", self.api_key.as_str())]);
        let token: IamToken = self.client.send_as(request)?;
        Ok(token.access_token)
    }

    fn usage_reports(&self, token: &str, month: &ReportMonth, children: bool) -> Result<Vec<UsageReport>, FetchError> {
        let what = if children { "enterprise summaries" } else { "account group" };
        tracing::info!(group = %self.account_group_id, "getting IBM Cloud {what}");
        let month_text = month.to_string();

        let request = self
            .client
            .http
            .get(format!("{}/v1/resource-usage-reports", self.endpoints.enterprise))
            .bearer_auth(token)
            .query(&[
                ("account_group_id", self.account_group_id.as_str()),
                ("month", month_text.as_str()),
                ("children", if children { "true" } else { "false" }),
            ]);
        let reports: UsageReports = self.client.send_as(request)?;
        if reports.next.as_ref().is_some_and(|n| !n.is_null()) {
            return Err(FetchError::Paginated { source_name: SOURCE_NAME.to_string() });
        }
        Ok(reports.reports)
    }

    fn account_summary(&self, token: &str, account_id: &str, month: &ReportMonth) -> Result<AccountSummary, FetchError> {
        tracing::info!(account = account_id, "getting IBM Cloud account summary");
        let request = self
            .client
            .http
            .get(format!("{}/v4/accounts/{}/summary/{}", self.endpoints.billing, account_id, month))
            .bearer_auth(token);
        self.client.send_as(request)
    }
}

impl BulkSource for IbmCloudClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    /// IBM Cloud reports one cost figure per resource, so the cost type
    /// does not apply.
    fn fetch(&self, month: &ReportMonth, _cost_type: &str) -> Result<BulkPull, FetchError> {
        let token = self.access_token()?;

        let group = self.usage_reports(&token, month, false)?;
        let cost_center = group
            .first()
            .map(|g| g.entity_name.clone())
            .ok_or_else(|| FetchError::schema(SOURCE_NAME, format!("account group {} not found", self.account_group_id)))?;

        let accounts = self.usage_reports(&token, month, true)?;
        let mut records = Vec::new();
        for account in &accounts {
            let summary = self.account_summary(&token, &account.entity_id, month)?;
            let currency = if summary.billing_currency_code.is_empty() {
                USD.to_string()
            } else {
                summary.billing_currency_code.clone()
            };
            let reporting_date = if summary.month.is_empty() { month.to_string() } else { summary.month.clone() };

            for resource in &summary.account_resources {
                let amount = decimal_from_json(&resource.billable_cost).ok_or_else(|| {
                    FetchError::schema(
                        SOURCE_NAME,
                        format!("cannot parse billable_cost for {} ({})", resource.resource_name, resource.resource_id),
                    )
                })?;
                records.push(CostRecord {
                    account_id: account.entity_id.clone(),
                    account_name: account.entity_name.clone(),
                    provider: IBM_CLOUD.to_string(),
                    category: self.buckets.bucket_for(&resource.resource_name).to_string(),
                    amount,
                    currency: currency.clone(),
                    cost_center: cost_center.clone(),
                    payer_id: Some(account.billing_unit_id.clone()).filter(|p| !p.is_empty()),
                    reporting_date: reporting_date.clone(),
                });
            }
        }
        tracing::info!(accounts = accounts.len(), records = records.len(), cost_center = %cost_center, "IBM Cloud data received");

        Ok(BulkPull { records, filters: Vec::new(), paginated: false })
    }
}
