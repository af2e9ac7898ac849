//! Cloudability cost report: the primary, aggregated bulk source.
//!
//! One `GET /v3/reporting/cost/run` covers every vendor and account the
//! configured filters admit. Auth is either an API key (basic auth) or an
//! Apptio access-key pair exchanged for an `apptio-opentoken`.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;

use costpull_config::{CloudabilityAuth, CloudabilityConfig};
use costpull_recon::adapter::USD;
use costpull_recon::{BulkPull, BulkSource, CostRecord, FetchError, ReportMonth};

use super::common::{decimal_from_json, FetchClient};

// ── Constants ───────────────────────────────────────────────────────

pub const SOURCE_NAME: &str = "cloudability";
pub const APPTIO_LOGIN_URL: &str = "https://frontdoor.apptio.com/service/apikeylogin";
const REPORT_PATH: &str = "/v3/reporting/cost/run";
const DIMENSIONS: &str =
    "vendor,category4,account_identifier,vendor_account_name,vendor_account_identifier,usage_family";
const REPORT_TIMEOUT: Duration = Duration::from_secs(180);

/// Cost-type names as Cost Explorer spells them map onto Cloudability
/// metric names; only the default differs.
pub fn metric_for(cost_type: &str) -> String {
    match cost_type {
        "UnblendedCost" => "unblended_cost".to_string(),
        other => other.to_string(),
    }
}

// ── Response schema ─────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct CostReport {
    #[serde(default)]
    results: Vec<ResultRow>,
    #[serde(default)]
    pagination: Pagination,
    #[serde(default)]
    meta: Meta,
    #[serde(default)]
    total_results: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    next: String,
}

#[derive(Debug, Default, Deserialize)]
struct Meta {
    #[serde(default)]
    filters: Vec<FilterEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct FilterEntry {
    #[serde(default)]
    comparator: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    measure: Measure,
}

#[derive(Debug, Default, Deserialize)]
struct Measure {
    #[serde(default)]
    label: String,
    #[serde(default)]
    name: String,
}

impl FilterEntry {
    fn render(&self) -> String {
        let label = if self.measure.label.is_empty() { &self.measure.name } else { &self.measure.label };
        format!("{:?} {} {:?}", label, self.comparator, self.value)
    }
}

#[derive(Debug, Deserialize)]
struct ResultRow {
    #[serde(default)]
    vendor_account_identifier: String,
    #[serde(default)]
    vendor_account_name: String,
    #[serde(default)]
    vendor: String,
    #[serde(default)]
    category4: String,
    #[serde(default)]
    account_identifier: String,
    #[serde(default)]
    usage_family: String,
    /// Metric columns, keyed by metric name.
    #[serde(flatten)]
    metrics: BTreeMap<String, serde_json::Value>,
}

// ── Client ──────────────────────────────────────────────────────────

pub struct CloudabilityClient {
    client: FetchClient,
    api_base: String,
    login_url: String,
    auth: CloudabilityAuth,
    filters: Vec<String>,
    today: NaiveDate,
}

impl CloudabilityClient {
    pub fn new(config: &CloudabilityConfig, auth: CloudabilityAuth, today: NaiveDate) -> Self {
        Self::with_login_url(config, auth, today, APPTIO_LOGIN_URL.to_string())
    }

    pub fn with_login_url(
        config: &CloudabilityConfig,
        auth: CloudabilityAuth,
        today: NaiveDate,
        login_url: String,
    ) -> Self {
        let api = config.api.trim().trim_end_matches('/');
        let api_base = if api.contains("://") { api.to_string() } else { format!("https://{api}") };
        Self {
            client: FetchClient::new(SOURCE_NAME, REPORT_TIMEOUT),
            api_base,
            login_url,
            auth,
            filters: config.filter_expressions(),
            today,
        }
    }

    /// Exchange the access-key pair for a session token.
    fn open_token(&self, access_key: &str, secret: &str) -> Result<String, FetchError> {
        tracing::info!("requesting Cloudability authorization");
        let request = self
            .client
            .http
            .post(&self.login_url)
            .header("Accept", "application/json")
            .json(&serde_json::json!({ "keyAccess": access_key, "keySecret": secret }));
        let resp = self.client.send(request)?;
        resp.headers()
            .get("apptio-opentoken")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
            .ok_or_else(|| FetchError::auth(SOURCE_NAME, "login response carried no apptio-opentoken"))
    }

    fn report_request(
        &self,
        month: &ReportMonth,
        metric: &str,
    ) -> Result<reqwest::blocking::RequestBuilder, FetchError> {
        let start = month.first_day();
        let end = month.inclusive_end(self.today);

        let mut query: Vec<(&str, String)> = vec![
            ("start_date", start.format("%Y-%m-%d").to_string()),
            ("end_date", end.format("%Y-%m-%d").to_string()),
            ("dimensions", DIMENSIONS.to_string()),
            ("metrics", metric.to_string()),
        ];
        query.extend(self.filters.iter().map(|f| ("filters", f.clone())));
        query.push(("limit", "0".to_string()));

        let request = self
            .client
            .http
            .get(format!("{}{}", self.api_base, REPORT_PATH))
            .query(&query)
            .header("Accept", "application/json");

        Ok(match &self.auth {
            CloudabilityAuth::ApiKey(key) => request.basic_auth(key, Some("")),
            CloudabilityAuth::KeyPair { access_key, secret, environment_id } => {
                let token = self.open_token(access_key, secret)?;
                request
                    .header("apptio-opentoken", token)
                    .header("apptio-environmentid", environment_id)
            }
        })
    }
}

impl BulkSource for CloudabilityClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn fetch(&self, month: &ReportMonth, cost_type: &str) -> Result<BulkPull, FetchError> {
        let metric = metric_for(cost_type);
        let request = self.report_request(month, &metric)?;

        tracing::info!(%month, metric = %metric, filters = self.filters.len(), "requesting Cloudability cost report");
        let report: CostReport = self.client.send_as(request)?;
        tracing::info!(rows = report.results.len(), total_results = report.total_results, "processing Cloudability results");

        let reporting_date = month.to_string();
        let records = report
            .results
            .iter()
            .map(|row| {
                let raw = row.metrics.get(&metric).unwrap_or(&serde_json::Value::Null);
                let amount = decimal_from_json(raw).ok_or_else(|| {
                    FetchError::schema(
                        SOURCE_NAME,
                        format!(
                            "cannot parse {} for {}:{} ({})",
                            metric, row.vendor_account_identifier, row.usage_family, raw
                        ),
                    )
                })?;
                Ok(CostRecord {
                    account_id: row.vendor_account_identifier.clone(),
                    account_name: row.vendor_account_name.clone(),
                    provider: row.vendor.clone(),
                    category: row.usage_family.clone(),
                    amount,
                    currency: USD.to_string(),
                    cost_center: row.category4.clone(),
                    payer_id: Some(row.account_identifier.clone()).filter(|p| !p.is_empty()),
                    reporting_date: reporting_date.clone(),
                })
            })
            .collect::<Result<Vec<_>, FetchError>>()?;

        Ok(BulkPull {
            records,
            filters: report.meta.filters.iter().map(FilterEntry::render).collect(),
            paginated: !report.pagination.next.is_empty(),
        })
    }
}
