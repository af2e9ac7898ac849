//! AWS Cost Explorer: the scoped, per-account source.
//!
//! Each account costs two `GetCostAndUsage` calls: one grouped by
//! `SERVICE` for the breakdown and one ungrouped for AWS's own total.
//! Requests are signed with SigV4 against the `ce` service. Credentials,
//! signing and the JSON-1.1 transport are shared with the Organizations
//! client.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use costpull_config::AwsConfig;
use costpull_recon::model::AMAZON;
use costpull_recon::{CostRecord, FetchError, ReportMonth, ScopedPull, ScopedSource};

use crate::exit_codes;
use crate::CliError;

use super::common::{decimal_from_json, FetchClient, DEFAULT_TIMEOUT};

// ── Constants ───────────────────────────────────────────────────────

pub const SOURCE_NAME: &str = "aws";
const SERVICE: &str = "ce";
const GET_COST_AND_USAGE: &str = "AWSInsightsIndexService.GetCostAndUsage";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";
const ALGORITHM: &str = "AWS4-HMAC-SHA256";

type HmacSha256 = Hmac<Sha256>;

// ── Credentials ─────────────────────────────────────────────────────

#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl AwsCredentials {
    /// Environment first, then the shared credentials file.
    pub fn resolve(config: &AwsConfig) -> Result<Self, CliError> {
        if let Some(creds) = Self::from_vars(|k| std::env::var(k).ok()) {
            tracing::debug!("using AWS credentials from the environment");
            return Ok(creds);
        }

        let path = shared_credentials_path().ok_or_else(|| {
            CliError {
                code: exit_codes::EXIT_FETCH_NOT_AUTH,
                message: "no AWS credentials: environment is empty and no home directory".to_string(),
                hint: None,
            }
            .with_hint("set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY")
        })?;

        let profile = std::env::var("AWS_PROFILE").ok().filter(|p| !p.is_empty());
        let profile = profile.as_deref().unwrap_or(config.profile());
        let creds = std::fs::read_to_string(&path)
            .ok()
            .and_then(|text| parse_credentials_file(&text, profile));

        match creds {
            Some(creds) => {
                tracing::debug!(profile, path = %path.display(), "using AWS credentials from profile");
                Ok(creds)
            }
            None => Err(CliError {
                code: exit_codes::EXIT_FETCH_NOT_AUTH,
                message: format!("no AWS credentials for profile '{}' in {}", profile, path.display()),
                hint: None,
            }
            .with_hint("set AWS_ACCESS_KEY_ID/AWS_SECRET_ACCESS_KEY or configure the profile in ~/.aws/credentials")),
        }
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let non_empty = |k: &str| lookup(k).filter(|v| !v.is_empty());
        Some(Self {
            access_key_id: non_empty("AWS_ACCESS_KEY_ID")?,
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY")?,
            session_token: non_empty("AWS_SESSION_TOKEN"),
        })
    }
}

fn shared_credentials_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os("AWS_SHARED_CREDENTIALS_FILE") {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".aws").join("credentials"))
}

/// Read one `[profile]` section of an INI-style credentials file.
pub fn parse_credentials_file(text: &str, profile: &str) -> Option<AwsCredentials> {
    let mut section: Option<&str> = None;
    let mut values: BTreeMap<&str, &str> = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            section = Some(name.trim());
            continue;
        }
        if section != Some(profile) {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim(), value.trim());
        }
    }

    let get = |k: &str| values.get(k).filter(|v| !v.is_empty()).map(|v| v.to_string());
    Some(AwsCredentials {
        access_key_id: get("aws_access_key_id")?,
        secret_access_key: get("aws_secret_access_key")?,
        session_token: get("aws_session_token"),
    })
}

// ── SigV4 ───────────────────────────────────────────────────────────

fn hmac(key: &[u8], data: &str) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Headers for one signed JSON-1.1 POST to `/` invoking `target` on
/// `service`. Returned in the order they were signed; `host` is left to the
/// transport.
pub fn sign_request(
    creds: &AwsCredentials,
    region: &str,
    service: &str,
    target: &str,
    host: &str,
    body: &[u8],
    now: DateTime<Utc>,
) -> Vec<(&'static str, String)> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();

    let mut headers: Vec<(&'static str, String)> = vec![
        ("content-type", CONTENT_TYPE.to_string()),
        ("host", host.to_string()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(token) = &creds.session_token {
        headers.push(("x-amz-security-token", token.clone()));
    }
    headers.push(("x-amz-target", target.to_string()));

    let canonical_headers: String = headers.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();
    let signed_headers = headers.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(";");
    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers,
        signed_headers,
        sha256_hex(body)
    );

    let scope = format!("{date}/{region}/{service}/aws4_request");
    let string_to_sign = format!(
        "{ALGORITHM}\n{amz_date}\n{scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac(format!("AWS4{}", creds.secret_access_key).as_bytes(), &date);
    let k_region = hmac(&k_date, region);
    let k_service = hmac(&k_region, service);
    let k_signing = hmac(&k_service, "aws4_request");
    let signature = hex::encode(hmac(&k_signing, &string_to_sign));

    headers.retain(|(k, _)| *k != "host");
    headers.push((
        "authorization",
        format!(
            "{ALGORITHM} Credential={}/{scope}, SignedHeaders={signed_headers}, Signature={signature}",
            creds.access_key_id
        ),
    ));
    headers
}

// ── Response schema ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CostAndUsage {
    #[serde(default)]
    results_by_time: Vec<ResultByTime>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultByTime {
    #[serde(default)]
    total: BTreeMap<String, MetricValue>,
    #[serde(default)]
    groups: Vec<Group>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Group {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    metrics: BTreeMap<String, MetricValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MetricValue {
    amount: serde_json::Value,
    unit: String,
}

// ── Transport ───────────────────────────────────────────────────────

/// Signed JSON-1.1 calls to one AWS service endpoint.
pub(crate) struct AwsJsonEndpoint {
    client: FetchClient,
    source_name: &'static str,
    endpoint: String,
    host: String,
    region: String,
    service: &'static str,
    credentials: AwsCredentials,
}

impl AwsJsonEndpoint {
    pub(crate) fn new(
        source_name: &'static str,
        service: &'static str,
        credentials: AwsCredentials,
        region: &str,
        endpoint: String,
    ) -> Self {
        let host = host_of(&endpoint);
        Self {
            client: FetchClient::new(source_name, DEFAULT_TIMEOUT),
            source_name,
            endpoint,
            host,
            region: region.to_string(),
            service,
            credentials,
        }
    }

    fn request(&self, target: &str, body: &serde_json::Value) -> Result<reqwest::blocking::RequestBuilder, FetchError> {
        let payload = serde_json::to_vec(body)
            .map_err(|e| FetchError::schema(self.source_name, format!("cannot encode request: {e}")))?;
        let headers = sign_request(
            &self.credentials,
            &self.region,
            self.service,
            target,
            &self.host,
            &payload,
            Utc::now(),
        );

        let mut request = self.client.http.post(&self.endpoint);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        Ok(request.body(payload))
    }

    /// Invoke `target` and decode the reply.
    pub(crate) fn call<T: DeserializeOwned>(&self, target: &str, body: &serde_json::Value) -> Result<T, FetchError> {
        self.client.send_as(self.request(target, body)?)
    }

    /// Invoke `target` for its effect; the reply body is ignored.
    pub(crate) fn call_unit(&self, target: &str, body: &serde_json::Value) -> Result<(), FetchError> {
        self.client.send(self.request(target, body)?).map(|_| ())
    }
}

// ── Client ──────────────────────────────────────────────────────────

pub struct CostExplorerClient {
    api: AwsJsonEndpoint,
}

impl CostExplorerClient {
    pub fn new(credentials: AwsCredentials, region: &str) -> Self {
        Self::with_endpoint(credentials, region, format!("https://ce.{region}.amazonaws.com/"))
    }

    pub fn with_endpoint(credentials: AwsCredentials, region: &str, endpoint: String) -> Self {
        Self { api: AwsJsonEndpoint::new(SOURCE_NAME, SERVICE, credentials, region, endpoint) }
    }

    fn call(&self, body: serde_json::Value) -> Result<CostAndUsage, FetchError> {
        self.api.call(GET_COST_AND_USAGE, &body)
    }
}

/// `host[:port]` as the transport will send it.
fn host_of(endpoint: &str) -> String {
    match url::Url::parse(endpoint) {
        Ok(url) => match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => endpoint.to_string(),
        },
        Err(_) => endpoint.to_string(),
    }
}

/// Request body for one account and month. Cost Explorer wants the bare
/// 12 digits and an exclusive end date.
fn query_body(account_id: &str, month: &ReportMonth, cost_type: &str, grouped: bool) -> serde_json::Value {
    let mut body = json!({
        "TimePeriod": {
            "Start": month.first_day().format("%Y-%m-%d").to_string(),
            "End": month.next_month_start().format("%Y-%m-%d").to_string(),
        },
        "Granularity": "MONTHLY",
        "Metrics": [cost_type],
        "Filter": {
            "Dimensions": { "Key": "LINKED_ACCOUNT", "Values": [account_id.replace('-', "")] }
        },
    });
    if grouped {
        body["GroupBy"] = json!([{ "Type": "DIMENSION", "Key": "SERVICE" }]);
    }
    body
}

fn single_period(response: CostAndUsage, account_id: &str, what: &str) -> Result<ResultByTime, FetchError> {
    if response.next_page_token.as_deref().is_some_and(|t| !t.is_empty()) {
        return Err(FetchError::Paginated { source_name: SOURCE_NAME.to_string() });
    }
    let count = response.results_by_time.len();
    let mut periods = response.results_by_time.into_iter();
    match (periods.next(), count) {
        (Some(period), 1) => Ok(period),
        _ => Err(FetchError::schema(
            SOURCE_NAME,
            format!("{what} report for account {account_id} has {count} result periods, expected 1"),
        )),
    }
}

fn parse_amount(value: &MetricValue, account_id: &str, what: &str) -> Result<rust_decimal::Decimal, FetchError> {
    decimal_from_json(&value.amount).ok_or_else(|| {
        FetchError::schema(SOURCE_NAME, format!("cannot parse {what} amount {} for account {account_id}", value.amount))
    })
}

impl ScopedSource for CostExplorerClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn fetch_scoped(&self, account_id: &str, month: &ReportMonth, cost_type: &str) -> Result<ScopedPull, FetchError> {
        tracing::info!(account = account_id, %month, cost_type, "requesting Cost Explorer breakdown");
        let by_service = single_period(self.call(query_body(account_id, month, cost_type, true))?, account_id, "service")?;
        let total = single_period(self.call(query_body(account_id, month, cost_type, false))?, account_id, "total")?;

        let total_metric = total.total.get(cost_type).ok_or_else(|| {
            FetchError::schema(SOURCE_NAME, format!("total report for account {account_id} has no {cost_type}"))
        })?;
        let total_amount = parse_amount(total_metric, account_id, "total")?;

        let reporting_date = month.to_string();
        let mut records = Vec::with_capacity(by_service.groups.len());
        for group in &by_service.groups {
            let [service] = group.keys.as_slice() else {
                return Err(FetchError::schema(
                    SOURCE_NAME,
                    format!("service group for account {account_id} has {} keys, expected 1", group.keys.len()),
                ));
            };
            let metric = group.metrics.get(cost_type).ok_or_else(|| {
                FetchError::schema(SOURCE_NAME, format!("service {service} for account {account_id} has no {cost_type}"))
            })?;
            records.push(CostRecord {
                account_id: account_id.to_string(),
                account_name: String::new(),
                provider: AMAZON.to_string(),
                category: service.clone(),
                amount: parse_amount(metric, account_id, "service")?,
                currency: metric.unit.clone(),
                cost_center: String::new(),
                payer_id: None,
                reporting_date: reporting_date.clone(),
            });
        }
        tracing::debug!(account = account_id, services = records.len(), total = %total_amount, "Cost Explorer breakdown received");

        Ok(ScopedPull {
            account_id: account_id.to_string(),
            records,
            total: total_amount,
            unit: total_metric.unit.clone(),
        })
    }
}
