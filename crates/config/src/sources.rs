// Per-source sections of the "configuration" block

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_AWS_PROFILE: &str = "default";
pub const DEFAULT_AWS_REGION: &str = "us-east-1";
pub const DEFAULT_OAUTH_PORT: u16 = 35355;
/// Cache directory for the OAuth token, relative to the user cache dir.
pub const DEFAULT_TOKEN_CACHE_DIR: &str = "gcloud";
pub const TOKEN_FILE_NAME: &str = "costpuller_token.json";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    pub cloudability: Option<CloudabilityConfig>,
    pub ibmcloud: Option<IbmCloudConfig>,
    pub aws: Option<AwsConfig>,
    pub gsheet: Option<GsheetConfig>,
    pub oauth: Option<OAuthConfig>,
}

impl Configuration {
    pub fn is_empty(&self) -> bool {
        self.cloudability.is_none()
            && self.ibmcloud.is_none()
            && self.aws.is_none()
            && self.gsheet.is_none()
            && self.oauth.is_none()
    }
}

// ── Cloudability ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CloudabilityConfig {
    /// API base URL, e.g. `https://api.cloudability.com`.
    pub api: String,
    pub api_key: Option<String>,
    pub api_key_pair: Option<Vec<String>>,
    #[serde(rename = "environmentId")]
    pub environment_id: Option<String>,
    /// Filter name → accepted values; each value becomes one `name==value`.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    /// The operator's cost center (`category4`); untracked accounts in it
    /// are warned about.
    pub cost_center: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudabilityAuth {
    ApiKey(String),
    KeyPair {
        access_key: String,
        secret: String,
        environment_id: String,
    },
}

impl CloudabilityConfig {
    /// `api_key` wins when present; otherwise a two-element `api_key_pair`
    /// plus `environmentId` is required.
    pub fn auth(&self) -> Result<CloudabilityAuth, ConfigError> {
        if let Some(key) = &self.api_key {
            return Ok(CloudabilityAuth::ApiKey(key.clone()));
        }
        let pair = self.api_key_pair.as_ref().ok_or_else(|| {
            ConfigError::invalid("cloudability", "api_key_pair", "either api_key or api_key_pair is required")
        })?;
        let [access_key, secret] = pair.as_slice() else {
            return Err(ConfigError::invalid(
                "cloudability",
                "api_key_pair",
                format!("expected 2 items, found {}", pair.len()),
            ));
        };
        let environment_id = self
            .environment_id
            .clone()
            .ok_or_else(|| ConfigError::invalid("cloudability", "environmentId", "required with api_key_pair"))?;
        Ok(CloudabilityAuth::KeyPair {
            access_key: access_key.clone(),
            secret: secret.clone(),
            environment_id,
        })
    }

    /// Query-string filter expressions in a stable order.
    pub fn filter_expressions(&self) -> Vec<String> {
        self.filters
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| format!("{name}=={v}")))
            .collect()
    }
}

// ── IBM Cloud ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct IbmCloudConfig {
    pub api_key: String,
    /// Enterprise account-group ID whose child accounts are pulled.
    pub account_id: String,
}

// ── AWS ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwsConfig {
    pub profile: Option<String>,
    pub region: Option<String>,
    /// Compare aggregated-source totals against Cost Explorer per account.
    #[serde(default)]
    pub cross_check: bool,
}

impl AwsConfig {
    pub fn profile(&self) -> &str {
        match self.profile.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => DEFAULT_AWS_PROFILE,
        }
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().filter(|r| !r.is_empty()).unwrap_or(DEFAULT_AWS_REGION)
    }
}

// ── Google Sheets ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorMatch {
    Exact,
    #[default]
    Contains,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GsheetConfig {
    pub spreadsheet_id: String,
    /// Time-layout template for the data tab name, e.g. `Raw 2006-01`.
    pub sheet_name_template: String,
    pub main_sheet_name: String,
    pub template_sheet_name: Option<String>,
    #[serde(default)]
    pub anchor_match: AnchorMatch,
    #[serde(default = "default_true")]
    pub auto_resize_columns: bool,
}

// ── OAuth ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u16),
    Text(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    /// Installed-app client credentials JSON. Falls back to
    /// `GOOGLE_APPLICATION_CREDENTIALS`, then the gcloud default location.
    pub credentials_file: Option<PathBuf>,
    /// Directory holding the token cache; relative paths live under the
    /// user cache directory.
    pub token_cache_path: Option<String>,
    port: Option<PortValue>,
}

impl OAuthConfig {
    pub fn port(&self) -> Result<u16, ConfigError> {
        match &self.port {
            None => Ok(DEFAULT_OAUTH_PORT),
            Some(PortValue::Number(p)) => Ok(*p),
            Some(PortValue::Text(s)) if s.is_empty() => Ok(DEFAULT_OAUTH_PORT),
            Some(PortValue::Text(s)) => s
                .parse()
                .map_err(|_| ConfigError::invalid("oauth", "port", format!("{s:?} is not a port number"))),
        }
    }

    /// Full path of the token cache file. `None` when no cache directory can
    /// be determined.
    pub fn token_cache_file(&self) -> Option<PathBuf> {
        let dir = self
            .token_cache_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_TOKEN_CACHE_DIR);
        let dir = PathBuf::from(dir);
        let dir = if dir.is_absolute() { dir } else { dirs::cache_dir()?.join(dir) };
        Some(dir.join(TOKEN_FILE_NAME))
    }

    pub fn credentials_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.credentials_file {
            return Some(path.clone());
        }
        if let Some(path) = std::env::var_os("GOOGLE_APPLICATION_CREDENTIALS") {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join("gcloud").join("application_default_credentials.json"))
    }
}
