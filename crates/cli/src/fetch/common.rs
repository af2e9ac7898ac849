//! Shared infrastructure for the billing source adapters.
//!
//! Each adapter (cloudability, aws, ibmcloud) reuses:
//! - `FetchClient`: blocking HTTP client with error classification
//! - `decimal_from_json`: amounts arrive as JSON strings or numbers
//!
//! # Transport contract
//!
//! - **One attempt per call.** No retries, no backoff; any failure is fatal
//!   to the run.
//! - **Status mapping**: 401/403 → `FetchError::Auth`, 429 →
//!   `FetchError::RateLimited`, any other non-2xx or network failure →
//!   `FetchError::Upstream`, an undecodable body → `FetchError::Schema`.
//! - **Timeouts** belong to the client: 30 s by default, longer for the
//!   Cloudability report.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use costpull_recon::FetchError;

// ── Constants ───────────────────────────────────────────────────────

pub(crate) const USER_AGENT: &str = concat!("costpull/", env!("CARGO_PKG_VERSION"));
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ── FetchClient ─────────────────────────────────────────────────────

/// Shared HTTP client that classifies failures into [`FetchError`]s.
///
/// Adapters own their base URLs and auth. They build each request on
/// [`FetchClient::http`] and hand it to [`FetchClient::send`] or one of
/// the decoding helpers.
pub(crate) struct FetchClient {
    pub(crate) http: reqwest::blocking::Client,
    source_name: String,
}

impl FetchClient {
    pub(crate) fn new(source_name: &str, timeout: Duration) -> Self {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            source_name: source_name.to_string(),
        }
    }

    /// Send once and return the response if its status is a success.
    pub(crate) fn send(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response, FetchError> {
        let resp = request
            .send()
            .map_err(|e| FetchError::upstream(&self.source_name, e.to_string()))?;

        let status = resp.status().as_u16();
        if (200..300).contains(&status) {
            return Ok(resp);
        }

        let body = resp.text().unwrap_or_default();
        let message = format!("HTTP {}: {}", status, error_message(&body));
        tracing::debug!(source = %self.source_name, status, body = %truncate(&body, 500), "request failed");

        Err(match status {
            401 | 403 => FetchError::auth(&self.source_name, message),
            429 => FetchError::RateLimited {
                source_name: self.source_name.clone(),
                message,
            },
            _ => FetchError::upstream(&self.source_name, message),
        })
    }

    /// Send once and decode the body into `T`.
    pub(crate) fn send_as<T: DeserializeOwned>(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> Result<T, FetchError> {
        let resp = self.send(request)?;
        let text = resp.text().map_err(|e| {
            FetchError::upstream(&self.source_name, format!("failed to read response body: {e}"))
        })?;
        // Some gateways prefix a BOM.
        let trimmed = text.trim_start_matches('\u{feff}');
        serde_json::from_str(trimmed).map_err(|e| {
            FetchError::schema(
                &self.source_name,
                format!("{} (body: {})", e, truncate(trimmed, 200)),
            )
        })
    }
}

/// Pull a human-readable message out of an error body, whatever shape the
/// upstream uses.
pub(crate) fn error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return truncate(body.trim(), 200).to_string();
    };
    json["error"]["message"]
        .as_str()
        .or_else(|| json["errorMessage"].as_str())
        .or_else(|| json["message"].as_str())
        .or_else(|| json["Message"].as_str())
        .or_else(|| json["errors"][0]["message"].as_str())
        .or_else(|| json["error_description"].as_str())
        .or_else(|| json["error"].as_str())
        .map(String::from)
        .unwrap_or_else(|| truncate(body.trim(), 200).to_string())
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Parse an amount given either as a JSON string (`"12.34"`) or number.
pub(crate) fn decimal_from_json(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => s.trim().parse().ok(),
        serde_json::Value::Number(n) => n
            .to_string()
            .parse()
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        _ => None,
    }
}
