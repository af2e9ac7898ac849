//! OAuth for the Sheets API.
//!
//! Installed-app flow: a cached token is reused (and refreshed when
//! expired); otherwise the user is sent to Google's consent page and the
//! authorization code comes back through a one-shot listener on
//! `http://localhost:{port}`. The token cache is written 0600 on Unix.

use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use base64::Engine;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use costpull_config::OAuthConfig;

use crate::error::AuthError;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const THANK_YOU: &str = "Thank you!  You may close this browser window.";

/// Tokens this close to expiry are refreshed.
const EXPIRY_MARGIN_SECS: i64 = 60;

// ── Client credentials ──────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecret {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecret>,
    web: Option<ClientSecret>,
}

/// Read a client-secret JSON as downloaded from the Cloud console
/// (`installed` or `web` application).
pub fn load_client_secret(path: &Path) -> Result<ClientSecret, AuthError> {
    let credentials = |message: String| AuthError::Credentials { path: path.to_path_buf(), message };
    let contents = std::fs::read_to_string(path).map_err(|e| credentials(e.to_string()))?;
    let file: ClientSecretFile = serde_json::from_str(&contents).map_err(|e| credentials(e.to_string()))?;
    file.installed
        .or(file.web)
        .ok_or_else(|| credentials("neither an \"installed\" nor a \"web\" client".into()))
}

// ── Token cache ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub access_token: String,
    #[serde(default)]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl CachedToken {
    /// Whether the access token can still be used at `now`. Tokens without
    /// an expiry never expire.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty()
            && self
                .expiry
                .map_or(true, |exp| exp - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now)
    }
}

/// Load the cached token; `Ok(None)` when no cache file exists.
pub fn load_token(path: &Path) -> Result<Option<CachedToken>, AuthError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(AuthError::Cache { path: path.to_path_buf(), message: e.to_string() });
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| AuthError::Cache { path: path.to_path_buf(), message: e.to_string() })
}

/// Write the token cache, creating its directory (0700) as needed.
pub fn save_token(path: &Path, token: &CachedToken) -> Result<(), AuthError> {
    let cache_err = |message: String| AuthError::Cache { path: path.to_path_buf(), message };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| cache_err(e.to_string()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                .map_err(|e| cache_err(e.to_string()))?;
        }
    }

    let contents = serde_json::to_string_pretty(token).map_err(|e| cache_err(e.to_string()))?;
    std::fs::write(path, contents).map_err(|e| cache_err(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| cache_err(e.to_string()))?;
    }

    tracing::info!(path = %path.display(), "saved OAuth token");
    Ok(())
}

// ── Token endpoint ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
}

pub struct TokenEndpoint {
    http: reqwest::blocking::Client,
    secret: ClientSecret,
}

impl TokenEndpoint {
    pub fn new(secret: ClientSecret) -> Self {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("costpull/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");
        Self { http, secret }
    }

    pub fn secret(&self) -> &ClientSecret {
        &self.secret
    }

    /// Trade an authorization code for a token.
    pub fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<CachedToken, AuthError> {
        self.request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.secret.client_id),
            ("client_secret", &self.secret.client_secret),
        ])
    }

    /// Get a fresh access token. Google omits the refresh token from
    /// refresh responses, so the one passed in is carried over.
    pub fn refresh(&self, refresh_token: &str) -> Result<CachedToken, AuthError> {
        let mut token = self.request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.secret.client_id),
            ("client_secret", &self.secret.client_secret),
        ])?;
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    fn request(&self, form: &[(&str, &str)]) -> Result<CachedToken, AuthError> {
        let resp = self
            .http
            .post(&self.secret.token_uri)
            .form(form)
            .send()
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp.text().map_err(|e| AuthError::Transport(e.to_string()))?;
        if !(200..300).contains(&status) {
            let message = serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .and_then(|v| {
                    v["error_description"]
                        .as_str()
                        .or_else(|| v["error"].as_str())
                        .map(String::from)
                })
                .unwrap_or(text);
            return Err(AuthError::Token { status, message });
        }

        let parsed: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| AuthError::Token { status, message: format!("invalid token response: {e}") })?;
        Ok(CachedToken {
            access_token: parsed.access_token,
            token_type: parsed.token_type,
            refresh_token: parsed.refresh_token,
            expiry: parsed.expires_in.map(|s| Utc::now() + chrono::Duration::seconds(s)),
        })
    }
}

// ── Consent flow ────────────────────────────────────────────────────

/// Random anti-forgery token carried through the consent redirect.
pub fn new_state() -> String {
    let bytes: [u8; 24] = rand::thread_rng().gen();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

pub fn authorization_url(secret: &ClientSecret, redirect_uri: &str, state: &str) -> Result<String, AuthError> {
    let url = url::Url::parse_with_params(
        &secret.auth_uri,
        &[
            ("access_type", "offline"),
            ("client_id", secret.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", SHEETS_SCOPE),
            ("state", state),
        ],
    )
    .map_err(|e| AuthError::Credentials {
        path: PathBuf::from(&secret.auth_uri),
        message: format!("invalid auth_uri: {e}"),
    })?;
    Ok(url.into())
}

/// Local endpoint receiving the consent redirect.
pub struct RedirectListener {
    server: tiny_http::Server,
}

impl RedirectListener {
    pub fn bind(port: u16) -> Result<Self, AuthError> {
        let server = tiny_http::Server::http(("127.0.0.1", port))
            .map_err(|e| AuthError::Listener(std::io::Error::other(e)))?;
        Ok(Self { server })
    }

    pub fn port(&self) -> Result<u16, AuthError> {
        self.server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .ok_or_else(|| AuthError::Listener(std::io::Error::other("listener is not bound to a TCP port")))
    }

    /// Serve on a background thread until a redirect carrying OAuth
    /// parameters arrives; the thread yields the authorization code.
    pub fn spawn(self, state: String) -> JoinHandle<Result<String, AuthError>> {
        thread::spawn(move || loop {
            let request = self.server.recv()?;
            if let Some(outcome) = handle_redirect(request, &state)? {
                return outcome;
            }
        })
    }
}

/// Answer one HTTP request. `None` when the request carried no OAuth
/// parameters (a favicon fetch, say) and the listener should keep waiting.
fn handle_redirect(request: tiny_http::Request, state: &str) -> Result<Option<Result<String, AuthError>>, AuthError> {
    let url = url::Url::parse(&format!("http://localhost{}", request.url()))
        .map_err(|e| AuthError::Denied(format!("malformed redirect: {e}")))?;
    let param = |name: &str| url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned());

    let (got_state, error, code) = (param("state"), param("error"), param("code"));
    if got_state.is_none() && error.is_none() && code.is_none() {
        request.respond(tiny_http::Response::from_string("").with_status_code(404))?;
        return Ok(None);
    }

    request.respond(tiny_http::Response::from_string(THANK_YOU))?;

    let got_state = got_state.unwrap_or_default();
    let outcome = if got_state != state {
        Err(AuthError::StateMismatch { expected: state.to_string(), got: got_state })
    } else if let Some(error) = error {
        Err(AuthError::Denied(error))
    } else {
        code.filter(|c| !c.is_empty()).ok_or(AuthError::MissingCode)
    };
    Ok(Some(outcome))
}

/// Run the consent flow: print the URL, wait for the redirect, exchange the
/// code.
pub fn interactive_consent(endpoint: &TokenEndpoint, port: u16) -> Result<CachedToken, AuthError> {
    let listener = RedirectListener::bind(port)?;
    let redirect_uri = format!("http://localhost:{}", listener.port()?);
    let state = new_state();
    let auth_url = authorization_url(endpoint.secret(), &redirect_uri, &state)?;

    eprintln!("Go to the following link in your browser to authorize access to the spreadsheet:");
    eprintln!("\n{auth_url}\n");

    let code = listener
        .spawn(state)
        .join()
        .map_err(|_| AuthError::Listener(std::io::Error::other("redirect listener panicked")))??;
    tracing::debug!("authorization code received");
    endpoint.exchange_code(&code, &redirect_uri)
}

// ── Entry point ─────────────────────────────────────────────────────

/// Produce a usable access token: cached, refreshed, or freshly consented.
pub fn authorize(config: &OAuthConfig) -> Result<String, AuthError> {
    let credentials = config.credentials_path().ok_or(AuthError::NoCredentials)?;
    let secret = load_client_secret(&credentials)?;
    let cache = config.token_cache_file().ok_or(AuthError::NoCacheDir)?;
    let endpoint = TokenEndpoint::new(secret);

    let token = obtain_token(&endpoint, &cache, || interactive_consent(&endpoint, config.port()?))?;
    Ok(token.access_token)
}

/// Cache-first token acquisition. `consent` runs only when there is no
/// cached token at all.
pub fn obtain_token(
    endpoint: &TokenEndpoint,
    cache: &Path,
    consent: impl FnOnce() -> Result<CachedToken, AuthError>,
) -> Result<CachedToken, AuthError> {
    let token = match load_token(cache)? {
        Some(token) if token.is_valid_at(Utc::now()) => {
            tracing::debug!(path = %cache.display(), "using cached OAuth token");
            return Ok(token);
        }
        Some(token) => {
            let refresh_token = token.refresh_token.ok_or(AuthError::NoRefreshToken)?;
            tracing::info!("refreshing expired OAuth token");
            endpoint.refresh(&refresh_token)?
        }
        None => consent()?,
    };
    save_token(cache, &token)?;
    Ok(token)
}
