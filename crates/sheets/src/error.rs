use std::path::PathBuf;

use thiserror::Error;

/// OAuth failures. All are fatal.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unable to read OAuth client credentials {path}: {message}")]
    Credentials { path: PathBuf, message: String },

    #[error("no OAuth client credentials file found; set oauth.credentialsFile or GOOGLE_APPLICATION_CREDENTIALS")]
    NoCredentials,

    #[error(transparent)]
    Config(#[from] costpull_config::ConfigError),

    #[error("cannot determine the OAuth token cache location")]
    NoCacheDir,

    #[error("unable to parse cached OAuth token {path}: {message}")]
    Cache { path: PathBuf, message: String },

    #[error("cached OAuth token has expired and carries no refresh token")]
    NoRefreshToken,

    #[error("redirect listener failed: {0}")]
    Listener(#[from] std::io::Error),

    #[error("error in authorization state, expected {expected:?}, got {got:?}")]
    StateMismatch { expected: String, got: String },

    #[error("authorization request failed: {0}")]
    Denied(String),

    #[error("authorization redirect carried no code")]
    MissingCode,

    #[error("token endpoint returned HTTP {status}: {message}")]
    Token { status: u16, message: String },

    #[error("token request failed: {0}")]
    Transport(String),
}

/// Spreadsheet API and sync-protocol failures. All are fatal; nothing is
/// rolled back.
#[derive(Debug, Error)]
pub enum SheetsError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Sheets API rejected the credentials (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("Sheets API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Sheets API request failed: {0}")]
    Transport(String),

    #[error("unexpected Sheets API response: {0}")]
    Schema(String),

    #[error("main sheet {0:?} not found")]
    MainSheetNotFound(String),

    #[error("template sheet {0:?} not found")]
    TemplateNotFound(String),

    #[error("no reference to {name:?} found in main sheet {main_sheet:?}")]
    AnchorNotFound { name: String, main_sheet: String },

    #[error(
        "sheet {name:?} is {rows}x{columns} but the data needs {needed_rows}x{needed_columns}"
    )]
    BlockTooSmall {
        name: String,
        rows: usize,
        columns: usize,
        needed_rows: usize,
        needed_columns: usize,
    },
}

impl SheetsError {
    /// Whether the failure came from the sync protocol itself rather than the
    /// API or its credentials.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            SheetsError::MainSheetNotFound(_)
                | SheetsError::TemplateNotFound(_)
                | SheetsError::AnchorNotFound { .. }
                | SheetsError::BlockTooSmall { .. }
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SheetsError::Auth(_) | SheetsError::Unauthorized { .. })
    }
}
