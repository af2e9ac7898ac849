//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                                   |
//! |---------|------------------|-----------------------------------------------|
//! | 0       | Universal        | Success (consistency findings do not count)   |
//! | 1       | Universal        | General error (unspecified)                   |
//! | 2       | Universal        | CLI usage error (bad args)                    |
//! | 3       | config           | Accounts file, account IDs, month             |
//! | 4       | data             | Data-integrity failures while reconciling     |
//! | 50-59   | fetch            | Billing source connectors                     |
//! | 60-69   | sheets           | Google Sheets output                          |
//! | 70-79   | output           | Local file output                             |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into the relevant `CliError` constructor

use costpull_recon::{FetchError, ReconError};
use costpull_sheets::SheetsError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - the table was published.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure. Reserved; every current failure
/// maps to a more specific code.
#[allow(dead_code)]
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments. clap exits with this code on its own.
#[allow(dead_code)]
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Configuration and data (3-4)
// =============================================================================

/// Accounts file unreadable or invalid, malformed or duplicate account ID,
/// missing section, bad or future month.
pub const EXIT_CONFIG: u8 = 3;

/// Non-USD cost, duplicate primary cell, account populated by two sources,
/// scoped total mismatch, or no data at all.
pub const EXIT_DATA_INTEGRITY: u8 = 4;

// =============================================================================
// Fetch (50-59)
// =============================================================================

/// No credentials available for a configured source.
pub const EXIT_FETCH_NOT_AUTH: u8 = 50;

/// Credentials rejected by upstream (401/403) or token exchange failed.
pub const EXIT_FETCH_AUTH: u8 = 51;

/// Response failed validation (bulk result unexpectedly paginated).
pub const EXIT_FETCH_VALIDATION: u8 = 52;

/// Rate limited (429). No retries are attempted.
pub const EXIT_FETCH_RATE_LIMIT: u8 = 53;

/// Upstream error, network failure, or undecodable response.
pub const EXIT_FETCH_UPSTREAM: u8 = 54;

// =============================================================================
// Sheets (60-69)
// =============================================================================

/// OAuth failed or the Sheets API rejected the token.
pub const EXIT_SHEETS_AUTH: u8 = 60;

/// Sheets API error or transport failure.
pub const EXIT_SHEETS_API: u8 = 61;

/// Sync protocol failure: main/template sheet or anchor missing, block too small.
pub const EXIT_SHEETS_PROTOCOL: u8 = 62;

// =============================================================================
// Output (70-79)
// =============================================================================

/// Cannot write the CSV or report file.
pub const EXIT_OUTPUT_IO: u8 = 70;

// =============================================================================
// Error classification
// =============================================================================

pub fn fetch_exit_code(err: &FetchError) -> u8 {
    match err {
        FetchError::Auth { .. } => EXIT_FETCH_AUTH,
        FetchError::RateLimited { .. } => EXIT_FETCH_RATE_LIMIT,
        FetchError::Paginated { .. } => EXIT_FETCH_VALIDATION,
        FetchError::Upstream { .. } | FetchError::Schema { .. } => EXIT_FETCH_UPSTREAM,
    }
}

pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::MalformedAccountId { .. }
        | ReconError::DuplicateAccount { .. }
        | ReconError::InvalidMonth(_)
        | ReconError::FutureMonth(_) => EXIT_CONFIG,
        ReconError::UnitMismatch { .. }
        | ReconError::DuplicateCell { .. }
        | ReconError::AccountAlreadyPopulated { .. }
        | ReconError::InconsistentTotals { .. } => EXIT_DATA_INTEGRITY,
    }
}

pub fn sheets_exit_code(err: &SheetsError) -> u8 {
    if err.is_auth() {
        EXIT_SHEETS_AUTH
    } else if err.is_protocol() {
        EXIT_SHEETS_PROTOCOL
    } else {
        EXIT_SHEETS_API
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use costpull_sheets::AuthError;

    #[test]
    fn fetch_classification() {
        assert_eq!(fetch_exit_code(&FetchError::auth("aws", "denied")), EXIT_FETCH_AUTH);
        assert_eq!(
            fetch_exit_code(&FetchError::Paginated { source_name: "cloudability".into() }),
            EXIT_FETCH_VALIDATION
        );
        assert_eq!(fetch_exit_code(&FetchError::schema("ibmcloud", "bad json")), EXIT_FETCH_UPSTREAM);
    }

    #[test]
    fn recon_classification() {
        assert_eq!(recon_exit_code(&ReconError::FutureMonth("2999-01".into())), EXIT_CONFIG);
        assert_eq!(
            recon_exit_code(&ReconError::UnitMismatch {
                source_name: "aws".into(),
                account: "a".into(),
                unit: "EUR".into(),
            }),
            EXIT_DATA_INTEGRITY
        );
    }

    #[test]
    fn sheets_classification() {
        assert_eq!(sheets_exit_code(&SheetsError::Auth(AuthError::MissingCode)), EXIT_SHEETS_AUTH);
        assert_eq!(sheets_exit_code(&SheetsError::TemplateNotFound("t".into())), EXIT_SHEETS_PROTOCOL);
        assert_eq!(sheets_exit_code(&SheetsError::Transport("reset".into())), EXIT_SHEETS_API);
    }
}
