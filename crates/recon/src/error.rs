use rust_decimal::Decimal;
use thiserror::Error;

/// Fatal engine errors: configuration problems detected while indexing the
/// declared accounts, and data-integrity problems detected while folding
/// source records into the grid.
#[derive(Debug, Error)]
pub enum ReconError {
    /// A declared account ID does not match its provider's fixed shape.
    #[error("unrecognized {provider} account id format, {id:?}, must match {shape}")]
    MalformedAccountId {
        provider: String,
        id: String,
        shape: &'static str,
    },

    /// Two declared accounts canonicalize to the same ID.
    #[error("account {canonical_id} is declared twice (groups {first_group:?} and {second_group:?})")]
    DuplicateAccount {
        canonical_id: String,
        first_group: String,
        second_group: String,
    },

    /// A month string that is not `YYYY-MM`.
    #[error("invalid month {0:?}, expected YYYY-MM")]
    InvalidMonth(String),

    /// The requested month has not started yet.
    #[error("specified month, {0:?}, is in the future")]
    FutureMonth(String),

    /// A source reported a cost in something other than USD.
    #[error("{source_name}: account {account} reported cost in {unit:?}, expected USD")]
    UnitMismatch {
        source_name: String,
        account: String,
        unit: String,
    },

    /// The primary source produced two amounts for one grid cell.
    #[error("{source_name}: duplicate entry for {account}:{category}, values {first} and {second}")]
    DuplicateCell {
        source_name: String,
        account: String,
        category: String,
        first: Decimal,
        second: Decimal,
    },

    /// A later source pass tried to populate an account another pass already owns.
    #[error("{source_name}: cost row for account {account} already populated by {previous}")]
    AccountAlreadyPopulated {
        source_name: String,
        account: String,
        previous: String,
    },

    /// A scoped pull whose breakdown does not add up to its own total.
    #[error("account {account} service total {breakdown} does not match reported total {total}")]
    InconsistentTotals {
        account: String,
        breakdown: Decimal,
        total: Decimal,
    },
}

/// Adapter failures. All of these are fatal to the run.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Credentials missing, rejected, or expired.
    #[error("{source_name} auth failed: {message}")]
    Auth { source_name: String, message: String },

    /// Upstream throttled the request (HTTP 429).
    #[error("{source_name} rate limited: {message}")]
    RateLimited { source_name: String, message: String },

    /// Network failure or a non-success HTTP status.
    #[error("{source_name} upstream error: {message}")]
    Upstream { source_name: String, message: String },

    /// The response body could not be decoded into the expected shape.
    #[error("{source_name} returned an unexpected response: {message}")]
    Schema { source_name: String, message: String },

    /// A bulk response that asked to be paginated.
    #[error("{source_name} result is unexpectedly paginated (result set too large)")]
    Paginated { source_name: String },
}

impl FetchError {
    pub fn auth(source_name: &str, message: impl Into<String>) -> Self {
        Self::Auth { source_name: source_name.to_string(), message: message.into() }
    }

    pub fn upstream(source_name: &str, message: impl Into<String>) -> Self {
        Self::Upstream { source_name: source_name.to_string(), message: message.into() }
    }

    pub fn schema(source_name: &str, message: impl Into<String>) -> Self {
        Self::Schema { source_name: source_name.to_string(), message: message.into() }
    }
}
