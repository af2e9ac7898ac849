// Configuration loading

pub mod accounts;
pub mod error;
pub mod sources;

pub use accounts::{AccountEntry, AccountsFile, DEFAULT_ACCOUNTS_FILE};
pub use error::ConfigError;
pub use sources::{
    AnchorMatch, AwsConfig, CloudabilityAuth, CloudabilityConfig, Configuration, GsheetConfig, IbmCloudConfig,
    OAuthConfig,
};
