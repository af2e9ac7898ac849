use std::path::PathBuf;

use costpull_recon::ReconError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read accounts file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse accounts file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("empty or missing {0:?} section in accounts file")]
    EmptySection(&'static str),

    #[error("section {0:?} is missing from the \"configuration\" section")]
    MissingSection(&'static str),

    #[error("invalid {key:?} in the {section:?} section: {message}")]
    Invalid {
        section: &'static str,
        key: &'static str,
        message: String,
    },

    #[error(transparent)]
    Account(#[from] ReconError),
}

impl ConfigError {
    pub(crate) fn invalid(section: &'static str, key: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { section, key, message: message.into() }
    }
}
