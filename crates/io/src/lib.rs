// File I/O operations

pub mod csv;
pub mod report;

use std::path::{Path, PathBuf};

pub use report::ReportSink;

#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write csv {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: ::csv::Error,
    },
}

impl OutputError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }

    pub(crate) fn csv(path: &Path, source: ::csv::Error) -> Self {
        Self::Csv { path: path.to_path_buf(), source }
    }
}
