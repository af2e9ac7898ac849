// Side-channel consistency report

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use costpull_recon::ConsistencyReport;

use crate::OutputError;

/// Append-only text file, one finding per line.
#[derive(Debug)]
pub struct ReportSink {
    path: PathBuf,
    file: File,
    lines: usize,
}

impl ReportSink {
    /// Open (creating if needed) the report file for appending.
    pub fn open(path: &Path) -> Result<Self, OutputError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| OutputError::io(path, e))?;
        Ok(Self { path: path.to_path_buf(), file, lines: 0 })
    }

    pub fn append_line(&mut self, line: &str) -> Result<(), OutputError> {
        writeln!(self.file, "{line}").map_err(|e| OutputError::io(&self.path, e))?;
        self.lines += 1;
        Ok(())
    }

    /// Append every finding of `report`.
    pub fn write_report(&mut self, report: &ConsistencyReport) -> Result<(), OutputError> {
        for line in report.lines() {
            self.append_line(&line)?;
        }
        self.file.flush().map_err(|e| OutputError::io(&self.path, e))?;
        if !report.is_empty() {
            tracing::warn!(
                path = %self.path.display(),
                findings = report.len(),
                "consistency findings written to report"
            );
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines written through this sink.
    pub fn lines_written(&self) -> usize {
        self.lines
    }
}
