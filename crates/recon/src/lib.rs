//! `costpull-recon`: cloud cost aggregation and reconciliation engine.
//!
//! Pure engine crate: receives declared accounts and source records, builds
//! the per-account cost grid, checks it, and materializes the output table.
//! No network or file IO.

pub mod adapter;
pub mod buckets;
pub mod check;
pub mod directory;
pub mod error;
pub mod grid;
pub mod materialize;
pub mod model;

pub use adapter::{BulkPull, BulkSource, ScopedPull, ScopedSource};
pub use buckets::BucketTable;
pub use check::{CheckFailure, ConsistencyReport};
pub use directory::{AccountDirectory, DirectoryEntry, ProviderLabelOutcome};
pub use error::{FetchError, ReconError};
pub use grid::{report_missing, CostGrid, IngestOptions, IngestPolicy, IngestSummary, MissingAccount};
pub use materialize::{column_letters, materialize, SheetCell, SheetTable};
pub use model::{AccountCostMetadata, AccountRecord, CostRecord, ReportMonth};
