//! Google Sheets output: OAuth, the v4 REST client, and the raw-data block
//! sync protocol.

pub mod auth;
pub mod client;
pub mod error;
pub mod sync;

pub use auth::{authorize, CachedToken, ClientSecret};
pub use client::GoogleSheetsClient;
pub use error::{AuthError, SheetsError};
pub use sync::{
    force_reference_refresh, render_sheet_name, sync_table, BlockOrigin, CellStyle, GridRange,
    SheetReply, SheetRequest, SpreadsheetApi, SpreadsheetMeta, StyledCell, SyncOutcome, TabInfo,
};
