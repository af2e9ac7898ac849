//! Google Sheets v4 client (blocking).
//!
//! Implements [`SpreadsheetApi`] over the REST endpoints: spreadsheet
//! metadata, value reads and `batchUpdate`.

use std::time::Duration;

use rust_decimal::prelude::ToPrimitive;
use serde_json::{json, Value};

use crate::error::SheetsError;
use crate::sync::{
    CellStyle, GridRange, SheetReply, SheetRequest, SpreadsheetApi, SpreadsheetMeta, StyledCell,
    TabInfo,
};
use costpull_recon::SheetCell;

// ── Constants ───────────────────────────────────────────────────────

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com";
const USER_AGENT: &str = concat!("costpull/", env!("CARGO_PKG_VERSION"));
const METADATA_FIELDS: &str =
    "spreadsheetId,sheets/properties(gridProperties(columnCount,rowCount),sheetId,title)";
const CELL_FIELDS: &str = "userEnteredValue,userEnteredFormat";

const HEADER_GREY: f64 = 204.0 / 256.0;
const TOTAL_GREY: f64 = 239.0 / 256.0;

// ── Client ──────────────────────────────────────────────────────────

pub struct GoogleSheetsClient {
    http: reqwest::blocking::Client,
    base_url: String,
    spreadsheet_id: String,
    token: String,
}

impl GoogleSheetsClient {
    pub fn new(spreadsheet_id: &str, access_token: &str) -> Self {
        Self::with_base_url(spreadsheet_id, access_token, SHEETS_API_BASE.to_string())
    }

    pub fn with_base_url(spreadsheet_id: &str, access_token: &str, base_url: String) -> Self {
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            token: access_token.to_string(),
        }
    }

    fn spreadsheet_url(&self) -> Result<url::Url, SheetsError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| SheetsError::Transport(format!("invalid base URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| SheetsError::Transport(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str()]);
        Ok(url)
    }

    fn get(&self, url: url::Url) -> Result<Value, SheetsError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| SheetsError::Transport(e.to_string()))?;
        read_json(resp)
    }

    fn post_json(&self, url: url::Url, body: &Value) -> Result<Value, SheetsError> {
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .map_err(|e| SheetsError::Transport(e.to_string()))?;
        read_json(resp)
    }
}

fn read_json(resp: reqwest::blocking::Response) -> Result<Value, SheetsError> {
    let status = resp.status().as_u16();
    let text = resp.text().map_err(|e| SheetsError::Transport(e.to_string()))?;

    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v["error"]["message"].as_str().map(String::from))
            .unwrap_or_else(|| text.chars().take(200).collect());
        return Err(if status == 401 || status == 403 {
            SheetsError::Unauthorized { status, message }
        } else {
            SheetsError::Api { status, message }
        });
    }

    serde_json::from_str(&text).map_err(|e| SheetsError::Schema(e.to_string()))
}

impl SpreadsheetApi for GoogleSheetsClient {
    fn metadata(&self) -> Result<SpreadsheetMeta, SheetsError> {
        let mut url = self.spreadsheet_url()?;
        url.query_pairs_mut().append_pair("fields", METADATA_FIELDS);
        let body = self.get(url)?;
        parse_metadata(&body)
    }

    fn read_values(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
        let mut url = self.spreadsheet_url()?;
        url.path_segments_mut()
            .map_err(|_| SheetsError::Transport("invalid spreadsheet URL".into()))?
            .extend(["values", range]);
        let body = self.get(url)?;
        Ok(parse_values(&body))
    }

    fn batch_update(&self, requests: &[SheetRequest]) -> Result<Vec<SheetReply>, SheetsError> {
        let mut url = self.spreadsheet_url()?;
        // The id segment carries the method suffix.
        url.path_segments_mut()
            .map_err(|_| SheetsError::Transport("invalid spreadsheet URL".into()))?
            .pop()
            .push(&format!("{}:batchUpdate", self.spreadsheet_id));
        let body = json!({ "requests": requests.iter().map(request_json).collect::<Vec<_>>() });
        tracing::debug!(requests = requests.len(), "sending batch update");
        let resp = self.post_json(url, &body)?;
        parse_replies(&resp, requests.len())
    }
}

// ── Wire mapping ────────────────────────────────────────────────────

fn range_json(range: &GridRange) -> Value {
    json!({
        "sheetId": range.sheet_id,
        "startRowIndex": range.start_row,
        "endRowIndex": range.end_row,
        "startColumnIndex": range.start_column,
        "endColumnIndex": range.end_column,
    })
}

fn value_json(cell: &SheetCell) -> Value {
    match cell {
        SheetCell::Text(s) => json!({ "stringValue": s }),
        SheetCell::Number(n) => json!({ "numberValue": n.to_f64().unwrap_or(0.0) }),
        SheetCell::Formula(f) => json!({ "formulaValue": f }),
    }
}

fn grey(level: f64) -> Value {
    json!({ "red": level, "green": level, "blue": level })
}

fn format_json(style: CellStyle) -> Value {
    match style {
        CellStyle::Plain => json!({}),
        CellStyle::Header => json!({
            "backgroundColor": grey(HEADER_GREY),
            "horizontalAlignment": "CENTER",
            "textFormat": { "bold": true },
        }),
        CellStyle::Currency => json!({ "numberFormat": { "type": "CURRENCY" } }),
        CellStyle::Total => json!({ "backgroundColor": grey(TOTAL_GREY) }),
    }
}

fn cell_json(cell: &StyledCell) -> Value {
    json!({
        "userEnteredValue": value_json(&cell.value),
        "userEnteredFormat": format_json(cell.style),
    })
}

/// One `batchUpdate` request object.
pub fn request_json(request: &SheetRequest) -> Value {
    match request {
        SheetRequest::DuplicateTab { source_sheet_id, new_title, insert_index } => json!({
            "duplicateSheet": {
                "sourceSheetId": source_sheet_id,
                "newSheetName": new_title,
                "insertSheetIndex": insert_index,
            }
        }),
        SheetRequest::AddTab { title, index, rows, columns, hidden } => json!({
            "addSheet": {
                "properties": {
                    "title": title,
                    "index": index,
                    "hidden": hidden,
                    "gridProperties": { "rowCount": rows, "columnCount": columns },
                }
            }
        }),
        SheetRequest::WriteCells { range, rows } => json!({
            "updateCells": {
                "range": range_json(range),
                "fields": CELL_FIELDS,
                "rows": rows
                    .iter()
                    .map(|row| json!({ "values": row.iter().map(cell_json).collect::<Vec<_>>() }))
                    .collect::<Vec<_>>(),
            }
        }),
        SheetRequest::CopyPaste { source, destination } => json!({
            "copyPaste": {
                "source": range_json(source),
                "destination": range_json(destination),
                "pasteType": "PASTE_NORMAL",
                "pasteOrientation": "NORMAL",
            }
        }),
        SheetRequest::AutoResizeColumns { sheet_id } => json!({
            "autoResizeDimensions": {
                "dimensions": { "sheetId": sheet_id, "dimension": "COLUMNS" }
            }
        }),
    }
}

fn parse_tab(props: &Value) -> Option<TabInfo> {
    let grid = &props["gridProperties"];
    Some(TabInfo {
        sheet_id: props["sheetId"].as_i64().unwrap_or(0),
        title: props["title"].as_str()?.to_string(),
        row_count: grid["rowCount"].as_u64().unwrap_or(0) as usize,
        column_count: grid["columnCount"].as_u64().unwrap_or(0) as usize,
    })
}

fn parse_metadata(body: &Value) -> Result<SpreadsheetMeta, SheetsError> {
    let sheets = body["sheets"]
        .as_array()
        .ok_or_else(|| SheetsError::Schema("spreadsheet has no sheets list".into()))?;
    let tabs = sheets
        .iter()
        .map(|s| {
            parse_tab(&s["properties"])
                .ok_or_else(|| SheetsError::Schema("sheet properties carry no title".into()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SpreadsheetMeta {
        spreadsheet_id: body["spreadsheetId"].as_str().unwrap_or_default().to_string(),
        tabs,
    })
}

fn parse_values(body: &Value) -> Vec<Vec<String>> {
    let Some(rows) = body["values"].as_array() else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            row.as_array()
                .map(|cells| {
                    cells
                        .iter()
                        .map(|c| match c {
                            Value::String(s) => s.clone(),
                            Value::Null => String::new(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect()
}

fn parse_replies(body: &Value, expected: usize) -> Result<Vec<SheetReply>, SheetsError> {
    let replies = body["replies"].as_array().cloned().unwrap_or_default();
    let mut out: Vec<SheetReply> = replies
        .iter()
        .map(|r| {
            let props = if r["addSheet"].is_object() {
                &r["addSheet"]["properties"]
            } else {
                &r["duplicateSheet"]["properties"]
            };
            match parse_tab(props) {
                Some(tab) => Ok(SheetReply::TabCreated(tab)),
                None if props.is_object() => {
                    Err(SheetsError::Schema("new sheet properties carry no title".into()))
                }
                None => Ok(SheetReply::Empty),
            }
        })
        .collect::<Result<_, _>>()?;
    // Replies to requests without a result may be omitted entirely.
    out.resize(expected.max(out.len()), SheetReply::Empty);
    Ok(out)
}
