//! Raw-data block synchronization.
//!
//! One run writes the month's cost table into its own tab of a live
//! spreadsheet and then makes the main sheet re-read its references to that
//! tab. The main sheet locates the tab through a cell holding the tab's name
//! (the anchor); the cells below it pull values out of the tab, typically by
//! `INDIRECT`, which Sheets does not re-evaluate when a referenced tab
//! appears later. Pasting the anchor range onto itself forces the refresh.

use costpull_config::{AnchorMatch, GsheetConfig};
use costpull_recon::materialize::{column_letters, TOTAL_COLUMN};
use costpull_recon::{ReportMonth, SheetCell, SheetTable};

use crate::error::SheetsError;

// ── Boundary types ──────────────────────────────────────────────────

/// One tab's identity and grid size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabInfo {
    pub sheet_id: i64,
    pub title: String,
    pub row_count: usize,
    pub column_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpreadsheetMeta {
    pub spreadsheet_id: String,
    pub tabs: Vec<TabInfo>,
}

impl SpreadsheetMeta {
    pub fn tab(&self, title: &str) -> Option<&TabInfo> {
        self.tabs.iter().find(|t| t.title == title)
    }
}

/// Zero-based, end-exclusive cell range within one tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridRange {
    pub sheet_id: i64,
    pub start_row: usize,
    pub end_row: usize,
    pub start_column: usize,
    pub end_column: usize,
}

/// Presentation applied to a written cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStyle {
    Plain,
    /// Bold, centered, grey background.
    Header,
    Currency,
    /// Light grey background.
    Total,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StyledCell {
    pub value: SheetCell,
    pub style: CellStyle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SheetRequest {
    DuplicateTab {
        source_sheet_id: i64,
        new_title: String,
        insert_index: usize,
    },
    AddTab {
        title: String,
        index: usize,
        rows: usize,
        columns: usize,
        hidden: bool,
    },
    /// Cells of `range` that `rows` does not reach are cleared.
    WriteCells {
        range: GridRange,
        rows: Vec<Vec<StyledCell>>,
    },
    CopyPaste {
        source: GridRange,
        destination: GridRange,
    },
    AutoResizeColumns {
        sheet_id: i64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SheetReply {
    Empty,
    TabCreated(TabInfo),
}

/// The spreadsheet operations the sync protocol needs.
pub trait SpreadsheetApi {
    fn metadata(&self) -> Result<SpreadsheetMeta, SheetsError>;

    /// Cell values of an A1 range as display strings, row-major. Trailing
    /// empty rows and cells may be omitted.
    fn read_values(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError>;

    /// Apply requests atomically, one reply per request.
    fn batch_update(&self, requests: &[SheetRequest]) -> Result<Vec<SheetReply>, SheetsError>;
}

// ── Block naming ────────────────────────────────────────────────────

/// Digit groups substituted in a sheet-name template, longest first at each
/// position.
const NAME_TOKENS: &[&str] = &["2006", "01", "02", "06", "1", "2"];

/// Render a time-layout template against the first day of `month`:
/// `2006` year, `06` two-digit year, `01` two-digit month, `1` month, `02`
/// two-digit day, `2` day. Everything else is copied literally.
pub fn render_sheet_name(template: &str, month: &ReportMonth) -> String {
    let date = month.first_day();
    let mut out = String::with_capacity(template.len() + 4);
    let mut rest = template;

    while !rest.is_empty() {
        match NAME_TOKENS.iter().find(|t| rest.starts_with(**t)) {
            Some(token) => {
                let rendered = match *token {
                    "2006" => date.format("%Y").to_string(),
                    "06" => date.format("%y").to_string(),
                    "01" => date.format("%m").to_string(),
                    "1" => date.format("%-m").to_string(),
                    "02" => date.format("%d").to_string(),
                    _ => date.format("%-d").to_string(),
                };
                out.push_str(&rendered);
                rest = &rest[token.len()..];
            }
            None => {
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    out.push(c);
                }
                rest = chars.as_str();
            }
        }
    }
    out
}

// ── Protocol ────────────────────────────────────────────────────────

/// How the data block came to exist in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOrigin {
    /// Added as a blank hidden tab sized to the table.
    Created,
    /// Copied from the template tab.
    Duplicated,
    /// Already present; overwritten in place.
    Existing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncOutcome {
    pub sheet_name: String,
    pub sheet_id: i64,
    pub origin: BlockOrigin,
    pub anchor: GridRange,
    pub header_written: bool,
    pub total_written: bool,
}

/// Publish `table` as the raw-data block for `month`.
///
/// Every check (template, main sheet, anchor, block size) runs before the
/// first change to the spreadsheet, so a failing run leaves it untouched.
pub fn sync_table<A: SpreadsheetApi>(
    api: &A,
    config: &GsheetConfig,
    table: &SheetTable,
    month: &ReportMonth,
) -> Result<SyncOutcome, SheetsError> {
    let name = render_sheet_name(&config.sheet_name_template, month);
    tracing::info!(sheet = %name, "fetching spreadsheet information");
    let meta = api.metadata()?;

    let plan = plan_block(&meta, config, &name)?;

    let main = meta
        .tab(&config.main_sheet_name)
        .ok_or_else(|| SheetsError::MainSheetNotFound(config.main_sheet_name.clone()))?;
    let anchor = locate_anchor(api, main, &name, config.anchor_match, table.data_row_count())?;

    if let Some((rows, columns)) = plan.prior_size() {
        if rows < table.row_count() || columns < table.width() {
            return Err(SheetsError::BlockTooSmall {
                name,
                rows,
                columns,
                needed_rows: table.row_count(),
                needed_columns: table.width(),
            });
        }
    }

    let origin = plan.origin();
    let block = create_block(api, plan, &meta, &name, table)?;

    let header_written = origin != BlockOrigin::Existing;
    let total_written = origin == BlockOrigin::Created || block.column_count == table.width();

    let mut requests = write_requests(&block, table, header_written, total_written);
    requests.push(force_reference_refresh(anchor));
    api.batch_update(&requests)?;
    tracing::info!(
        sheet = %name,
        rows = table.data_row_count(),
        header_written,
        total_written,
        "raw data written"
    );

    // Column widths only settle once the data is in, so this is its own request.
    if config.auto_resize_columns {
        api.batch_update(&[SheetRequest::AutoResizeColumns { sheet_id: block.sheet_id }])?;
    }

    Ok(SyncOutcome {
        sheet_name: name,
        sheet_id: block.sheet_id,
        origin,
        anchor,
        header_written,
        total_written,
    })
}

/// Where the block will come from, decided from metadata alone.
enum BlockPlan<'a> {
    Existing(&'a TabInfo),
    Duplicate(&'a TabInfo),
    Create,
}

impl BlockPlan<'_> {
    fn origin(&self) -> BlockOrigin {
        match self {
            BlockPlan::Existing(_) => BlockOrigin::Existing,
            BlockPlan::Duplicate(_) => BlockOrigin::Duplicated,
            BlockPlan::Create => BlockOrigin::Created,
        }
    }

    /// Grid size the block will have before the write, unless it is created
    /// to fit.
    fn prior_size(&self) -> Option<(usize, usize)> {
        match self {
            BlockPlan::Existing(tab) | BlockPlan::Duplicate(tab) => Some((tab.row_count, tab.column_count)),
            BlockPlan::Create => None,
        }
    }
}

fn plan_block<'a>(meta: &'a SpreadsheetMeta, config: &GsheetConfig, name: &str) -> Result<BlockPlan<'a>, SheetsError> {
    if let Some(tab) = meta.tab(name) {
        return Ok(BlockPlan::Existing(tab));
    }
    match config.template_sheet_name.as_deref().filter(|t| !t.is_empty()) {
        Some(template) => meta
            .tab(template)
            .map(BlockPlan::Duplicate)
            .ok_or_else(|| SheetsError::TemplateNotFound(template.to_string())),
        None => Ok(BlockPlan::Create),
    }
}

fn create_block<A: SpreadsheetApi>(
    api: &A,
    plan: BlockPlan<'_>,
    meta: &SpreadsheetMeta,
    name: &str,
    table: &SheetTable,
) -> Result<TabInfo, SheetsError> {
    let request = match plan {
        BlockPlan::Existing(tab) => {
            tracing::warn!(sheet = %name, "overwriting existing sheet");
            return Ok(tab.clone());
        }
        BlockPlan::Duplicate(template) => {
            tracing::info!(sheet = %name, template = %template.title, "duplicating template sheet");
            SheetRequest::DuplicateTab {
                source_sheet_id: template.sheet_id,
                new_title: name.to_string(),
                insert_index: meta.tabs.len(),
            }
        }
        BlockPlan::Create => {
            tracing::info!(sheet = %name, "adding new sheet");
            SheetRequest::AddTab {
                title: name.to_string(),
                index: meta.tabs.len(),
                rows: table.row_count(),
                columns: table.width(),
                hidden: true,
            }
        }
    };

    let replies = api.batch_update(std::slice::from_ref(&request))?;
    match replies.into_iter().next() {
        Some(SheetReply::TabCreated(tab)) => Ok(tab),
        _ => Err(SheetsError::Schema(format!("no properties returned for new sheet {name:?}"))),
    }
}

/// Find the first cell (row-major) of the main tab naming the block. The
/// returned range starts one row below it, in the same column, and covers
/// one row per data row.
fn locate_anchor<A: SpreadsheetApi>(
    api: &A,
    main: &TabInfo,
    name: &str,
    mode: AnchorMatch,
    data_rows: usize,
) -> Result<GridRange, SheetsError> {
    let last_column = column_letters(main.column_count.saturating_sub(1));
    let range = format!("'{}'!A1:{}{}", main.title.replace('\'', "''"), last_column, main.row_count);
    let values = api.read_values(&range)?;

    let matches = |text: &str| match mode {
        AnchorMatch::Exact => text == name,
        AnchorMatch::Contains => text.contains(name),
    };

    for (r, row) in values.iter().enumerate() {
        if let Some(c) = row.iter().position(|cell| matches(cell)) {
            return Ok(GridRange {
                sheet_id: main.sheet_id,
                start_row: r + 1,
                end_row: r + 1 + data_rows,
                start_column: c,
                end_column: c + 1,
            });
        }
    }

    Err(SheetsError::AnchorNotFound {
        name: name.to_string(),
        main_sheet: main.title.clone(),
    })
}

/// Re-paste a range onto itself so formulas that reach into a tab by name
/// are re-evaluated.
pub fn force_reference_refresh(range: GridRange) -> SheetRequest {
    SheetRequest::CopyPaste { source: range, destination: range }
}

fn style_for(cell: &SheetCell, row: usize, column: usize) -> CellStyle {
    if row == 0 {
        return CellStyle::Header;
    }
    match cell {
        SheetCell::Number(_) if column != TOTAL_COLUMN => CellStyle::Currency,
        _ if column == TOTAL_COLUMN => CellStyle::Total,
        _ => CellStyle::Plain,
    }
}

/// The write for one block. The ranges reach the block's last row and
/// column, so cells the table does not cover are cleared. When the TOTAL
/// column is kept out, the write is split into the columns left and right
/// of it.
fn write_requests(block: &TabInfo, table: &SheetTable, header: bool, total: bool) -> Vec<SheetRequest> {
    let header_cells: Vec<SheetCell> = table.header.iter().cloned().map(SheetCell::Text).collect();
    let all_rows: Vec<(usize, &Vec<SheetCell>)> = std::iter::once(&header_cells)
        .chain(table.rows.iter())
        .enumerate()
        .filter(|(i, _)| header || *i > 0)
        .collect();
    let start_row = if header { 0 } else { 1 };
    let end_row = block.row_count.max(start_row + all_rows.len());
    let width = table.width();
    let end_column = block.column_count.max(width);

    let spans: Vec<(usize, usize)> = if total {
        vec![(0, end_column)]
    } else {
        vec![(0, TOTAL_COLUMN), (TOTAL_COLUMN + 1, end_column)]
    };

    spans
        .into_iter()
        .filter(|(from, to)| from < to)
        .map(|(from, to)| {
            let rows = all_rows
                .iter()
                .map(|(r, row)| {
                    row[from.min(width)..to.min(width)]
                        .iter()
                        .enumerate()
                        .map(|(offset, cell)| StyledCell {
                            value: cell.clone(),
                            style: style_for(cell, *r, from + offset),
                        })
                        .collect()
                })
                .collect();
            SheetRequest::WriteCells {
                range: GridRange {
                    sheet_id: block.sheet_id,
                    start_row,
                    end_row,
                    start_column: from,
                    end_column: to,
                },
                rows,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    use rust_decimal::Decimal;

    /// In-memory spreadsheet recording every batch it receives.
    struct FakeSpreadsheet {
        tabs: RefCell<Vec<TabInfo>>,
        main_values: RefCell<Vec<Vec<String>>>,
        batches: RefCell<Vec<Vec<SheetRequest>>>,
        reads: RefCell<Vec<String>>,
    }

    impl FakeSpreadsheet {
        fn new(tabs: Vec<TabInfo>, main_values: Vec<Vec<&str>>) -> Self {
            Self {
                tabs: RefCell::new(tabs),
                main_values: RefCell::new(to_values(main_values)),
                batches: RefCell::new(Vec::new()),
                reads: RefCell::new(Vec::new()),
            }
        }
    }

    impl SpreadsheetApi for FakeSpreadsheet {
        fn metadata(&self) -> Result<SpreadsheetMeta, SheetsError> {
            Ok(SpreadsheetMeta { spreadsheet_id: "ss".into(), tabs: self.tabs.borrow().clone() })
        }

        fn read_values(&self, range: &str) -> Result<Vec<Vec<String>>, SheetsError> {
            self.reads.borrow_mut().push(range.to_string());
            Ok(self.main_values.borrow().clone())
        }

        fn batch_update(&self, requests: &[SheetRequest]) -> Result<Vec<SheetReply>, SheetsError> {
            self.batches.borrow_mut().push(requests.to_vec());
            let mut replies = Vec::new();
            for request in requests {
                let reply = match request {
                    SheetRequest::AddTab { title, rows, columns, .. } => {
                        let tab = TabInfo { sheet_id: 900, title: title.clone(), row_count: *rows, column_count: *columns };
                        self.tabs.borrow_mut().push(tab.clone());
                        SheetReply::TabCreated(tab)
                    }
                    SheetRequest::DuplicateTab { source_sheet_id, new_title, .. } => {
                        let source = self.tabs.borrow().iter().find(|t| t.sheet_id == *source_sheet_id).cloned().unwrap();
                        let tab = TabInfo { sheet_id: 901, title: new_title.clone(), ..source };
                        self.tabs.borrow_mut().push(tab.clone());
                        SheetReply::TabCreated(tab)
                    }
                    _ => SheetReply::Empty,
                };
                replies.push(reply);
            }
            Ok(replies)
        }
    }

    fn to_values(rows: Vec<Vec<&str>>) -> Vec<Vec<String>> {
        rows.into_iter().map(|r| r.into_iter().map(String::from).collect()).collect()
    }

    fn tab(id: i64, title: &str, rows: usize, columns: usize) -> TabInfo {
        TabInfo { sheet_id: id, title: title.into(), row_count: rows, column_count: columns }
    }

    fn config(template: Option<&str>) -> GsheetConfig {
        GsheetConfig {
            spreadsheet_id: "ss".into(),
            sheet_name_template: "Raw 2006-01".into(),
            main_sheet_name: "Main".into(),
            template_sheet_name: template.map(String::from),
            anchor_match: AnchorMatch::Contains,
            auto_resize_columns: true,
        }
    }

    fn table() -> SheetTable {
        let mut header: Vec<String> = costpull_recon::materialize::FIXED_COLUMNS.iter().map(|s| s.to_string()).collect();
        header.push("Storage".into());
        let row = |team: &str, n: usize| {
            vec![
                SheetCell::Text(team.into()),
                SheetCell::Text("2024-08".into()),
                SheetCell::Text("Amazon".into()),
                SheetCell::Text(String::new()),
                SheetCell::Text("CC".into()),
                SheetCell::Text("acct".into()),
                SheetCell::Text(format!("{n}")),
                SheetCell::Formula(format!("=SUM(I{r}:I{r})", r = n + 1)),
                SheetCell::Number(Decimal::from(n)),
            ]
        };
        SheetTable { header, rows: vec![row("A", 1), row("B", 2)] }
    }

    fn month() -> ReportMonth {
        ReportMonth::parse("2024-08").unwrap()
    }

    fn main_values() -> Vec<Vec<&'static str>> {
        vec![vec!["Summary", ""], vec!["", "=INDIRECT(\"Raw 2024-08!A1\")"], vec!["", "Raw 2024-08 data"]]
    }

    #[test]
    fn template_rendering() {
        let m = month();
        assert_eq!(render_sheet_name("Raw 2006-01", &m), "Raw 2024-08");
        assert_eq!(render_sheet_name("Raw Data 01/2006", &m), "Raw Data 08/2024");
        assert_eq!(render_sheet_name("FY06 M1 D2 d02", &m), "FY24 M8 D1 d01");
        assert_eq!(render_sheet_name("Costs", &m), "Costs");
        assert_eq!(render_sheet_name("Ünïcode 2006", &m), "Ünïcode 2024");
        let dec = ReportMonth::parse("2023-12").unwrap();
        assert_eq!(render_sheet_name("1/2006", &dec), "12/2023");
    }

    #[test]
    fn creates_hidden_tab_and_writes_everything() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10)], main_values());
        let outcome = sync_table(&api, &config(None), &table(), &month()).unwrap();

        assert_eq!(outcome.origin, BlockOrigin::Created);
        assert!(outcome.header_written && outcome.total_written);
        assert_eq!(api.reads.borrow().as_slice(), ["'Main'!A1:J50".to_string()]);

        let batches = api.batches.borrow();
        assert_eq!(batches.len(), 3);
        assert_eq!(
            batches[0],
            vec![SheetRequest::AddTab { title: "Raw 2024-08".into(), index: 1, rows: 3, columns: 9, hidden: true }]
        );

        // write and refresh travel together
        assert_eq!(batches[1].len(), 2);
        let SheetRequest::WriteCells { range, rows } = &batches[1][0] else { panic!("expected write") };
        assert_eq!((range.start_row, range.end_row, range.start_column, range.end_column), (0, 3, 0, 9));
        assert_eq!(rows[0][0].style, CellStyle::Header);
        assert_eq!(rows[1][7].style, CellStyle::Total);
        assert_eq!(rows[1][8].style, CellStyle::Currency);
        assert_eq!(rows[1][0].style, CellStyle::Plain);

        // first cell containing the name is B2
        let expected_anchor = GridRange { sheet_id: 1, start_row: 2, end_row: 4, start_column: 1, end_column: 2 };
        assert_eq!(outcome.anchor, expected_anchor);
        assert_eq!(batches[1][1], force_reference_refresh(expected_anchor));

        assert_eq!(batches[2], vec![SheetRequest::AutoResizeColumns { sheet_id: 900 }]);
    }

    #[test]
    fn exact_anchor_skips_partial_matches() {
        let values = vec![vec!["Raw 2024-08 (old)"], vec!["Raw 2024-08"]];
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 10, 1)], values);
        let mut cfg = config(None);
        cfg.anchor_match = AnchorMatch::Exact;
        let outcome = sync_table(&api, &cfg, &table(), &month()).unwrap();
        assert_eq!(outcome.anchor.start_row, 2);
        assert_eq!(outcome.anchor.end_row, 4);
    }

    #[test]
    fn existing_tab_skips_header() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10), tab(7, "Raw 2024-08", 100, 9)], main_values());
        let outcome = sync_table(&api, &config(None), &table(), &month()).unwrap();
        assert_eq!(outcome.origin, BlockOrigin::Existing);
        assert!(!outcome.header_written);
        assert!(outcome.total_written);

        let batches = api.batches.borrow();
        // no tab creation
        assert_eq!(batches.len(), 2);
        let SheetRequest::WriteCells { range, rows } = &batches[0][0] else { panic!("expected write") };
        assert_eq!(range.sheet_id, 7);
        assert_eq!((range.start_row, range.end_row), (1, 100));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0].value, SheetCell::Text("A".into()));
    }

    #[test]
    fn wider_existing_tab_keeps_its_total_column() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10), tab(7, "Raw 2024-08", 100, 12)], main_values());
        let outcome = sync_table(&api, &config(None), &table(), &month()).unwrap();
        assert!(!outcome.total_written);

        let batches = api.batches.borrow();
        let writes: Vec<&GridRange> = batches[0]
            .iter()
            .filter_map(|r| match r {
                SheetRequest::WriteCells { range, .. } => Some(range),
                _ => None,
            })
            .collect();
        assert_eq!(writes.len(), 2);
        assert_eq!((writes[0].start_column, writes[0].end_column), (0, 7));
        assert_eq!((writes[1].start_column, writes[1].end_column), (8, 12));
        assert!(matches!(batches[0].last(), Some(SheetRequest::CopyPaste { .. })));
    }

    #[test]
    fn existing_block_is_cleared_past_the_table() {
        // Last month's run left 99 data rows and two more category columns.
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10), tab(7, "Raw 2024-08", 100, 11)], main_values());
        sync_table(&api, &config(None), &table(), &month()).unwrap();

        let batches = api.batches.borrow();
        let writes: Vec<(&GridRange, usize)> = batches[0]
            .iter()
            .filter_map(|r| match r {
                SheetRequest::WriteCells { range, rows } => Some((range, rows.len())),
                _ => None,
            })
            .collect();
        assert!(!writes.is_empty());
        for (range, row_count) in &writes {
            assert_eq!(range.end_row, 100);
            assert_eq!(*row_count, 2);
        }
        assert_eq!(writes.last().unwrap().0.end_column, 11);
    }

    #[test]
    fn duplicated_template_is_written_to_its_full_grid() {
        let api = FakeSpreadsheet::new(
            vec![tab(1, "Main", 50, 10), tab(3, "Raw Template", 200, 9)],
            main_values(),
        );
        sync_table(&api, &config(Some("Raw Template")), &table(), &month()).unwrap();
        let SheetRequest::WriteCells { range, rows } = &api.batches.borrow()[1][0] else { panic!("expected write") };
        assert_eq!((range.start_row, range.end_row, range.end_column), (0, 200, 9));
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn template_is_duplicated_with_header() {
        let api = FakeSpreadsheet::new(
            vec![tab(1, "Main", 50, 10), tab(3, "Raw Template", 200, 9)],
            main_values(),
        );
        let outcome = sync_table(&api, &config(Some("Raw Template")), &table(), &month()).unwrap();
        assert_eq!(outcome.origin, BlockOrigin::Duplicated);
        assert!(outcome.header_written);
        assert!(outcome.total_written);
        assert_eq!(
            api.batches.borrow()[0],
            vec![SheetRequest::DuplicateTab { source_sheet_id: 3, new_title: "Raw 2024-08".into(), insert_index: 2 }]
        );
    }

    #[test]
    fn missing_template_is_fatal() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10)], main_values());
        let err = sync_table(&api, &config(Some("Nope")), &table(), &month()).unwrap_err();
        assert!(matches!(err, SheetsError::TemplateNotFound(_)));
    }

    #[test]
    fn small_existing_block_is_fatal() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10), tab(7, "Raw 2024-08", 2, 9)], main_values());
        let err = sync_table(&api, &config(None), &table(), &month()).unwrap_err();
        assert!(matches!(err, SheetsError::BlockTooSmall { needed_rows: 3, .. }));
        assert!(err.is_protocol());
        // nothing written
        assert!(api.batches.borrow().is_empty());
    }

    #[test]
    fn missing_anchor_is_fatal() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10)], vec![vec!["nothing here"]]);
        let err = sync_table(&api, &config(None), &table(), &month()).unwrap_err();
        assert!(matches!(err, SheetsError::AnchorNotFound { .. }));
    }

    #[test]
    fn failed_run_leaves_no_tab_and_rerun_writes_header() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10)], vec![vec!["nothing here"]]);
        let err = sync_table(&api, &config(None), &table(), &month()).unwrap_err();
        assert!(matches!(err, SheetsError::AnchorNotFound { .. }));
        assert!(api.batches.borrow().is_empty());
        assert_eq!(api.tabs.borrow().len(), 1);

        // The operator adds the reference and runs again.
        *api.main_values.borrow_mut() = to_values(main_values());
        let outcome = sync_table(&api, &config(None), &table(), &month()).unwrap();
        assert_eq!(outcome.origin, BlockOrigin::Created);
        assert!(outcome.header_written);
    }

    #[test]
    fn small_template_is_rejected_before_duplicating() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10), tab(3, "Raw Template", 2, 9)], main_values());
        let err = sync_table(&api, &config(Some("Raw Template")), &table(), &month()).unwrap_err();
        assert!(matches!(err, SheetsError::BlockTooSmall { rows: 2, .. }));
        assert!(api.batches.borrow().is_empty());
    }

    #[test]
    fn missing_main_sheet_is_fatal() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Other", 50, 10)], main_values());
        let err = sync_table(&api, &config(None), &table(), &month()).unwrap_err();
        assert!(matches!(err, SheetsError::MainSheetNotFound(ref n) if n == "Main"));
    }

    #[test]
    fn auto_resize_can_be_disabled() {
        let api = FakeSpreadsheet::new(vec![tab(1, "Main", 50, 10)], main_values());
        let mut cfg = config(None);
        cfg.auto_resize_columns = false;
        sync_table(&api, &cfg, &table(), &month()).unwrap();
        assert_eq!(api.batches.borrow().len(), 2);
    }
}
