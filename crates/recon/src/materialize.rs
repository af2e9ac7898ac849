use rust_decimal::Decimal;

use crate::directory::AccountDirectory;
use crate::grid::CostGrid;

/// Fixed leading columns; discovered categories follow.
pub const FIXED_COLUMNS: [&str; 8] = [
    "Team",
    "Date",
    "Cloud Provider",
    "Payer ID",
    "Cost Center",
    "Account Name",
    "Account ID",
    "TOTAL",
];

pub const TEAM_COLUMN: usize = 0;
pub const PROVIDER_COLUMN: usize = 2;
pub const ACCOUNT_ID_COLUMN: usize = 6;
pub const TOTAL_COLUMN: usize = 7;
pub const FIRST_CATEGORY_COLUMN: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum SheetCell {
    Text(String),
    Number(Decimal),
    Formula(String),
}

impl SheetCell {
    /// The cell as a flat-file string: numbers in plain decimal, formulas as
    /// their text.
    pub fn as_text(&self) -> String {
        match self {
            SheetCell::Text(s) | SheetCell::Formula(s) => s.clone(),
            SheetCell::Number(n) => n.to_string(),
        }
    }

    fn sort_key(&self) -> String {
        self.as_text()
    }
}

/// Header plus one row per account.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<SheetCell>>,
}

impl SheetTable {
    pub fn width(&self) -> usize {
        self.header.len()
    }

    pub fn data_row_count(&self) -> usize {
        self.rows.len()
    }

    /// Header and data rows, including the header.
    pub fn row_count(&self) -> usize {
        self.rows.len() + 1
    }

    /// Categories in column order.
    pub fn categories(&self) -> &[String] {
        self.header.get(FIRST_CATEGORY_COLUMN..).unwrap_or(&[])
    }

    /// Every row (header first) as flat strings.
    pub fn to_text_rows(&self) -> Vec<Vec<String>> {
        std::iter::once(self.header.clone())
            .chain(self.rows.iter().map(|row| row.iter().map(SheetCell::as_text).collect()))
            .collect()
    }
}

/// Spreadsheet column letters for a zero-based index: `0 → A`, `25 → Z`,
/// `26 → AA`.
pub fn column_letters(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Turn the grid into the ordered output table.
///
/// Rows are ordered team-major (stable sorts by Account ID, then Cloud
/// Provider, then Team), and each row's TOTAL is a row-relative `SUM` over
/// the category columns, filled in after sorting.
pub fn materialize(grid: &CostGrid, directory: &AccountDirectory) -> SheetTable {
    let categories: Vec<String> = grid.categories().iter().cloned().collect();
    let header: Vec<String> = FIXED_COLUMNS
        .iter()
        .map(|c| c.to_string())
        .chain(categories.iter().cloned())
        .collect();

    let mut rows: Vec<Vec<SheetCell>> = Vec::new();
    for account in grid.accounts() {
        let Some(entry) = directory.lookup(account) else {
            continue;
        };
        let meta = grid.metadata(account).cloned().unwrap_or_default();
        let name = if meta.account_name.is_empty() {
            entry.description.clone()
        } else {
            meta.account_name
        };

        let mut row = vec![
            SheetCell::Text(entry.group.clone()),
            SheetCell::Text(meta.reporting_date),
            SheetCell::Text(entry.provider.clone()),
            SheetCell::Text(meta.payer_id),
            SheetCell::Text(meta.cost_center),
            SheetCell::Text(name),
            SheetCell::Text(entry.declared_id.clone()),
            SheetCell::Number(Decimal::ZERO),
        ];
        row.extend(categories.iter().map(|c| SheetCell::Number(grid.amount(account, c))));
        rows.push(row);
    }

    for column in [ACCOUNT_ID_COLUMN, PROVIDER_COLUMN, TEAM_COLUMN] {
        rows.sort_by_key(|row| row[column].sort_key());
    }

    if !categories.is_empty() {
        let first = column_letters(FIRST_CATEGORY_COLUMN);
        let last = column_letters(header.len() - 1);
        for (i, row) in rows.iter_mut().enumerate() {
            let sheet_row = i + 2;
            row[TOTAL_COLUMN] = SheetCell::Formula(format!("=SUM({first}{sheet_row}:{last}{sheet_row})"));
        }
    }

    SheetTable { header, rows }
}
