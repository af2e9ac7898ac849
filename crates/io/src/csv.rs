// CSV export of the materialized cost table

use std::io::Write;
use std::path::Path;

use costpull_recon::SheetTable;

use crate::OutputError;

/// Write the table (header first) to `path`, one literal string per cell.
pub fn export(table: &SheetTable, path: &Path) -> Result<(), OutputError> {
    let writer = csv::WriterBuilder::new()
        .from_path(path)
        .map_err(|e| OutputError::csv(path, e))?;
    write_table(table, writer).map_err(|e| OutputError::csv(path, e))?;
    tracing::info!(path = %path.display(), rows = table.data_row_count(), "wrote csv output");
    Ok(())
}

/// Write the table to any sink.
pub fn write_to<W: Write>(table: &SheetTable, sink: W) -> Result<(), csv::Error> {
    write_table(table, csv::Writer::from_writer(sink))
}

fn write_table<W: Write>(table: &SheetTable, mut writer: csv::Writer<W>) -> Result<(), csv::Error> {
    for record in table.to_text_rows() {
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
