//! CSV flattening of the first worksheet

use crate::error::{ReportError, Result};
use crate::placeholder::format_float;
use crate::reader::{CellValue, Document, Row};

/// Write the first sheet of a rendered document as delimited text.
///
/// Every record spans columns `A` through the last used column so the output
/// stays rectangular. Copied formulas lose their cached value (the workbook is
/// recalculated when opened), so formula cells come out as empty fields.
pub fn write_csv(document: &Document, delimiter: u8, skip_empty_rows: bool) -> Result<Vec<u8>> {
    let sheet = document
        .sheets
        .first()
        .ok_or_else(|| ReportError::package("workbook has no sheets"))?;
    let last_column = sheet.used_range().map(|r| r.last_column()).unwrap_or(0);

    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .from_writer(Vec::new());

    for row in sheet.rows.values() {
        if skip_empty_rows && !row.has_values() {
            continue;
        }
        writer.write_record(record(row, last_column))?;
    }

    writer
        .into_inner()
        .map_err(|e| ReportError::Io(e.into_error()))
}

fn record(row: &Row, last_column: u32) -> Vec<String> {
    (1..=last_column)
        .map(|col| row.cells.get(&col).map(|c| cell_text(&c.value)).unwrap_or_default())
        .collect()
}

fn cell_text(value: &CellValue) -> String {
    match value {
        CellValue::Empty => String::new(),
        CellValue::Number(n) => format_float(*n),
        CellValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        CellValue::Text(s) | CellValue::Error(s) => s.clone(),
        CellValue::Formula { cached, .. } => cached.clone().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&CellValue::Number(3.0)), "3");
        assert_eq!(cell_text(&CellValue::Number(2.5)), "2.5");
        assert_eq!(cell_text(&CellValue::Bool(true)), "TRUE");
        assert_eq!(
            cell_text(&CellValue::Formula {
                formula: "SUM(A1:A2)".into(),
                cached: None,
            }),
            ""
        );
    }
}
