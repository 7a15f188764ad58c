use std::path::Path;

use rust_xlsxwriter::Workbook;

use crate::error::Result;

/// A table that will be materialised as one Excel sheet of the summary
/// report.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    pub fn new(sheet_name: &str, columns: &[&str]) -> Self {
        Self {
            sheet_name: sheet_name.to_string(),
            columns: columns.iter().map(|column| column.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        debug_assert_eq!(row.len(), self.columns.len());
        self.rows.push(row);
    }
}

/// All tables required to materialise the summary workbook, in sheet order.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbookData {
    pub tables: Vec<SheetTable>,
}

/// Writes the summary workbook to the given path. Each table becomes one
/// sheet with an autofiltered Excel table over its cells; numeric cells are
/// written as numbers so spreadsheet tools can aggregate them.
pub fn write_workbook(path: &Path, workbook: &WorkbookData) -> Result<()> {
    let mut workbook_writer = Workbook::new();

    for table in &workbook.tables {
        let worksheet = workbook_writer.add_worksheet();
        worksheet.set_name(&table.sheet_name)?;

        for (col_idx, header) in table.columns.iter().enumerate() {
            worksheet.write_string(0, col_idx as u16, header)?;
        }

        for (row_idx, row) in table.rows.iter().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                let row_idx = (row_idx + 1) as u32;
                let col_idx = col_idx as u16;
                match numeric_cell(cell) {
                    Some(number) => worksheet.write_number(row_idx, col_idx, number)?,
                    None => worksheet.write_string(row_idx, col_idx, cell)?,
                };
            }
        }

        let excel_table = rust_xlsxwriter::Table::new().set_autofilter(true);
        let col_end = (table.columns.len() as u16).saturating_sub(1);
        let row_end = if table.rows.is_empty() {
            0
        } else {
            table.rows.len() as u32
        };
        worksheet.add_table(0, 0, row_end, col_end, &excel_table)?;
    }

    workbook_writer.save(path)?;
    Ok(())
}

/// Zero-padded identifiers such as "004" stay text; everything else that
/// parses as a finite number is written as one.
fn numeric_cell(cell: &str) -> Option<f64> {
    if cell.is_empty() || (cell.len() > 1 && cell.starts_with('0') && !cell.starts_with("0.")) {
        return None;
    }
    cell.parse::<f64>().ok().filter(|number| number.is_finite())
}
