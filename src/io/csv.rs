use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};

use crate::error::{PipelineError, Result};
use crate::model::{Cell, Record, SourceId, UnifiedKey, UnifiedTable};

const UNIFIED_HEADER: [&str; 7] = [
    "reporter",
    "partner",
    "year",
    "indicator",
    "value",
    "unit",
    "source",
];

/// Persists the unified table. Rows are emitted in ascending key order and
/// `read_unified_table` restores an identical table, so the file doubles as
/// a stable interchange format.
pub fn write_unified_table(path: &Path, table: &UnifiedTable) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record(UNIFIED_HEADER)?;

    for (key, indicator, cell) in table.iter() {
        let year = key.year.to_string();
        let value = cell.value.to_string();
        writer.write_record([
            key.reporter.as_str(),
            key.partner.as_deref().unwrap_or(""),
            year.as_str(),
            indicator,
            value.as_str(),
            cell.unit.as_deref().unwrap_or(""),
            cell.source.as_str(),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

/// Reads a unified table written by [`write_unified_table`].
pub fn read_unified_table(path: &Path) -> Result<UnifiedTable> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_path(path)?;
    let mut table = UnifiedTable::new();

    for (row_idx, result) in reader.records().enumerate() {
        let row = result?;
        let field = |idx: usize| row.get(idx).unwrap_or("").to_string();

        let year = field(2).parse::<i32>().map_err(|_| {
            PipelineError::InvalidTableRow(format!("row {}: invalid year '{}'", row_idx + 2, field(2)))
        })?;
        let value = field(4).parse::<f64>().map_err(|_| {
            PipelineError::InvalidTableRow(format!(
                "row {}: invalid value '{}'",
                row_idx + 2,
                field(4)
            ))
        })?;
        let source = field(6).parse::<SourceId>().map_err(|error| {
            PipelineError::InvalidTableRow(format!("row {}: {error}", row_idx + 2))
        })?;

        let key = UnifiedKey {
            reporter: field(0),
            partner: non_empty(field(1)),
            year,
        };
        table.insert(
            key,
            field(3),
            Cell {
                value,
                unit: non_empty(field(5)),
                source,
            },
        );
    }

    Ok(table)
}

/// Dumps one source's raw records before mapping, mirroring the per-source
/// frames the pipeline keeps alongside the merged output.
pub fn write_records(path: &Path, records: &[Record]) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(path)?;
    writer.write_record([
        "source",
        "entity_code",
        "partner_code",
        "year",
        "indicator",
        "value",
        "unit",
    ])?;

    for record in records {
        let year = record.year.to_string();
        let value = record.value.to_string();
        writer.write_record([
            record.source.as_str(),
            record.entity_code.as_str(),
            record.partner_code.as_deref().unwrap_or(""),
            year.as_str(),
            record.indicator.as_str(),
            value.as_str(),
            record.unit.as_deref().unwrap_or(""),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
