use std::collections::BTreeSet;

use crate::coverage;
use crate::io::excel_write::{SheetTable, WorkbookData};
use crate::mapper::CodeMap;
use crate::model::{
    CoverageSummary, MergeReport, RunReport, SourceStatus, UnifiedTable, UnmappedRecord,
};

/// Sheet holding the per-(indicator, year) completeness figures.
pub const COVERAGE_SHEET: &str = "Coverage";

/// Flattens the run artifacts into the tables of the summary workbook.
pub fn build_workbook(
    table: &UnifiedTable,
    summary: &CoverageSummary,
    merge_report: &MergeReport,
    unmapped: &[UnmappedRecord],
    run: &RunReport,
    code_map: &CodeMap,
) -> WorkbookData {
    let tables = vec![
        coverage_sheet(summary),
        yearly_reporters_sheet(table),
        country_year_matrix_sheet(table),
        indicator_map_sheet(table, code_map),
        collisions_sheet(merge_report),
        unmapped_sheet(unmapped),
        sources_sheet(run),
    ];
    WorkbookData { tables }
}

fn coverage_sheet(summary: &CoverageSummary) -> SheetTable {
    let mut sheet = SheetTable::new(
        COVERAGE_SHEET,
        &[
            "indicator",
            "year",
            "expected",
            "present",
            "missing_count",
            "missing",
        ],
    );
    for cell in &summary.cells {
        sheet.push_row(vec![
            cell.indicator.clone(),
            cell.year.to_string(),
            cell.expected.to_string(),
            cell.present.to_string(),
            cell.missing.len().to_string(),
            cell.missing.join(" "),
        ]);
    }
    sheet
}

fn yearly_reporters_sheet(table: &UnifiedTable) -> SheetTable {
    let mut sheet = SheetTable::new("YearlyReporters", &["year", "reporters"]);
    for (year, count) in coverage::reporters_by_year(table) {
        sheet.push_row(vec![year.to_string(), count.to_string()]);
    }
    sheet
}

fn country_year_matrix_sheet(table: &UnifiedTable) -> SheetTable {
    let matrix = coverage::country_year_matrix(table);
    let years: BTreeSet<i32> = matrix
        .values()
        .flat_map(|by_year| by_year.keys().copied())
        .collect();

    let mut columns = vec!["reporter".to_string()];
    columns.extend(years.iter().map(i32::to_string));
    let mut sheet = SheetTable {
        sheet_name: "CountryYearMatrix".to_string(),
        columns,
        rows: Vec::new(),
    };

    for (reporter, by_year) in &matrix {
        let mut row = vec![reporter.clone()];
        for year in &years {
            row.push(
                by_year
                    .get(year)
                    .map(usize::to_string)
                    .unwrap_or_default(),
            );
        }
        sheet.rows.push(row);
    }
    sheet
}

fn indicator_map_sheet(table: &UnifiedTable, code_map: &CodeMap) -> SheetTable {
    // Indicators observed in the table plus everything the mapping
    // workbook describes, so absent-but-requested codes still show up.
    let mut indicators: BTreeSet<String> = table
        .iter()
        .map(|(_key, indicator, _cell)| indicator.to_string())
        .collect();
    indicators.extend(code_map.indicator_labels().keys().cloned());

    let mut sheet = SheetTable::new("IndicatorMap", &["code", "description"]);
    for indicator in indicators {
        let label = code_map.indicator_label(&indicator).unwrap_or_default();
        sheet.push_row(vec![indicator.clone(), label.to_string()]);
    }
    sheet
}

fn collisions_sheet(merge_report: &MergeReport) -> SheetTable {
    let mut sheet = SheetTable::new(
        "Collisions",
        &[
            "reporter",
            "partner",
            "year",
            "indicator",
            "kept_source",
            "kept_value",
            "dropped_source",
            "dropped_value",
        ],
    );
    for collision in &merge_report.collisions {
        sheet.push_row(vec![
            collision.key.reporter.clone(),
            collision.key.partner.clone().unwrap_or_default(),
            collision.key.year.to_string(),
            collision.indicator.clone(),
            collision.kept_source.to_string(),
            collision.kept_value.to_string(),
            collision.dropped_source.to_string(),
            collision.dropped_value.to_string(),
        ]);
    }
    sheet
}

fn unmapped_sheet(unmapped: &[UnmappedRecord]) -> SheetTable {
    let mut sheet = SheetTable::new(
        "Unmapped",
        &[
            "source",
            "unresolved_code",
            "entity_code",
            "partner_code",
            "year",
            "indicator",
            "value",
        ],
    );
    for entry in unmapped {
        let record = &entry.record;
        sheet.push_row(vec![
            record.source.to_string(),
            entry.raw_code.clone(),
            record.entity_code.clone(),
            record.partner_code.clone().unwrap_or_default(),
            record.year.to_string(),
            record.indicator.clone(),
            record.value.to_string(),
        ]);
    }
    sheet
}

fn sources_sheet(run: &RunReport) -> SheetTable {
    let mut sheet = SheetTable::new("Sources", &["source", "status", "records", "skipped_batches"]);
    for outcome in &run.sources {
        let (status, records, skipped) = match &outcome.status {
            SourceStatus::Fetched {
                records,
                skipped_batches,
            } => (
                "fetched".to_string(),
                records.to_string(),
                skipped_batches.to_string(),
            ),
            SourceStatus::Failed { reason } => {
                (format!("failed: {reason}"), String::new(), String::new())
            }
            SourceStatus::Disabled => ("disabled".to_string(), String::new(), String::new()),
        };
        sheet.push_row(vec![outcome.source.to_string(), status, records, skipped]);
    }
    sheet
}
