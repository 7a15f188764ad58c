use std::collections::BTreeMap;
use std::path::Path;

use calamine::{DataType, Reader, Xlsx, open_workbook};
use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::mapper::{CodeEntry, CodeMap};
use crate::model::SourceId;

/// Sheet holding the (source, raw_code, iso3) mapping rows.
pub const CODES_SHEET: &str = "Codes";
/// Optional sheet holding (source, code, description) indicator labels.
pub const INDICATORS_SHEET: &str = "Indicators";

/// Loads the code-mapping workbook consumed at startup. The map is
/// read-only configuration for the rest of the run.
pub fn load_code_map(path: &Path) -> Result<CodeMap> {
    if !path.exists() {
        return Err(PipelineError::MissingInput(path.to_path_buf()));
    }
    let mut workbook: Xlsx<_> = open_workbook(path)?;

    let codes_range = read_required_sheet(&mut workbook, CODES_SHEET)?;
    let entries = parse_code_rows(&codes_range)?;

    let indicator_labels = match workbook.worksheet_range(INDICATORS_SHEET) {
        Some(range_result) => parse_indicator_rows(&range_result.map_err(PipelineError::from)?)?,
        None => BTreeMap::new(),
    };

    debug!(
        entries = entries.len(),
        indicator_labels = indicator_labels.len(),
        "mapping workbook loaded"
    );
    CodeMap::new(entries, indicator_labels)
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<calamine::Range<DataType>> {
    let range_result = workbook
        .worksheet_range(name)
        .ok_or_else(|| PipelineError::InvalidMapping(format!("missing sheet '{name}'")))?;
    let range = range_result.map_err(PipelineError::from)?;
    Ok(range)
}

fn parse_code_rows(range: &calamine::Range<DataType>) -> Result<Vec<CodeEntry>> {
    let mut entries = Vec::new();

    for (row_idx, row) in range.rows().enumerate().skip(1) {
        let source = cell_to_string(row.first());
        if source.is_empty() {
            continue;
        }
        let raw_code = normalise_raw_code(cell_to_string(row.get(1)));
        let iso3 = cell_to_string(row.get(2)).to_ascii_uppercase();
        if raw_code.is_empty() || iso3.is_empty() {
            return Err(PipelineError::InvalidMapping(format!(
                "row {} of sheet '{CODES_SHEET}' is incomplete",
                row_idx + 1
            )));
        }

        let source = source
            .parse::<SourceId>()
            .map_err(PipelineError::InvalidMapping)?;
        entries.push(CodeEntry {
            source,
            raw_code,
            iso3,
        });
    }

    if entries.is_empty() {
        return Err(PipelineError::InvalidMapping(format!(
            "sheet '{CODES_SHEET}' contains no mapping rows"
        )));
    }
    Ok(entries)
}

/// Numeric source codes are zero-padded to three digits so entries typed
/// as numbers in the workbook match the codes connectors emit ("4" and
/// "004" are the same country).
fn normalise_raw_code(code: String) -> String {
    if !code.is_empty() && code.len() < 3 && code.bytes().all(|byte| byte.is_ascii_digit()) {
        format!("{code:0>3}")
    } else {
        code
    }
}

fn parse_indicator_rows(range: &calamine::Range<DataType>) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();

    for row in range.rows().skip(1) {
        let source = cell_to_string(row.first());
        if source.is_empty() {
            continue;
        }
        // The source column is informational; labels are keyed by code.
        let code = cell_to_string(row.get(1));
        let description = cell_to_string(row.get(2));
        if code.is_empty() {
            continue;
        }
        labels.insert(code, description);
    }

    Ok(labels)
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.trim().to_string(),
        Some(DataType::Float(value)) => {
            // Numeric codes round-trip through Excel as floats; keep the
            // integer rendering so "842" does not become "842.0".
            if value.fract() == 0.0 {
                format!("{}", *value as i64)
            } else {
                value.to_string()
            }
        }
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string().trim().to_string(),
    }
}
