use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;

use async_trait::async_trait;
use csv::ReaderBuilder;
use tracing::{info, warn};

use crate::config::GravitySourceConfig;
use crate::connectors::{FetchOutcome, SourceConnector};
use crate::error::{PipelineError, Result};
use crate::model::{Record, SourceId};

/// Reads the static gravity dataset from disk. The file holds one row per
/// directed country pair; the connector collapses the two directions into a
/// single symmetric pair and replicates each pair across the requested
/// years so the merge join key lines up with the trade records.
pub struct GravityConnector {
    config: GravitySourceConfig,
    years: Vec<i32>,
}

/// Variables per symmetric (min, max) pair.
type PairTable = BTreeMap<(String, String), BTreeMap<String, f64>>;

impl GravityConnector {
    pub fn new(config: GravitySourceConfig, years: Vec<i32>) -> Self {
        Self { config, years }
    }
}

#[async_trait]
impl SourceConnector for GravityConnector {
    fn source(&self) -> SourceId {
        SourceId::Gravity
    }

    async fn fetch(&self) -> Result<FetchOutcome> {
        if !self.config.path.exists() {
            return Err(PipelineError::SourceUnavailable {
                source_id: SourceId::Gravity,
                reason: format!("dataset not found at {}", self.config.path.display()),
            });
        }
        let file = File::open(&self.config.path).map_err(|error| {
            PipelineError::SourceUnavailable {
                source_id: SourceId::Gravity,
                reason: error.to_string(),
            }
        })?;

        let pairs = load_pairs(file, &self.config.variables)?;
        let mut records = Vec::new();
        for ((origin, destination), variables) in &pairs {
            for (variable, value) in variables {
                for &year in &self.years {
                    records.push(Record {
                        source: SourceId::Gravity,
                        entity_code: origin.clone(),
                        partner_code: Some(destination.clone()),
                        year,
                        indicator: variable.clone(),
                        value: *value,
                        unit: None,
                    });
                }
            }
        }

        info!(
            pairs = pairs.len(),
            records = records.len(),
            "gravity dataset loaded"
        );
        Ok(FetchOutcome {
            records,
            skipped_batches: 0,
        })
    }
}

/// Parses the gravity CSV into symmetric pairs. Of the two directed rows
/// for a pair, the first non-null value of each variable wins.
pub fn load_pairs<R: Read>(reader: R, variables: &[String]) -> Result<PairTable> {
    let mut csv_reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let headers = csv_reader
        .headers()
        .map_err(|error| malformed(error.to_string()))?
        .clone();

    let origin_idx = column_index(&headers, "iso3_o")?;
    let destination_idx = column_index(&headers, "iso3_d")?;
    let selected = select_variables(&headers, variables, origin_idx, destination_idx);

    let mut pairs: PairTable = BTreeMap::new();
    for result in csv_reader.records() {
        let row = result.map_err(|error| malformed(error.to_string()))?;
        let origin = normalise_code(row.get(origin_idx));
        let destination = normalise_code(row.get(destination_idx));
        if origin.is_empty() || destination.is_empty() {
            continue;
        }

        let key = if origin <= destination {
            (origin, destination)
        } else {
            (destination, origin)
        };
        let entry = pairs.entry(key).or_default();

        for (column_idx, name) in &selected {
            let cell = row.get(*column_idx).unwrap_or("").trim();
            if cell.is_empty() {
                continue;
            }
            let Ok(value) = cell.parse::<f64>() else {
                continue;
            };
            entry.entry(name.clone()).or_insert(value);
        }
    }

    Ok(pairs)
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|header| header.trim() == name)
        .ok_or_else(|| malformed(format!("missing required column '{name}'")))
}

/// Resolves the configured variable list against the file's header row.
/// `["all"]` keeps every non-key column; explicitly named columns that the
/// file lacks are reported and dropped.
fn select_variables(
    headers: &csv::StringRecord,
    variables: &[String],
    origin_idx: usize,
    destination_idx: usize,
) -> Vec<(usize, String)> {
    let keep_all = variables.len() == 1 && variables[0].eq_ignore_ascii_case("all");
    let mut selected = Vec::new();

    for (idx, header) in headers.iter().enumerate() {
        if idx == origin_idx || idx == destination_idx {
            continue;
        }
        let header = header.trim();
        if keep_all || variables.iter().any(|variable| variable == header) {
            selected.push((idx, header.to_string()));
        }
    }

    if !keep_all {
        for variable in variables {
            if !selected.iter().any(|(_, name)| name == variable) {
                warn!(variable, "configured gravity variable not present in file");
            }
        }
    }
    selected
}

fn normalise_code(cell: Option<&str>) -> String {
    cell.unwrap_or("").trim().to_ascii_uppercase()
}

fn malformed(detail: String) -> PipelineError {
    PipelineError::MalformedResponse {
        source_id: SourceId::Gravity,
        detail,
    }
}
