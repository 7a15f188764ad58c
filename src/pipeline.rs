use std::collections::BTreeSet;
use std::fs;

use futures::future::join_all;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{CountryScope, RunConfig};
use crate::connectors::{
    GravityConnector, MacroIndicatorConnector, SourceConnector, TradeFlowConnector,
};
use crate::coverage;
use crate::error::{PipelineError, Result};
use crate::io::{csv, excel_read, excel_write};
use crate::mapper::CodeMap;
use crate::merge;
use crate::model::{
    CoverageSummary, MergeReport, Record, RunReport, SourceId, SourceOutcome, SourceStatus,
    UnifiedTable, UnmappedRecord,
};
use crate::report;

/// File name of the persisted unified table.
pub const UNIFIED_CSV: &str = "unified.csv";
/// File name of the summary workbook.
pub const SUMMARY_XLSX: &str = "summary.xlsx";

/// Everything a run produces, returned to the caller after the artifacts
/// have been written.
#[derive(Debug)]
pub struct RunArtifacts {
    pub table: UnifiedTable,
    pub coverage: CoverageSummary,
    pub merge_report: MergeReport,
    pub unmapped: Vec<UnmappedRecord>,
    pub report: RunReport,
}

/// Executes one full pipeline run: load the code map, fetch every enabled
/// source, normalise codes, merge, and write the output artifacts.
#[instrument(level = "info", skip_all, fields(output = %config.output_dir.display()))]
pub async fn run(config: &RunConfig) -> Result<RunArtifacts> {
    let code_map = excel_read::load_code_map(&config.mapping_path)?;
    let connectors = build_connectors(config, &code_map)?;
    run_with_connectors(config, &code_map, connectors).await
}

/// Builds the live connectors for every enabled source. Country scopes are
/// resolved against the code map's canonical universe and translated to
/// the source-native codes each API expects.
pub fn build_connectors(
    config: &RunConfig,
    code_map: &CodeMap,
) -> Result<Vec<Box<dyn SourceConnector>>> {
    let universe = code_map.canonical_codes();
    let years: Vec<i32> = config.years.iter().collect();
    let partner_scope = config.partner_scope()?;
    let reporters_iso = config.reporter_scope()?.resolve(&universe);
    let partners_iso = partner_scope.resolve(&universe);

    let mut connectors: Vec<Box<dyn SourceConnector>> = Vec::new();

    if config.trade.enabled {
        let reporters = native_codes(code_map, SourceId::Trade, &reporters_iso);
        let partner_filter = match &partner_scope {
            CountryScope::All => None,
            CountryScope::Explicit(_) => Some(
                native_codes(code_map, SourceId::Trade, &partners_iso)
                    .into_iter()
                    .collect::<BTreeSet<String>>(),
            ),
        };
        connectors.push(Box::new(TradeFlowConnector::new(
            config.trade.clone(),
            years.clone(),
            reporters,
            partner_filter,
        )));
    }

    if config.macro_data.enabled {
        // Macro indicators are needed for reporters and partners alike, so
        // both scopes feed the country list.
        let mut countries_iso = reporters_iso.clone();
        countries_iso.extend(partners_iso.iter().cloned());
        countries_iso.sort();
        countries_iso.dedup();
        let countries = native_codes(code_map, SourceId::Macro, &countries_iso);
        connectors.push(Box::new(MacroIndicatorConnector::new(
            config.macro_data.clone(),
            config.years,
            countries,
            config.indicators.clone(),
        )));
    }

    if config.gravity.enabled {
        connectors.push(Box::new(GravityConnector::new(
            config.gravity.clone(),
            years,
        )));
    }

    Ok(connectors)
}

/// Runs the pipeline over an explicit connector set. This is the seam the
/// integration tests use to substitute synthetic sources for the live
/// APIs.
pub async fn run_with_connectors(
    config: &RunConfig,
    code_map: &CodeMap,
    connectors: Vec<Box<dyn SourceConnector>>,
) -> Result<RunArtifacts> {
    let run_id = Uuid::new_v4();
    info!(%run_id, sources = connectors.len(), "pipeline run started");
    fs::create_dir_all(&config.output_dir)?;

    // The merge must not start before every connector has terminated, so
    // all fetch futures are awaited together here.
    let results = join_all(connectors.iter().map(|connector| connector.fetch())).await;

    let mut outcomes = Vec::new();
    let mut fetched: Vec<(SourceId, Vec<Record>)> = Vec::new();
    for (connector, result) in connectors.iter().zip(results) {
        let source = connector.source();
        match result {
            Ok(outcome) => {
                let dump_path = config.output_dir.join(format!("{source}_records.csv"));
                csv::write_records(&dump_path, &outcome.records)?;
                outcomes.push(SourceOutcome {
                    source,
                    status: SourceStatus::Fetched {
                        records: outcome.records.len(),
                        skipped_batches: outcome.skipped_batches,
                    },
                });
                fetched.push((source, outcome.records));
            }
            Err(error) => {
                warn!(%source, %error, "source failed, continuing without its contribution");
                if config.require_all_sources {
                    return Err(PipelineError::RequiredSourceFailed {
                        source_id: source,
                        reason: error.to_string(),
                    });
                }
                outcomes.push(SourceOutcome {
                    source,
                    status: SourceStatus::Failed {
                        reason: error.to_string(),
                    },
                });
            }
        }
    }

    let enabled: BTreeSet<SourceId> = outcomes.iter().map(|outcome| outcome.source).collect();
    for source in SourceId::ALL {
        if !enabled.contains(&source) {
            outcomes.push(SourceOutcome {
                source,
                status: SourceStatus::Disabled,
            });
        }
    }

    if fetched.is_empty() {
        return Err(PipelineError::NoUsableSource);
    }

    let mut unmapped = Vec::new();
    let mut mapped_tables = Vec::new();
    for (source, records) in fetched {
        let total = records.len();
        let (mapped, mut bucket) = code_map.apply(records);
        info!(
            %source,
            total,
            mapped = mapped.len(),
            unmapped = bucket.len(),
            "codes resolved"
        );
        unmapped.append(&mut bucket);
        mapped_tables.push(mapped);
    }

    let (table, merge_report) = merge::merge(mapped_tables, &config.priority);
    csv::write_unified_table(&config.output_dir.join(UNIFIED_CSV), &table)?;

    let expected: BTreeSet<String> = match &config.expected_countries {
        Some(list) => list.iter().cloned().collect(),
        None => code_map.canonical_codes(),
    };
    let summary = coverage::summarize(&table, &expected);

    let run_report = RunReport {
        run_id,
        sources: outcomes,
        unmapped_records: unmapped.len(),
        collisions: merge_report.collisions.len(),
        merged_cells: table.len(),
    };
    let workbook = report::build_workbook(
        &table,
        &summary,
        &merge_report,
        &unmapped,
        &run_report,
        code_map,
    );
    excel_write::write_workbook(&config.output_dir.join(SUMMARY_XLSX), &workbook)?;

    info!(
        %run_id,
        merged_cells = table.len(),
        collisions = merge_report.collisions.len(),
        unmapped = unmapped.len(),
        "pipeline run finished"
    );
    Ok(RunArtifacts {
        table,
        coverage: summary,
        merge_report,
        unmapped,
        report: run_report,
    })
}

fn native_codes(code_map: &CodeMap, source: SourceId, iso3_codes: &[String]) -> Vec<String> {
    let mut codes = Vec::with_capacity(iso3_codes.len());
    for iso3 in iso3_codes {
        match code_map.reverse(source, iso3) {
            Some(code) => codes.push(code.to_string()),
            None => warn!(%source, %iso3, "no source-native code known, skipping country"),
        }
    }
    codes
}
