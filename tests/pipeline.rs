use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use rust_xlsxwriter::Workbook;
use tempfile::tempdir;
use trademerge::config::RunConfig;
use trademerge::connectors::{FetchOutcome, SourceConnector};
use trademerge::io::csv::read_unified_table;
use trademerge::mapper::{CodeEntry, CodeMap};
use trademerge::model::{Record, SourceId, SourceStatus, UnifiedKey};
use trademerge::pipeline::{self, SUMMARY_XLSX, UNIFIED_CSV};
use trademerge::{PipelineError, Result};

struct StaticConnector {
    source: SourceId,
    records: Vec<Record>,
}

#[async_trait]
impl SourceConnector for StaticConnector {
    fn source(&self) -> SourceId {
        self.source
    }

    async fn fetch(&self) -> Result<FetchOutcome> {
        Ok(FetchOutcome {
            records: self.records.clone(),
            skipped_batches: 0,
        })
    }
}

struct FailingConnector {
    source: SourceId,
}

#[async_trait]
impl SourceConnector for FailingConnector {
    fn source(&self) -> SourceId {
        self.source
    }

    async fn fetch(&self) -> Result<FetchOutcome> {
        Err(PipelineError::SourceUnavailable {
            source_id: self.source,
            reason: "connection refused".to_string(),
        })
    }
}

fn gdp_record(source: SourceId, entity: &str, value: f64) -> Record {
    Record {
        source,
        entity_code: entity.to_string(),
        partner_code: None,
        year: 2020,
        indicator: "NY.GDP.MKTP.CD".to_string(),
        value,
        unit: None,
    }
}

fn identity_map() -> CodeMap {
    let entries = [SourceId::Trade, SourceId::Macro]
        .into_iter()
        .flat_map(|source| {
            ["USA", "THA", "DEU"].into_iter().map(move |iso3| CodeEntry {
                source,
                raw_code: iso3.to_string(),
                iso3: iso3.to_string(),
            })
        });
    CodeMap::new(entries, BTreeMap::new()).expect("map builds")
}

fn test_config(output_dir: &Path, priority: &[&str]) -> RunConfig {
    let config: RunConfig = serde_json::from_value(serde_json::json!({
        "years": {"start": 2020, "end": 2020},
        "reporters": ["all"],
        "indicators": ["NY.GDP.MKTP.CD"],
        "output_dir": output_dir.to_str().expect("utf-8 path"),
        "mapping_path": "unused.xlsx",
        "trade": {"enabled": false, "base_url": "https://t.invalid", "api_key": "k"},
        "macro": {"enabled": false, "base_url": "https://m.invalid"},
        "gravity": {"enabled": false, "path": "unused.csv"},
        "priority": priority,
        "expected_countries": ["DEU", "THA", "USA"]
    }))
    .expect("config parses");
    config.validate().expect("config valid");
    config
}

fn usa_2020() -> UnifiedKey {
    UnifiedKey {
        reporter: "USA".to_string(),
        partner: None,
        year: 2020,
    }
}

#[tokio::test]
async fn priority_order_resolves_conflicting_sources() {
    let dir = tempdir().expect("temporary directory");
    let config = test_config(dir.path(), &["trade", "macro"]);
    let connectors: Vec<Box<dyn SourceConnector>> = vec![
        Box::new(StaticConnector {
            source: SourceId::Trade,
            records: vec![gdp_record(SourceId::Trade, "USA", 100.0)],
        }),
        Box::new(StaticConnector {
            source: SourceId::Macro,
            records: vec![gdp_record(SourceId::Macro, "USA", 105.0)],
        }),
    ];

    let artifacts = pipeline::run_with_connectors(&config, &identity_map(), connectors)
        .await
        .expect("run succeeds");

    let cell = artifacts
        .table
        .get(&usa_2020(), "NY.GDP.MKTP.CD")
        .expect("merged cell present");
    assert_eq!(cell.value, 100.0);
    assert_eq!(cell.source, SourceId::Trade);

    assert_eq!(artifacts.merge_report.collisions.len(), 1);
    let collision = &artifacts.merge_report.collisions[0];
    assert_eq!(collision.kept_value, 100.0);
    assert_eq!(collision.dropped_value, 105.0);
    assert_eq!(artifacts.report.collisions, 1);
}

#[tokio::test]
async fn flipped_priority_keeps_the_other_value() {
    let dir = tempdir().expect("temporary directory");
    let config = test_config(dir.path(), &["macro", "trade"]);
    let connectors: Vec<Box<dyn SourceConnector>> = vec![
        Box::new(StaticConnector {
            source: SourceId::Trade,
            records: vec![gdp_record(SourceId::Trade, "USA", 100.0)],
        }),
        Box::new(StaticConnector {
            source: SourceId::Macro,
            records: vec![gdp_record(SourceId::Macro, "USA", 105.0)],
        }),
    ];

    let artifacts = pipeline::run_with_connectors(&config, &identity_map(), connectors)
        .await
        .expect("run succeeds");

    let cell = artifacts
        .table
        .get(&usa_2020(), "NY.GDP.MKTP.CD")
        .expect("merged cell present");
    assert_eq!(cell.value, 105.0);
    assert_eq!(cell.source, SourceId::Macro);
}

#[tokio::test]
async fn artifacts_are_written_and_the_csv_round_trips() {
    let dir = tempdir().expect("temporary directory");
    let config = test_config(dir.path(), &["macro"]);
    let connectors: Vec<Box<dyn SourceConnector>> = vec![Box::new(StaticConnector {
        source: SourceId::Macro,
        records: vec![
            gdp_record(SourceId::Macro, "USA", 100.0),
            gdp_record(SourceId::Macro, "THA", 55.5),
        ],
    })];

    let artifacts = pipeline::run_with_connectors(&config, &identity_map(), connectors)
        .await
        .expect("run succeeds");

    let unified_path = dir.path().join(UNIFIED_CSV);
    assert!(unified_path.exists());
    let restored = read_unified_table(&unified_path).expect("unified table reads back");
    assert_eq!(restored, artifacts.table);

    assert!(dir.path().join(SUMMARY_XLSX).exists());
    assert!(dir.path().join("macro_records.csv").exists());

    // DEU is expected but absent for the single (indicator, year) cell.
    assert_eq!(artifacts.coverage.cells.len(), 1);
    let coverage = &artifacts.coverage.cells[0];
    assert_eq!(coverage.expected, 3);
    assert_eq!(coverage.present, 2);
    assert_eq!(coverage.missing, vec!["DEU".to_string()]);
}

#[tokio::test]
async fn a_failed_source_is_reported_and_the_run_continues() {
    let dir = tempdir().expect("temporary directory");
    let config = test_config(dir.path(), &["trade", "macro"]);
    let connectors: Vec<Box<dyn SourceConnector>> = vec![
        Box::new(FailingConnector {
            source: SourceId::Trade,
        }),
        Box::new(StaticConnector {
            source: SourceId::Macro,
            records: vec![gdp_record(SourceId::Macro, "USA", 105.0)],
        }),
    ];

    let artifacts = pipeline::run_with_connectors(&config, &identity_map(), connectors)
        .await
        .expect("run succeeds on the surviving source");

    let trade = artifacts
        .report
        .sources
        .iter()
        .find(|outcome| outcome.source == SourceId::Trade)
        .expect("trade outcome present");
    assert!(matches!(trade.status, SourceStatus::Failed { .. }));
    assert_eq!(artifacts.table.len(), 1);
}

#[tokio::test]
async fn require_all_sources_turns_a_failure_fatal() {
    let dir = tempdir().expect("temporary directory");
    let mut config = test_config(dir.path(), &["trade", "macro"]);
    config.require_all_sources = true;
    let connectors: Vec<Box<dyn SourceConnector>> = vec![
        Box::new(FailingConnector {
            source: SourceId::Trade,
        }),
        Box::new(StaticConnector {
            source: SourceId::Macro,
            records: vec![gdp_record(SourceId::Macro, "USA", 105.0)],
        }),
    ];

    let error = pipeline::run_with_connectors(&config, &identity_map(), connectors)
        .await
        .unwrap_err();
    assert!(matches!(
        error,
        PipelineError::RequiredSourceFailed {
            source: SourceId::Trade,
            ..
        }
    ));
}

#[tokio::test]
async fn every_source_failing_fails_the_run() {
    let dir = tempdir().expect("temporary directory");
    let config = test_config(dir.path(), &["trade"]);
    let connectors: Vec<Box<dyn SourceConnector>> = vec![Box::new(FailingConnector {
        source: SourceId::Trade,
    })];

    let error = pipeline::run_with_connectors(&config, &identity_map(), connectors)
        .await
        .unwrap_err();
    assert!(matches!(error, PipelineError::NoUsableSource));
}

#[tokio::test]
async fn unmapped_records_are_set_aside_not_merged() {
    let dir = tempdir().expect("temporary directory");
    let config = test_config(dir.path(), &["macro"]);
    let connectors: Vec<Box<dyn SourceConnector>> = vec![Box::new(StaticConnector {
        source: SourceId::Macro,
        records: vec![
            gdp_record(SourceId::Macro, "USA", 100.0),
            gdp_record(SourceId::Macro, "XKX", 9.0),
        ],
    })];

    let artifacts = pipeline::run_with_connectors(&config, &identity_map(), connectors)
        .await
        .expect("run succeeds");

    assert_eq!(artifacts.table.len(), 1);
    assert_eq!(artifacts.unmapped.len(), 1);
    assert_eq!(artifacts.unmapped[0].raw_code, "XKX");
    assert_eq!(artifacts.report.unmapped_records, 1);
}

fn write_mapping_workbook(path: &Path) {
    let mut workbook = Workbook::new();

    let codes = workbook.add_worksheet();
    codes.set_name("Codes").expect("sheet named");
    let code_rows = [
        ["source", "raw_code", "iso3"],
        ["trade", "842", "USA"],
        ["trade", "764", "THA"],
        ["macro", "USA", "USA"],
        ["macro", "THA", "THA"],
    ];
    for (row_idx, row) in code_rows.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            codes
                .write_string(row_idx as u32, col_idx as u16, *cell)
                .expect("cell written");
        }
    }

    let indicators = workbook.add_worksheet();
    indicators.set_name("Indicators").expect("sheet named");
    let indicator_rows = [
        ["source", "code", "description"],
        ["macro", "NY.GDP.MKTP.CD", "GDP (current US$)"],
    ];
    for (row_idx, row) in indicator_rows.iter().enumerate() {
        for (col_idx, cell) in row.iter().enumerate() {
            indicators
                .write_string(row_idx as u32, col_idx as u16, *cell)
                .expect("cell written");
        }
    }

    workbook.save(path).expect("workbook saved");
}

#[tokio::test]
async fn gravity_only_run_works_end_to_end_from_files() {
    let dir = tempdir().expect("temporary directory");
    let mapping_path = dir.path().join("mapping.xlsx");
    write_mapping_workbook(&mapping_path);

    let gravity_path = dir.path().join("gravity.csv");
    std::fs::write(
        &gravity_path,
        "iso3_o,iso3_d,dist,contig\nTHA,USA,13000.5,0\nUSA,THA,,0\n",
    )
    .expect("gravity file written");

    let output_dir = dir.path().join("out");
    let config: RunConfig = serde_json::from_value(serde_json::json!({
        "years": {"start": 2019, "end": 2020},
        "reporters": ["THA", "USA"],
        "output_dir": output_dir.to_str().expect("utf-8 path"),
        "mapping_path": mapping_path.to_str().expect("utf-8 path"),
        "trade": {"enabled": false, "base_url": "https://t.invalid", "api_key": "k"},
        "macro": {"enabled": false, "base_url": "https://m.invalid"},
        "gravity": {"enabled": true, "path": gravity_path.to_str().expect("utf-8 path"), "variables": ["dist"]},
        "priority": ["gravity"]
    }))
    .expect("config parses");
    config.validate().expect("config valid");

    let artifacts = pipeline::run(&config).await.expect("run succeeds");

    // One symmetric pair, one variable, two years.
    assert_eq!(artifacts.table.len(), 2);
    let key = UnifiedKey {
        reporter: "THA".to_string(),
        partner: Some("USA".to_string()),
        year: 2019,
    };
    let cell = artifacts.table.get(&key, "dist").expect("pair present");
    assert_eq!(cell.value, 13000.5);
    assert_eq!(cell.source, SourceId::Gravity);

    assert!(output_dir.join(UNIFIED_CSV).exists());
    assert!(output_dir.join(SUMMARY_XLSX).exists());

    let restored = read_unified_table(&output_dir.join(UNIFIED_CSV)).expect("round trip");
    assert_eq!(restored, artifacts.table);
}
