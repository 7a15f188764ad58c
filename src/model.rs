use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one of the external data sources feeding the pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// Bilateral trade-flow API.
    Trade,
    /// Macroeconomic-indicator API.
    Macro,
    /// Static bilateral gravity dataset.
    Gravity,
}

impl SourceId {
    /// All sources the pipeline knows about, in declaration order.
    pub const ALL: [SourceId; 3] = [SourceId::Trade, SourceId::Macro, SourceId::Gravity];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Trade => "trade",
            SourceId::Macro => "macro",
            SourceId::Gravity => "gravity",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trade" => Ok(SourceId::Trade),
            "macro" => Ok(SourceId::Macro),
            "gravity" => Ok(SourceId::Gravity),
            other => Err(format!("unknown source '{other}'")),
        }
    }
}

/// One observation as produced by a connector, before code mapping. The
/// entity and partner codes are the raw, source-native identifiers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub source: SourceId,
    pub entity_code: String,
    /// Absent for country-level observations such as macro indicators.
    pub partner_code: Option<String>,
    pub year: i32,
    pub indicator: String,
    pub value: f64,
    pub unit: Option<String>,
}

/// Join key of the unified table: canonical reporter, optional canonical
/// partner, and year. Ordering is lexicographic over the fields, with
/// country-level keys (no partner) sorting before bilateral ones.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnifiedKey {
    pub reporter: String,
    pub partner: Option<String>,
    pub year: i32,
}

/// A deduplicated value in the unified table, tagged with the source that
/// won the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub value: f64,
    pub unit: Option<String>,
    pub source: SourceId,
}

/// The merged output table. Entries are ordered by (key, indicator) and are
/// never mutated after the merge completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnifiedTable {
    cells: BTreeMap<(UnifiedKey, String), Cell>,
}

impl UnifiedTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a cell, returning the previous occupant if any.
    pub fn insert(&mut self, key: UnifiedKey, indicator: String, cell: Cell) -> Option<Cell> {
        self.cells.insert((key, indicator), cell)
    }

    pub fn get(&self, key: &UnifiedKey, indicator: &str) -> Option<&Cell> {
        self.cells.get(&(key.clone(), indicator.to_string()))
    }

    /// Iterates cells in ascending (key, indicator) order.
    pub fn iter(&self) -> impl Iterator<Item = (&UnifiedKey, &str, &Cell)> {
        self.cells
            .iter()
            .map(|((key, indicator), cell)| (key, indicator.as_str(), cell))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

/// A collision observed while merging: two sources supplied a value for the
/// same (key, indicator) and the priority order picked a winner.
#[derive(Debug, Clone, PartialEq)]
pub struct Collision {
    pub key: UnifiedKey,
    pub indicator: String,
    pub kept_source: SourceId,
    pub kept_value: f64,
    pub dropped_source: SourceId,
    pub dropped_value: f64,
}

/// All collisions resolved during one merge, in encounter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub collisions: Vec<Collision>,
}

/// A record whose entity or partner code could not be resolved to ISO3.
/// These are set aside, reported, and excluded from the merge.
#[derive(Debug, Clone, PartialEq)]
pub struct UnmappedRecord {
    pub record: Record,
    /// The code that failed to resolve.
    pub raw_code: String,
}

/// Present-versus-expected coverage for one (indicator, year) cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageCell {
    pub indicator: String,
    pub year: i32,
    pub expected: usize,
    pub present: usize,
    /// Expected ISO3 codes with no observation, sorted.
    pub missing: Vec<String>,
}

/// Completeness statistics over the merged table, ordered by
/// (indicator, year).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoverageSummary {
    pub cells: Vec<CoverageCell>,
}

/// Terminal state of one source at the end of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceStatus {
    Fetched {
        records: usize,
        skipped_batches: usize,
    },
    Failed {
        reason: String,
    },
    Disabled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub source: SourceId,
    pub status: SourceStatus,
}

/// Human-readable summary of a run, used for the final console report and
/// the exit-code decision.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub sources: Vec<SourceOutcome>,
    pub unmapped_records: usize,
    pub collisions: usize,
    pub merged_cells: usize,
}

impl RunReport {
    /// True when at least one source delivered records this run.
    pub fn any_source_contributed(&self) -> bool {
        self.sources
            .iter()
            .any(|outcome| matches!(outcome.status, SourceStatus::Fetched { .. }))
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {}", self.run_id)?;
        for outcome in &self.sources {
            match &outcome.status {
                SourceStatus::Fetched {
                    records,
                    skipped_batches,
                } => {
                    write!(f, "  {}: {records} records", outcome.source)?;
                    if *skipped_batches > 0 {
                        write!(f, " ({skipped_batches} malformed batches skipped)")?;
                    }
                    writeln!(f)?;
                }
                SourceStatus::Failed { reason } => {
                    writeln!(f, "  {}: failed ({reason})", outcome.source)?;
                }
                SourceStatus::Disabled => {
                    writeln!(f, "  {}: disabled", outcome.source)?;
                }
            }
        }
        writeln!(
            f,
            "  merged cells: {}, collisions: {}, unmapped records: {}",
            self.merged_cells, self.collisions, self.unmapped_records
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(reporter: &str, partner: Option<&str>, year: i32) -> UnifiedKey {
        UnifiedKey {
            reporter: reporter.to_string(),
            partner: partner.map(str::to_string),
            year,
        }
    }

    #[test]
    fn unified_table_iterates_in_key_order() {
        let mut table = UnifiedTable::new();
        let cell = Cell {
            value: 1.0,
            unit: None,
            source: SourceId::Trade,
        };
        table.insert(key("USA", Some("THA"), 2020), "x".into(), cell.clone());
        table.insert(key("DEU", None, 2019), "x".into(), cell.clone());
        table.insert(key("DEU", None, 2019), "a".into(), cell);

        let order: Vec<(String, String)> = table
            .iter()
            .map(|(k, indicator, _)| (k.reporter.clone(), indicator.to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("DEU".to_string(), "a".to_string()),
                ("DEU".to_string(), "x".to_string()),
                ("USA".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn source_id_round_trips_through_display() {
        for source in SourceId::ALL {
            assert_eq!(source.to_string().parse::<SourceId>(), Ok(source));
        }
    }
}
