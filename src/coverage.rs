use std::collections::{BTreeMap, BTreeSet};

use crate::model::{CoverageCell, CoverageSummary, UnifiedTable};

/// Computes completeness statistics over the merged table without mutating
/// it: for every (indicator, year) cell, which of the expected countries
/// actually reported an observation.
pub fn summarize(table: &UnifiedTable, expected: &BTreeSet<String>) -> CoverageSummary {
    let mut present: BTreeMap<(String, i32), BTreeSet<String>> = BTreeMap::new();

    for (key, indicator, _cell) in table.iter() {
        present
            .entry((indicator.to_string(), key.year))
            .or_default()
            .insert(key.reporter.clone());
    }

    let cells = present
        .into_iter()
        .map(|((indicator, year), reporters)| {
            let missing: Vec<String> = expected.difference(&reporters).cloned().collect();
            CoverageCell {
                indicator,
                year,
                expected: expected.len(),
                present: reporters.intersection(expected).count(),
                missing,
            }
        })
        .collect();

    CoverageSummary { cells }
}

/// Distinct reporters per year, for the summary report.
pub fn reporters_by_year(table: &UnifiedTable) -> BTreeMap<i32, usize> {
    let mut reporters: BTreeMap<i32, BTreeSet<&str>> = BTreeMap::new();
    for (key, _indicator, _cell) in table.iter() {
        reporters
            .entry(key.year)
            .or_default()
            .insert(key.reporter.as_str());
    }
    reporters
        .into_iter()
        .map(|(year, set)| (year, set.len()))
        .collect()
}

/// Observation counts per (reporter, year), for the country-by-year matrix
/// sheet.
pub fn country_year_matrix(table: &UnifiedTable) -> BTreeMap<String, BTreeMap<i32, usize>> {
    let mut matrix: BTreeMap<String, BTreeMap<i32, usize>> = BTreeMap::new();
    for (key, _indicator, _cell) in table.iter() {
        *matrix
            .entry(key.reporter.clone())
            .or_default()
            .entry(key.year)
            .or_insert(0) += 1;
    }
    matrix
}
