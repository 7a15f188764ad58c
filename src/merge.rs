use tracing::{debug, info};

use crate::model::{Cell, Collision, MergeReport, Record, SourceId, UnifiedKey, UnifiedTable};

/// Joins the mapped record sets into one table keyed by
/// (reporter, partner, year, indicator).
///
/// When two sources supply a value for the same cell, the source listed
/// earlier in `priority` wins and the loser is recorded as a collision.
/// Duplicate values within a single source resolve last-write-wins without
/// a collision entry. The result is independent of input ordering for a
/// fixed priority list.
pub fn merge(inputs: Vec<Vec<Record>>, priority: &[SourceId]) -> (UnifiedTable, MergeReport) {
    let mut table = UnifiedTable::new();
    let mut report = MergeReport::default();

    for records in inputs {
        for record in records {
            let key = UnifiedKey {
                reporter: record.entity_code,
                partner: record.partner_code,
                year: record.year,
            };
            let incoming = Cell {
                value: record.value,
                unit: record.unit,
                source: record.source,
            };

            let existing = table.get(&key, &record.indicator).cloned();
            match existing {
                None => {
                    table.insert(key, record.indicator, incoming);
                }
                Some(existing) if existing.source == record.source => {
                    // Same source re-reporting a key: last write wins.
                    debug!(
                        source = %record.source,
                        reporter = %key.reporter,
                        year = key.year,
                        indicator = %record.indicator,
                        "duplicate key within one source, keeping the later value"
                    );
                    table.insert(key, record.indicator, incoming);
                }
                Some(existing) => {
                    if rank(priority, record.source) < rank(priority, existing.source) {
                        report.collisions.push(Collision {
                            key: key.clone(),
                            indicator: record.indicator.clone(),
                            kept_source: incoming.source,
                            kept_value: incoming.value,
                            dropped_source: existing.source,
                            dropped_value: existing.value,
                        });
                        table.insert(key, record.indicator, incoming);
                    } else {
                        report.collisions.push(Collision {
                            key,
                            indicator: record.indicator,
                            kept_source: existing.source,
                            kept_value: existing.value,
                            dropped_source: incoming.source,
                            dropped_value: incoming.value,
                        });
                    }
                }
            }
        }
    }

    info!(
        cells = table.len(),
        collisions = report.collisions.len(),
        "merge finished"
    );
    (table, report)
}

fn rank(priority: &[SourceId], source: SourceId) -> usize {
    priority
        .iter()
        .position(|candidate| *candidate == source)
        .unwrap_or(priority.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gdp_record(source: SourceId, value: f64) -> Record {
        Record {
            source,
            entity_code: "USA".to_string(),
            partner_code: None,
            year: 2020,
            indicator: "gdp".to_string(),
            value,
            unit: None,
        }
    }

    fn usa_2020() -> UnifiedKey {
        UnifiedKey {
            reporter: "USA".to_string(),
            partner: None,
            year: 2020,
        }
    }

    #[test]
    fn earlier_priority_source_wins_collisions() {
        let inputs = vec![
            vec![gdp_record(SourceId::Trade, 100.0)],
            vec![gdp_record(SourceId::Macro, 105.0)],
        ];
        let (table, report) = merge(inputs, &[SourceId::Trade, SourceId::Macro]);

        let cell = table.get(&usa_2020(), "gdp").expect("cell present");
        assert_eq!(cell.value, 100.0);
        assert_eq!(cell.source, SourceId::Trade);

        assert_eq!(report.collisions.len(), 1);
        let collision = &report.collisions[0];
        assert_eq!(collision.kept_source, SourceId::Trade);
        assert_eq!(collision.kept_value, 100.0);
        assert_eq!(collision.dropped_source, SourceId::Macro);
        assert_eq!(collision.dropped_value, 105.0);
    }

    #[test]
    fn flipping_priority_flips_the_winner() {
        let inputs = || {
            vec![
                vec![gdp_record(SourceId::Trade, 100.0)],
                vec![gdp_record(SourceId::Macro, 105.0)],
            ]
        };

        let (ab, _) = merge(inputs(), &[SourceId::Trade, SourceId::Macro]);
        let (ba, _) = merge(inputs(), &[SourceId::Macro, SourceId::Trade]);

        assert_eq!(ab.get(&usa_2020(), "gdp").unwrap().value, 100.0);
        assert_eq!(ba.get(&usa_2020(), "gdp").unwrap().value, 105.0);
    }

    #[test]
    fn resolution_does_not_depend_on_input_order() {
        let priority = [SourceId::Trade, SourceId::Macro];
        let forward = vec![
            vec![gdp_record(SourceId::Trade, 100.0)],
            vec![gdp_record(SourceId::Macro, 105.0)],
        ];
        let reversed = vec![
            vec![gdp_record(SourceId::Macro, 105.0)],
            vec![gdp_record(SourceId::Trade, 100.0)],
        ];

        let (a, _) = merge(forward, &priority);
        let (b, _) = merge(reversed, &priority);
        assert_eq!(a, b);
    }

    #[test]
    fn same_source_duplicates_resolve_last_write_wins() {
        let inputs = vec![vec![
            gdp_record(SourceId::Macro, 1.0),
            gdp_record(SourceId::Macro, 2.0),
        ]];
        let (table, report) = merge(inputs, &[SourceId::Macro]);

        assert_eq!(table.get(&usa_2020(), "gdp").unwrap().value, 2.0);
        assert!(report.collisions.is_empty());
    }

    #[test]
    fn distinct_keys_do_not_collide() {
        let mut other = gdp_record(SourceId::Macro, 9.0);
        other.year = 2021;
        let inputs = vec![vec![gdp_record(SourceId::Trade, 1.0)], vec![other]];

        let (table, report) = merge(inputs, &[SourceId::Trade, SourceId::Macro]);
        assert_eq!(table.len(), 2);
        assert!(report.collisions.is_empty());
    }
}
