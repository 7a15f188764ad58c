use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::model::{Record, SourceId, UnmappedRecord};

/// Returns true when `code` has the shape of an ISO3 country code: exactly
/// three ASCII uppercase letters.
pub fn is_iso3(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|byte| byte.is_ascii_uppercase())
}

/// One row of the mapping table: a source-native code and its canonical
/// ISO3 counterpart.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeEntry {
    pub source: SourceId,
    pub raw_code: String,
    pub iso3: String,
}

/// Read-only lookup from (source, raw code) to canonical ISO3, loaded once
/// at startup. Also carries the indicator-description table used to label
/// indicator codes in the summary report.
#[derive(Debug, Clone, Default)]
pub struct CodeMap {
    forward: HashMap<SourceId, BTreeMap<String, String>>,
    reverse: HashMap<SourceId, BTreeMap<String, String>>,
    indicator_labels: BTreeMap<String, String>,
}

impl CodeMap {
    /// Builds a map from entries, rejecting entries that disagree on the
    /// canonical code for the same (source, raw) pair.
    pub fn new(
        entries: impl IntoIterator<Item = CodeEntry>,
        indicator_labels: BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut forward: HashMap<SourceId, BTreeMap<String, String>> = HashMap::new();
        let mut reverse: HashMap<SourceId, BTreeMap<String, String>> = HashMap::new();

        for entry in entries {
            if !is_iso3(&entry.iso3) {
                return Err(PipelineError::InvalidMapping(format!(
                    "'{}' is not an ISO3 code (source '{}', raw '{}')",
                    entry.iso3, entry.source, entry.raw_code
                )));
            }
            let by_raw = forward.entry(entry.source).or_default();
            if let Some(existing) = by_raw.get(&entry.raw_code) {
                if existing != &entry.iso3 {
                    return Err(PipelineError::InvalidMapping(format!(
                        "conflicting entries for raw code '{}' of source '{}': '{existing}' and '{}'",
                        entry.raw_code, entry.source, entry.iso3
                    )));
                }
                continue;
            }
            by_raw.insert(entry.raw_code.clone(), entry.iso3.clone());
            reverse
                .entry(entry.source)
                .or_default()
                .entry(entry.iso3)
                .or_insert(entry.raw_code);
        }

        Ok(Self {
            forward,
            reverse,
            indicator_labels,
        })
    }

    /// Resolves a source-native code to ISO3. Deterministic pure lookup.
    ///
    /// Gravity files already carry ISO3, so a shape-valid gravity code
    /// without a table entry passes through unchanged; every other source
    /// requires an explicit entry.
    pub fn resolve<'a>(&'a self, source: SourceId, raw_code: &'a str) -> Result<&'a str> {
        if let Some(iso3) = self
            .forward
            .get(&source)
            .and_then(|by_raw| by_raw.get(raw_code))
        {
            return Ok(iso3);
        }
        if source == SourceId::Gravity && is_iso3(raw_code) {
            return Ok(raw_code);
        }
        Err(PipelineError::UnmappedCode {
            source_id: source,
            raw_code: raw_code.to_string(),
        })
    }

    /// Reverse lookup: the source-native code a source uses for an ISO3
    /// country, when one is known. Used to address API requests.
    pub fn reverse(&self, source: SourceId, iso3: &str) -> Option<&str> {
        self.reverse
            .get(&source)
            .and_then(|by_iso3| by_iso3.get(iso3))
            .map(String::as_str)
    }

    /// All canonical ISO3 codes mentioned by the map, across sources.
    pub fn canonical_codes(&self) -> BTreeSet<String> {
        self.forward
            .values()
            .flat_map(|by_raw| by_raw.values().cloned())
            .collect()
    }

    pub fn indicator_label(&self, code: &str) -> Option<&str> {
        self.indicator_labels.get(code).map(String::as_str)
    }

    pub fn indicator_labels(&self) -> &BTreeMap<String, String> {
        &self.indicator_labels
    }

    /// Rewrites the entity and partner codes of each record to ISO3.
    /// Records with an unresolvable code land in the unmapped bucket; the
    /// run carries on without them.
    pub fn apply(&self, records: Vec<Record>) -> (Vec<Record>, Vec<UnmappedRecord>) {
        let mut mapped = Vec::with_capacity(records.len());
        let mut unmapped = Vec::new();

        for mut record in records {
            let entity = self
                .resolve(record.source, &record.entity_code)
                .map(str::to_string);
            let entity = match entity {
                Ok(iso3) => iso3,
                Err(_) => {
                    let raw_code = record.entity_code.clone();
                    unmapped.push(UnmappedRecord { record, raw_code });
                    continue;
                }
            };

            let partner = match record.partner_code.clone() {
                Some(raw) => match self.resolve(record.source, &raw).map(str::to_string) {
                    Ok(iso3) => Some(iso3),
                    Err(_) => {
                        unmapped.push(UnmappedRecord {
                            record,
                            raw_code: raw,
                        });
                        continue;
                    }
                },
                None => None,
            };
            record.entity_code = entity;
            record.partner_code = partner;
            mapped.push(record);
        }

        if !unmapped.is_empty() {
            warn!(
                count = unmapped.len(),
                "records set aside with unresolved codes"
            );
        }
        (mapped, unmapped)
    }
}
