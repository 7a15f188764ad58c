use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::model::SourceId;

/// Root configuration for one run. Loaded once from a JSON file and passed
/// explicitly into every stage; nothing in the pipeline reads global state.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub years: YearRange,
    /// Reporter scope: explicit ISO3 codes, or the single entry "all".
    pub reporters: Vec<String>,
    /// Partner scope for bilateral sources, same convention as `reporters`.
    #[serde(default = "scope_all")]
    pub partners: Vec<String>,
    /// Macro indicator codes to request.
    #[serde(default)]
    pub indicators: Vec<String>,
    pub output_dir: PathBuf,
    /// Mapping workbook consumed at startup (see `io::excel_read`).
    pub mapping_path: PathBuf,
    pub trade: TradeSourceConfig,
    #[serde(rename = "macro")]
    pub macro_data: MacroSourceConfig,
    pub gravity: GravitySourceConfig,
    /// Collision resolution order; earlier sources win.
    pub priority: Vec<SourceId>,
    /// Expected-country reference list for coverage. When absent, the set
    /// of canonical codes in the mapping workbook is used.
    #[serde(default)]
    pub expected_countries: Option<Vec<String>>,
    /// When set, a single failed source aborts the run instead of being
    /// reported and skipped.
    #[serde(default)]
    pub require_all_sources: bool,
}

fn scope_all() -> Vec<String> {
    vec!["all".to_string()]
}

/// Inclusive year range.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn iter(self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }
}

/// Resolved country scope after validating the raw configuration list.
#[derive(Debug, Clone, PartialEq)]
pub enum CountryScope {
    All,
    Explicit(Vec<String>),
}

impl CountryScope {
    /// Parses the `["all"]`-or-ISO3-list convention used by the config file
    /// and the CLI.
    pub fn parse(raw: &[String]) -> Result<Self> {
        if raw.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "country scope must not be empty".to_string(),
            ));
        }
        if raw.len() == 1 && raw[0].eq_ignore_ascii_case("all") {
            return Ok(CountryScope::All);
        }
        let mut codes = Vec::with_capacity(raw.len());
        for code in raw {
            let code = code.trim().to_ascii_uppercase();
            if !crate::mapper::is_iso3(&code) {
                return Err(PipelineError::InvalidConfig(format!(
                    "'{code}' is not an ISO3 country code"
                )));
            }
            codes.push(code);
        }
        codes.sort();
        codes.dedup();
        Ok(CountryScope::Explicit(codes))
    }

    /// Materialises the scope against a reference universe of ISO3 codes.
    pub fn resolve(&self, universe: &BTreeSet<String>) -> Vec<String> {
        match self {
            CountryScope::All => universe.iter().cloned().collect(),
            CountryScope::Explicit(codes) => codes.clone(),
        }
    }
}

/// Per-request retry behaviour for throttled sources.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_batch_ceiling() -> usize {
    100
}

/// Settings for the trade-flow API connector.
#[derive(Debug, Clone, Deserialize)]
pub struct TradeSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    pub base_url: String,
    /// Subscription key sent as a request header.
    pub api_key: String,
    /// Flow code requested from the source, e.g. "M" for imports.
    #[serde(default = "default_flow")]
    pub flow: String,
    /// Maximum reporters per request enforced by the source.
    #[serde(default = "default_batch_ceiling")]
    pub batch_ceiling: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_flow() -> String {
    "M".to_string()
}

/// Settings for the macroeconomic-indicator API connector.
#[derive(Debug, Clone, Deserialize)]
pub struct MacroSourceConfig {
    #[serde(default)]
    pub enabled: bool,
    pub base_url: String,
    /// Maximum countries per request enforced by the source.
    #[serde(default = "default_batch_ceiling")]
    pub batch_ceiling: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_page_size() -> usize {
    1000
}

/// Settings for the static gravity dataset.
#[derive(Debug, Clone, Deserialize)]
pub struct GravitySourceConfig {
    #[serde(default)]
    pub enabled: bool,
    pub path: PathBuf,
    /// Variable columns to keep, or the single entry "all".
    #[serde(default = "scope_all")]
    pub variables: Vec<String>,
}

impl RunConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::MissingInput(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.years.start > self.years.end {
            return Err(PipelineError::InvalidConfig(format!(
                "year range {}..={} is inverted",
                self.years.start, self.years.end
            )));
        }
        CountryScope::parse(&self.reporters)?;
        CountryScope::parse(&self.partners)?;
        if self.priority.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "priority order must name at least one source".to_string(),
            ));
        }
        let priority: BTreeSet<SourceId> = self.priority.iter().copied().collect();
        if priority.len() != self.priority.len() {
            return Err(PipelineError::InvalidConfig(
                "priority order contains duplicate sources".to_string(),
            ));
        }
        for source in self.enabled_sources() {
            if !priority.contains(&source) {
                return Err(PipelineError::InvalidConfig(format!(
                    "enabled source '{source}' is missing from the priority order"
                )));
            }
        }
        if self.macro_data.enabled && self.indicators.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "macro source is enabled but no indicators are configured".to_string(),
            ));
        }
        if let Some(expected) = &self.expected_countries {
            for code in expected {
                if !crate::mapper::is_iso3(code) {
                    return Err(PipelineError::InvalidConfig(format!(
                        "expected country '{code}' is not an ISO3 code"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn enabled_sources(&self) -> Vec<SourceId> {
        let mut sources = Vec::new();
        if self.trade.enabled {
            sources.push(SourceId::Trade);
        }
        if self.macro_data.enabled {
            sources.push(SourceId::Macro);
        }
        if self.gravity.enabled {
            sources.push(SourceId::Gravity);
        }
        sources
    }

    pub fn reporter_scope(&self) -> Result<CountryScope> {
        CountryScope::parse(&self.reporters)
    }

    pub fn partner_scope(&self) -> Result<CountryScope> {
        CountryScope::parse(&self.partners)
    }
}
