use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{MacroSourceConfig, YearRange};
use crate::connectors::{
    FetchOutcome, SourceConnector, classify_status, split_batches, transport_error, with_backoff,
};
use crate::error::{PipelineError, Result};
use crate::model::{Record, SourceId};

/// Client for the macroeconomic-indicator API. One paginated request
/// stream is issued per (indicator, country sub-batch); pages are followed
/// sequentially until the advertised page count is reached.
pub struct MacroIndicatorConnector {
    client: reqwest::Client,
    config: MacroSourceConfig,
    years: YearRange,
    countries: Vec<String>,
    indicators: Vec<String>,
}

impl MacroIndicatorConnector {
    pub fn new(
        config: MacroSourceConfig,
        years: YearRange,
        countries: Vec<String>,
        indicators: Vec<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            years,
            countries,
            indicators,
        }
    }

    async fn request_page(
        &self,
        indicator: &str,
        countries: &[String],
        page: usize,
    ) -> Result<String> {
        let url = format!(
            "{}/v2/country/{}/indicator/{indicator}",
            self.config.base_url.trim_end_matches('/'),
            countries.join(";")
        );
        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "json".to_string()),
                ("date", format!("{}:{}", self.years.start, self.years.end)),
                ("per_page", self.config.page_size.to_string()),
                ("page", page.to_string()),
            ])
            .send()
            .await
            .map_err(|error| transport_error(SourceId::Macro, error))?;

        if let Some(error) = classify_status(SourceId::Macro, response.status()) {
            return Err(error);
        }
        response
            .text()
            .await
            .map_err(|error| transport_error(SourceId::Macro, error))
    }
}

#[async_trait]
impl SourceConnector for MacroIndicatorConnector {
    fn source(&self) -> SourceId {
        SourceId::Macro
    }

    async fn fetch(&self) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome::default();
        let batches = split_batches(&self.countries, self.config.batch_ceiling);

        for indicator in &self.indicators {
            for batch in &batches {
                let mut page = 1;
                loop {
                    let body = with_backoff(&self.config.retry, || {
                        self.request_page(indicator, batch, page)
                    })
                    .await?;

                    match parse_macro_page(&body, indicator) {
                        Ok((mut records, pages)) => {
                            debug!(
                                indicator,
                                page,
                                pages,
                                records = records.len(),
                                "macro page fetched"
                            );
                            outcome.records.append(&mut records);
                            if page >= pages {
                                break;
                            }
                            page += 1;
                        }
                        Err(error) => {
                            // Abandon the rest of this batch; later pages of
                            // a broken stream cannot be trusted.
                            warn!(%error, indicator, page, "skipping malformed macro batch");
                            outcome.skipped_batches += 1;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            records = outcome.records.len(),
            skipped_batches = outcome.skipped_batches,
            "macro-indicator fetch finished"
        );
        Ok(outcome)
    }
}

/// Parses one page of the two-element payload `[meta, rows]`, returning the
/// records plus the total page count advertised in the metadata.
pub fn parse_macro_page(body: &str, requested_indicator: &str) -> Result<(Vec<Record>, usize)> {
    let payload: Value = serde_json::from_str(body).map_err(|error| malformed(error.to_string()))?;
    let elements = payload
        .as_array()
        .ok_or_else(|| malformed("expected a two-element array payload".to_string()))?;

    let meta = elements
        .first()
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("missing metadata element".to_string()))?;
    let pages = meta
        .get("pages")
        .and_then(Value::as_u64)
        .unwrap_or(1)
        .max(1) as usize;

    // An empty result set comes back as a null or absent rows element.
    let rows = match elements.get(1) {
        Some(Value::Array(rows)) => rows.as_slice(),
        Some(Value::Null) | None => &[],
        Some(_) => return Err(malformed("rows element is not an array".to_string())),
    };

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let country = row
            .get("countryiso3code")
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("row missing 'countryiso3code'".to_string()))?;
        let year = row
            .get("date")
            .and_then(Value::as_str)
            .and_then(|date| date.trim().parse::<i32>().ok())
            .ok_or_else(|| malformed("row missing a numeric 'date'".to_string()))?;

        // Null values are gaps in the source's coverage, not failures.
        let Some(value) = row.get("value").and_then(Value::as_f64) else {
            continue;
        };

        let indicator = row
            .get("indicator")
            .and_then(|indicator| indicator.get("id"))
            .and_then(Value::as_str)
            .unwrap_or(requested_indicator);
        let unit = row
            .get("unit")
            .and_then(Value::as_str)
            .filter(|unit| !unit.is_empty())
            .map(str::to_string);

        records.push(Record {
            source: SourceId::Macro,
            entity_code: country.trim().to_string(),
            partner_code: None,
            year,
            indicator: indicator.to_string(),
            value,
            unit,
        });
    }

    Ok((records, pages))
}

fn malformed(detail: String) -> PipelineError {
    PipelineError::MalformedResponse {
        source_id: SourceId::Macro,
        detail,
    }
}
