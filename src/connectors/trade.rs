use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::TradeSourceConfig;
use crate::connectors::{
    FetchOutcome, SourceConnector, classify_status, split_batches, transport_error, with_backoff,
};
use crate::error::{PipelineError, Result};
use crate::model::{Record, SourceId};

/// Client for the bilateral trade-flow API. One request is issued per
/// (year, reporter sub-batch); reporters are addressed by the numeric codes
/// the source understands, obtained by reverse-applying the code map.
pub struct TradeFlowConnector {
    client: reqwest::Client,
    config: TradeSourceConfig,
    years: Vec<i32>,
    reporters: Vec<String>,
    /// Source-native partner codes to keep; `None` keeps every partner.
    partner_filter: Option<BTreeSet<String>>,
}

impl TradeFlowConnector {
    pub fn new(
        config: TradeSourceConfig,
        years: Vec<i32>,
        reporters: Vec<String>,
        partner_filter: Option<BTreeSet<String>>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            years,
            reporters,
            partner_filter,
        }
    }

    async fn request_batch(&self, year: i32, reporters: &[String]) -> Result<String> {
        let url = format!("{}/v1/get", self.config.base_url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .header("Ocp-Apim-Subscription-Key", &self.config.api_key)
            .query(&[
                ("reporterCode", reporters.join(",")),
                ("period", year.to_string()),
                ("flowCode", self.config.flow.clone()),
                ("cmdCode", "TOTAL".to_string()),
            ])
            .send()
            .await
            .map_err(|error| transport_error(SourceId::Trade, error))?;

        if let Some(error) = classify_status(SourceId::Trade, response.status()) {
            return Err(error);
        }
        response
            .text()
            .await
            .map_err(|error| transport_error(SourceId::Trade, error))
    }
}

#[async_trait]
impl SourceConnector for TradeFlowConnector {
    fn source(&self) -> SourceId {
        SourceId::Trade
    }

    async fn fetch(&self) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome::default();
        let batches = split_batches(&self.reporters, self.config.batch_ceiling);

        for &year in &self.years {
            for batch in &batches {
                let body =
                    with_backoff(&self.config.retry, || self.request_batch(year, batch)).await?;
                match parse_trade_payload(&body, &self.config.flow) {
                    Ok(mut records) => {
                        if let Some(filter) = &self.partner_filter {
                            records.retain(|record| {
                                record
                                    .partner_code
                                    .as_ref()
                                    .is_none_or(|partner| filter.contains(partner))
                            });
                        }
                        debug!(year, records = records.len(), "trade batch fetched");
                        outcome.records.append(&mut records);
                    }
                    Err(error) => {
                        warn!(%error, year, "skipping malformed trade batch");
                        outcome.skipped_batches += 1;
                    }
                }
            }
        }

        info!(
            records = outcome.records.len(),
            skipped_batches = outcome.skipped_batches,
            "trade-flow fetch finished"
        );
        Ok(outcome)
    }
}

/// Parses one response payload into raw records. The payload carries the
/// observations under a `data` array; a missing array or a row without its
/// key fields marks the whole batch malformed.
pub fn parse_trade_payload(body: &str, flow: &str) -> Result<Vec<Record>> {
    let payload: Value = serde_json::from_str(body).map_err(|error| malformed(error.to_string()))?;
    let data = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| malformed("missing 'data' array".to_string()))?;

    let indicator = format!("trade_value_{}", flow.to_ascii_lowercase());
    let mut records = Vec::with_capacity(data.len());

    for item in data {
        let reporter = code_field(item, "reporterCode")?;
        let partner = code_field(item, "partnerCode")?;
        let year = year_field(item, "period")?;

        // A null primary value is a missing observation, not an error.
        let Some(value) = item.get("primaryValue").and_then(Value::as_f64) else {
            continue;
        };

        records.push(Record {
            source: SourceId::Trade,
            entity_code: reporter,
            partner_code: Some(partner),
            year,
            indicator: indicator.clone(),
            value,
            unit: Some("USD".to_string()),
        });
    }

    Ok(records)
}

fn malformed(detail: String) -> PipelineError {
    PipelineError::MalformedResponse {
        source_id: SourceId::Trade,
        detail,
    }
}

/// The source encodes country codes either as numbers or as digit strings;
/// both normalise to the zero-padded three-digit form used by the code map.
fn code_field(item: &Value, field: &str) -> Result<String> {
    let value = item
        .get(field)
        .ok_or_else(|| malformed(format!("row missing '{field}'")))?;
    match value {
        Value::Number(number) => {
            let code = number
                .as_i64()
                .ok_or_else(|| malformed(format!("non-integer '{field}'")))?;
            Ok(format!("{code:03}"))
        }
        Value::String(code) if !code.trim().is_empty() => Ok(format!("{:0>3}", code.trim())),
        _ => Err(malformed(format!("invalid '{field}'"))),
    }
}

fn year_field(item: &Value, field: &str) -> Result<i32> {
    let value = item
        .get(field)
        .ok_or_else(|| malformed(format!("row missing '{field}'")))?;
    match value {
        Value::Number(number) => number
            .as_i64()
            .map(|year| year as i32)
            .ok_or_else(|| malformed(format!("non-integer '{field}'"))),
        Value::String(raw) => raw
            .trim()
            .parse::<i32>()
            .map_err(|_| malformed(format!("invalid '{field}' value '{raw}'"))),
        _ => Err(malformed(format!("invalid '{field}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_rows_become_records() {
        let body = serde_json::json!({
            "data": [
                {"reporterCode": 842, "partnerCode": 764, "period": 2015, "primaryValue": 1200.5},
                {"reporterCode": "036", "partnerCode": "156", "period": "2015", "primaryValue": 88.0}
            ]
        })
        .to_string();

        let records = parse_trade_payload(&body, "M").expect("payload parses");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].entity_code, "842");
        assert_eq!(records[0].partner_code.as_deref(), Some("764"));
        assert_eq!(records[0].indicator, "trade_value_m");
        assert_eq!(records[1].entity_code, "036");
        assert_eq!(records[1].year, 2015);
    }

    #[test]
    fn numeric_codes_are_zero_padded() {
        let body = serde_json::json!({
            "data": [{"reporterCode": 4, "partnerCode": 36, "period": 2015, "primaryValue": 1.0}]
        })
        .to_string();

        let records = parse_trade_payload(&body, "M").expect("payload parses");
        assert_eq!(records[0].entity_code, "004");
        assert_eq!(records[0].partner_code.as_deref(), Some("036"));
    }

    #[test]
    fn null_values_are_missing_observations() {
        let body = serde_json::json!({
            "data": [
                {"reporterCode": 842, "partnerCode": 764, "period": 2015, "primaryValue": null},
                {"reporterCode": 842, "partnerCode": 156, "period": 2015, "primaryValue": 3.0}
            ]
        })
        .to_string();

        let records = parse_trade_payload(&body, "M").expect("payload parses");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].partner_code.as_deref(), Some("156"));
    }

    #[test]
    fn missing_data_array_is_malformed() {
        let error = parse_trade_payload("{\"ok\": true}", "M").unwrap_err();
        assert!(matches!(
            error,
            PipelineError::MalformedResponse {
                source_id: SourceId::Trade,
                ..
            }
        ));
    }

    #[test]
    fn row_without_reporter_is_malformed() {
        let body = serde_json::json!({
            "data": [{"partnerCode": 764, "period": 2015, "primaryValue": 1.0}]
        })
        .to_string();
        assert!(parse_trade_payload(&body, "M").is_err());
    }
}
