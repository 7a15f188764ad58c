use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::time::sleep;
use tracing::warn;

use crate::config::RetryPolicy;
use crate::error::{PipelineError, Result};
use crate::model::{Record, SourceId};

pub mod gravity;
pub mod macro_data;
pub mod trade;

pub use gravity::GravityConnector;
pub use macro_data::MacroIndicatorConnector;
pub use trade::TradeFlowConnector;

/// Everything a connector hands back from one fetch: the records plus the
/// number of batches dropped because their payload could not be parsed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOutcome {
    pub records: Vec<Record>,
    pub skipped_batches: usize,
}

/// The generic, abstract interface for a data source. The pipeline only
/// depends on this trait, so synthetic connectors can stand in for the
/// live APIs in tests.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn source(&self) -> SourceId;

    /// Produces the finite record set for the configured scope. Not
    /// restartable mid-batch; a failed fetch is reissued from the start.
    async fn fetch(&self) -> Result<FetchOutcome>;
}

/// Splits a request universe into sequential sub-batches no larger than the
/// source's ceiling. Every item appears in exactly one batch.
pub fn split_batches<T: Clone>(items: &[T], ceiling: usize) -> Vec<Vec<T>> {
    let ceiling = ceiling.max(1);
    items.chunks(ceiling).map(<[T]>::to_vec).collect()
}

/// Runs `op`, retrying rate-limited attempts with exponential backoff until
/// the bounded retry budget is spent, at which point the rate limit
/// escalates to [`PipelineError::SourceUnavailable`]. All other outcomes
/// pass through untouched.
pub(crate) async fn with_backoff<T, F, Fut>(retry: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Err(PipelineError::RateLimited { source_id: source }) => {
                if attempt >= retry.max_retries {
                    return Err(PipelineError::SourceUnavailable {
                        source_id: source,
                        reason: format!(
                            "rate limit persisted after {} retries",
                            retry.max_retries
                        ),
                    });
                }
                let delay_ms = retry.base_delay_ms.saturating_mul(1 << attempt.min(16));
                warn!(%source, attempt, delay_ms, "rate limited, backing off");
                sleep(Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Maps an HTTP status to the connector failure taxonomy; `None` means the
/// response is usable.
pub(crate) fn classify_status(source: SourceId, status: StatusCode) -> Option<PipelineError> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        Some(PipelineError::RateLimited { source_id: source })
    } else if status.is_success() {
        None
    } else {
        Some(PipelineError::SourceUnavailable {
            source_id: source,
            reason: format!("HTTP {status}"),
        })
    }
}

/// Network and transport failures count as the source being unavailable.
pub(crate) fn transport_error(source: SourceId, error: reqwest::Error) -> PipelineError {
    PipelineError::SourceUnavailable {
        source_id: source,
        reason: error.to_string(),
    }
}
