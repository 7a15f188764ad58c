use std::path::PathBuf;

use thiserror::Error;

use crate::model::SourceId;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error type covering the different failure cases that can occur while the
/// pipeline fetches, normalises, merges, or reports data.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the CSV reader and writer.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when a source cannot be reached or rejects the credentials.
    /// Fatal for that source's contribution; the run continues without it.
    #[error("source '{source_id}' unavailable: {reason}")]
    SourceUnavailable { source_id: SourceId, reason: String },

    /// Raised when a source signals throttling. Connectors retry with
    /// backoff before escalating to [`PipelineError::SourceUnavailable`].
    #[error("source '{source_id}' rate limited the request")]
    RateLimited { source_id: SourceId },

    /// Raised when a payload cannot be parsed into records. The offending
    /// batch is skipped and counted, never silently dropped.
    #[error("malformed response from '{source_id}': {detail}")]
    MalformedResponse { source_id: SourceId, detail: String },

    /// Raised when the code map has no entry for a source-native code.
    #[error("no mapping entry for code '{raw_code}' from source '{source_id}'")]
    UnmappedCode { source_id: SourceId, raw_code: String },

    /// Raised when the mapping workbook does not follow the expected
    /// conventions.
    #[error("invalid mapping workbook: {0}")]
    InvalidMapping(String),

    /// Raised when the run configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Raised when a persisted unified table cannot be read back.
    #[error("invalid unified table row: {0}")]
    InvalidTableRow(String),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when every enabled source failed to contribute data.
    #[error("no source contributed any data")]
    NoUsableSource,

    /// Raised when `require_all_sources` is set and a source failed.
    #[error("required source '{source_id}' failed: {reason}")]
    RequiredSourceFailed { source_id: SourceId, reason: String },
}
