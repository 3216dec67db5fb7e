//! Upstream rate provider trait and fetch error taxonomy.
//!
//! Providers return the raw response body untouched; parsing happens in the
//! bronze layer so that the stored snapshot is exactly what was received.

use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;

/// Raw response from a provider, stored verbatim in bronze.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub request_url: String,
    pub http_status: u16,
    /// Only the headers worth keeping for lineage.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// Attempts beyond the first that were needed.
    pub retries: u32,
}

/// Header names copied into bronze metadata.
pub const LINEAGE_HEADERS: [&str; 3] = ["Content-Type", "Last-Modified", "Date"];

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch failure for {url}: {reason}")]
    Transient { url: String, reason: String },

    #[error("HTTP {status} for {url}")]
    Http { url: String, status: u16 },

    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("fetch failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("provider setup failed: {0}")]
    Setup(String),
}

impl FetchError {
    /// Whether the same request may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transient { .. } => true,
            FetchError::Http { status, .. } => is_retryable_status(*status),
            FetchError::Request { .. }
            | FetchError::RetriesExhausted { .. }
            | FetchError::Setup(_) => false,
        }
    }
}

/// 429 and the usual gateway/server hiccups.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Source of daily observations.
pub trait ObservationProvider: Send + Sync {
    /// Source tag used in object keys, e.g. `BoC`.
    fn source(&self) -> &str;

    /// Payload format requested, e.g. `json`.
    fn format(&self) -> &str;

    /// Fetch raw observations for a series over an inclusive date range.
    fn fetch(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawResponse, FetchError>;
}
