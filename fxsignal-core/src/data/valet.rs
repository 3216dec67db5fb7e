//! Bank of Canada Valet observations provider.
//!
//! `GET https://www.bankofcanada.ca/valet/observations/{series}/{fmt}?start_date=..&end_date=..`
//! with a 30 s timeout. Retryable failures (429/5xx gateway statuses,
//! connect errors, timeouts) are retried with exponential backoff; any other
//! HTTP error is returned immediately.

use super::provider::{
    is_retryable_status, FetchError, ObservationProvider, RawResponse, LINEAGE_HEADERS,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::time::Duration;

pub const VALET_BASE_URL: &str = "https://www.bankofcanada.ca/valet/observations";

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first call included.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles for each later one.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts, waiting 2 s and then 4 s between them.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.pow(retry.saturating_sub(1))
    }
}

/// Run `op` until it succeeds, fails non-retryably, or attempts run out.
///
/// `op` receives the zero-based attempt number. Returns the value and the
/// number of retries used.
pub fn retry_with_backoff<T, F>(
    policy: &RetryPolicy,
    sleep: &dyn Fn(Duration),
    mut op: F,
) -> Result<(T, u32), FetchError>
where
    F: FnMut(u32) -> Result<T, FetchError>,
{
    let mut last_error: Option<FetchError> = None;
    let attempts = policy.max_attempts.max(1);
    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = policy.delay_for(attempt);
            if let Some(err) = &last_error {
                tracing::warn!(attempt, delay_secs = delay.as_secs_f64(), error = %err, "retrying fetch");
            }
            sleep(delay);
        }
        match op(attempt) {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if e.is_retryable() => last_error = Some(e),
            Err(e) => return Err(e),
        }
    }
    Err(FetchError::RetriesExhausted {
        attempts,
        last: last_error.map_or_else(|| "unknown".to_string(), |e| e.to_string()),
    })
}

pub struct ValetProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    format: String,
    policy: RetryPolicy,
}

impl ValetProvider {
    pub fn new(policy: RetryPolicy) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("fxsignal/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Setup(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: VALET_BASE_URL.to_string(),
            format: "json".to_string(),
            policy,
        })
    }

    /// Point at a different host (mirrors, local fixtures).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn observations_url(&self, series_id: &str, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}/{series_id}/{}?start_date={}&end_date={}",
            self.base_url,
            self.format,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        )
    }

    fn fetch_once(&self, url: &str) -> Result<RawResponse, FetchError> {
        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                FetchError::Transient {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            } else {
                FetchError::Request {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(FetchError::Http {
                url: url.to_string(),
                status,
            });
        }

        let mut headers = BTreeMap::new();
        for name in LINEAGE_HEADERS {
            if let Some(v) = resp.headers().get(name).and_then(|v| v.to_str().ok()) {
                headers.insert(name.to_string(), v.to_string());
            }
        }

        let body = resp.bytes().map_err(|e| {
            if e.is_timeout() {
                FetchError::Transient {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            } else {
                FetchError::Request {
                    url: url.to_string(),
                    reason: format!("reading body: {e}"),
                }
            }
        })?;

        Ok(RawResponse {
            request_url: url.to_string(),
            http_status: status,
            headers,
            body: body.to_vec(),
            retries: 0,
        })
    }
}

impl ObservationProvider for ValetProvider {
    fn source(&self) -> &str {
        super::keys::DEFAULT_SOURCE
    }

    fn format(&self) -> &str {
        &self.format
    }

    fn fetch(
        &self,
        series_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawResponse, FetchError> {
        let url = self.observations_url(series_id, start, end);
        tracing::debug!(%url, "fetching observations");
        let (mut resp, retries) =
            retry_with_backoff(&self.policy, &std::thread::sleep, |_| self.fetch_once(&url))?;
        resp.retries = retries;
        debug_assert!(!is_retryable_status(resp.http_status));
        Ok(resp)
    }
}
