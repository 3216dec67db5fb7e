//! Bronze layer: append-only raw snapshots plus a `_meta.json` sidecar.
//!
//! A snapshot is never rewritten. Re-fetches and backfills simply add new
//! snapshots with a later `ingest_ts`; the silver merge sorts them out.

use super::keys::{self, LayerKeys};
use super::provider::{ObservationProvider, RawResponse, LINEAGE_HEADERS};
use super::store::ObjectStore;
use super::DataError;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};

/// Days re-fetched by a daily incremental ingest.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 10;

/// `_meta.json` sidecar of a bronze snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BronzeMeta {
    pub source: String,
    pub series_id: String,
    pub format: String,
    pub request_url: String,
    pub http_status: u16,
    /// RFC 3339 UTC, microsecond precision.
    pub retrieved_at_utc: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub sha256_raw: String,
    pub raw_bytes: u64,
    pub gz_bytes: u64,
    pub response_headers_subset: BTreeMap<String, Option<String>>,
    #[serde(default)]
    pub response_keys: Option<Vec<String>>,
    #[serde(default)]
    pub observation_count: usize,
    #[serde(default)]
    pub retries: u32,
}

impl BronzeMeta {
    pub fn retrieved_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.retrieved_at_utc)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Keys of one written snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BronzeSnapshot {
    pub series_id: String,
    pub payload_key: String,
    pub meta_key: String,
    pub ingest_ts: String,
    pub observation_count: usize,
}

/// A payload key found by listing, with its parsed `ingest_ts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub payload_key: String,
    pub ingest_ts: String,
}

/// One parsed upstream observation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObservation {
    pub obs_date: NaiveDate,
    pub value: f64,
}

// ── Payload codec ───────────────────────────────────────────────────

pub fn gzip(bytes: &[u8]) -> Result<Vec<u8>, DataError> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes)
        .map_err(|e| DataError::Serialization(format!("gzip: {e}")))?;
    enc.finish()
        .map_err(|e| DataError::Serialization(format!("gzip: {e}")))
}

pub fn gunzip(bytes: &[u8]) -> Result<Vec<u8>, DataError> {
    let mut out = Vec::new();
    GzDecoder::new(bytes)
        .read_to_end(&mut out)
        .map_err(|e| DataError::Serialization(format!("gunzip: {e}")))?;
    Ok(out)
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Top-level keys of a JSON object body, `None` for anything else.
fn response_keys(body: &[u8]) -> Option<Vec<String>> {
    match serde_json::from_slice::<serde_json::Value>(body).ok()? {
        serde_json::Value::Object(map) => Some(map.keys().cloned().collect()),
        _ => None,
    }
}

/// Parse a Valet `observations` payload.
///
/// Each entry looks like `{"d": "2024-01-02", "FXUSDCAD": {"v": "1.3316"}}`;
/// a bare string or number in place of the `{"v": ..}` object is accepted.
/// Entries missing a date or a value are skipped.
pub fn parse_valet_observations(
    body: &[u8],
    series_id: &str,
    key: &str,
) -> Result<Vec<RawObservation>, DataError> {
    let malformed = |reason: String| DataError::Malformed {
        key: key.to_string(),
        reason,
    };

    let doc: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| malformed(format!("invalid JSON: {e}")))?;
    let observations = match doc.get("observations") {
        Some(serde_json::Value::Array(items)) => items,
        Some(_) => return Err(malformed("'observations' is not an array".into())),
        None => return Ok(Vec::new()),
    };

    let mut out = Vec::with_capacity(observations.len());
    for item in observations {
        let Some(date_str) = item.get("d").and_then(|d| d.as_str()) else {
            continue;
        };
        let raw = match item.get(series_id) {
            Some(serde_json::Value::Object(inner)) => inner.get("v").cloned(),
            Some(other) => Some(other.clone()),
            None => None,
        };
        let value = match raw {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s
                .trim()
                .parse::<f64>()
                .map_err(|e| malformed(format!("value '{s}' on {date_str}: {e}")))?,
            Some(serde_json::Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| malformed(format!("value {n} on {date_str}")))?,
            _ => continue,
        };
        let obs_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .map_err(|e| malformed(format!("date '{date_str}': {e}")))?;
        out.push(RawObservation { obs_date, value });
    }
    Ok(out)
}

/// Entries with a date and a numeric value, for the sidecar.
///
/// Never fails: unparseable values and non-JSON bodies are simply not
/// counted. Rejecting them is the silver merge's job.
pub fn count_valet_observations(body: &[u8], series_id: &str) -> usize {
    let Ok(doc) = serde_json::from_slice::<serde_json::Value>(body) else {
        return 0;
    };
    let Some(items) = doc.get("observations").and_then(|o| o.as_array()) else {
        return 0;
    };
    items
        .iter()
        .filter(|item| item.get("d").and_then(|d| d.as_str()).is_some())
        .filter(|item| {
            let raw = match item.get(series_id) {
                Some(serde_json::Value::Object(inner)) => inner.get("v"),
                other => other,
            };
            match raw {
                Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().is_ok(),
                Some(serde_json::Value::Number(_)) => true,
                _ => false,
            }
        })
        .count()
}

// ── Writer / reader ─────────────────────────────────────────────────

/// Write one snapshot: gzip payload first, then the sidecar.
///
/// The payload is stored as received; bad values inside it are counted out
/// of `observation_count` but never block the write.
#[allow(clippy::too_many_arguments)]
pub fn write_snapshot(
    store: &dyn ObjectStore,
    keys: &LayerKeys,
    format: &str,
    response: &RawResponse,
    start: NaiveDate,
    end: NaiveDate,
    retrieved_at: DateTime<Utc>,
    backfill: bool,
) -> Result<BronzeSnapshot, DataError> {
    let ingest_ts = keys::format_ingest_ts(retrieved_at, backfill);
    let ingest_date = retrieved_at.date_naive();
    let payload_key = keys.bronze_payload(ingest_date, &ingest_ts, format);
    let meta_key = keys.bronze_meta(ingest_date, &ingest_ts);

    let gz = gzip(&response.body)?;
    store.put(&payload_key, &gz)?;

    let observation_count = if format == "json" {
        count_valet_observations(&response.body, keys.series_id())
    } else {
        0
    };
    let meta = BronzeMeta {
        source: keys.source().to_string(),
        series_id: keys.series_id().to_string(),
        format: format.to_string(),
        request_url: response.request_url.clone(),
        http_status: response.http_status,
        retrieved_at_utc: retrieved_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        start_date: start,
        end_date: end,
        sha256_raw: sha256_hex(&response.body),
        raw_bytes: response.body.len() as u64,
        gz_bytes: gz.len() as u64,
        response_headers_subset: LINEAGE_HEADERS
            .iter()
            .map(|h| (h.to_string(), response.headers.get(*h).cloned()))
            .collect(),
        response_keys: if format == "json" {
            response_keys(&response.body)
        } else {
            None
        },
        observation_count,
        retries: response.retries,
    };
    let meta_json = serde_json::to_vec_pretty(&meta)
        .map_err(|e| DataError::Serialization(format!("bronze meta: {e}")))?;

    store.put(&meta_key, &meta_json)?;

    tracing::info!(
        series_id = keys.series_id(),
        key = %payload_key,
        observations = observation_count,
        raw_bytes = meta.raw_bytes,
        "bronze snapshot written"
    );

    Ok(BronzeSnapshot {
        series_id: keys.series_id().to_string(),
        payload_key,
        meta_key,
        ingest_ts,
        observation_count,
    })
}

/// Every payload under the series prefix, ascending by `ingest_ts`.
pub fn list_snapshots(
    store: &dyn ObjectStore,
    keys: &LayerKeys,
) -> Result<Vec<SnapshotRef>, DataError> {
    let mut refs: Vec<SnapshotRef> = store
        .list(&keys.bronze_prefix())?
        .into_iter()
        .filter(|k| keys::is_bronze_payload(k))
        .filter_map(|k| {
            let ts = keys::parse_ingest_ts(&k)?.to_string();
            Some(SnapshotRef {
                payload_key: k,
                ingest_ts: ts,
            })
        })
        .collect();
    refs.sort_by(|a, b| {
        a.ingest_ts
            .cmp(&b.ingest_ts)
            .then_with(|| a.payload_key.cmp(&b.payload_key))
    });
    Ok(refs)
}

pub fn read_observations(
    store: &dyn ObjectStore,
    payload_key: &str,
    series_id: &str,
) -> Result<Vec<RawObservation>, DataError> {
    let gz = store.get(payload_key)?;
    let body = gunzip(&gz)?;
    parse_valet_observations(&body, series_id, payload_key)
}

pub fn read_meta(store: &dyn ObjectStore, payload_key: &str) -> Result<BronzeMeta, DataError> {
    let meta_key = keys::meta_key_for(payload_key);
    let bytes = store.get(&meta_key)?;
    serde_json::from_slice(&bytes).map_err(|e| DataError::Malformed {
        key: meta_key,
        reason: e.to_string(),
    })
}

// ── Ingest driver ───────────────────────────────────────────────────

/// Requested date window for an ingest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestWindow {
    /// The trailing `lookback_days` up to the run date.
    Incremental { lookback_days: i64 },
    /// Explicit history load; snapshots carry the `_backfill` suffix.
    Backfill {
        start: NaiveDate,
        end: Option<NaiveDate>,
    },
}

impl IngestWindow {
    pub fn resolve(&self, today: NaiveDate) -> (NaiveDate, NaiveDate, bool) {
        match *self {
            IngestWindow::Incremental { lookback_days } => {
                (today - chrono::Duration::days(lookback_days), today, false)
            }
            IngestWindow::Backfill { start, end } => (start, end.unwrap_or(today), true),
        }
    }
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub snapshots: Vec<BronzeSnapshot>,
    pub errors: Vec<(String, String)>,
}

impl IngestReport {
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Fetch and store a snapshot for each series. A failure on one series is
/// recorded and the rest continue.
pub fn ingest_series(
    provider: &dyn ObservationProvider,
    store: &dyn ObjectStore,
    series_ids: &[String],
    window: IngestWindow,
    now: DateTime<Utc>,
) -> IngestReport {
    let (start, end, backfill) = window.resolve(now.date_naive());
    tracing::info!(%start, %end, backfill, series = series_ids.len(), "bronze ingest");

    let mut report = IngestReport::default();
    for series_id in series_ids {
        let keys = LayerKeys::new(provider.source(), series_id.as_str());
        let result = provider
            .fetch(series_id, start, end)
            .map_err(|e| e.to_string())
            .and_then(|resp| {
                write_snapshot(store, &keys, provider.format(), &resp, start, end, now, backfill)
                    .map_err(|e| e.to_string())
            });
        match result {
            Ok(snapshot) => report.snapshots.push(snapshot),
            Err(e) => {
                tracing::warn!(%series_id, error = %e, "bronze ingest failed");
                report.errors.push((series_id.clone(), e));
            }
        }
    }
    report
}
