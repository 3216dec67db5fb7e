//! Silver layer: one deduplicated row per (series_id, obs_date), partitioned
//! by observation date.
//!
//! The survivor for a given date is the row with the latest `ingested_at`.
//! On a tie the row already in silver is kept, so reprocessing the same
//! bronze snapshots rewrites every partition byte for byte.
//!
//! A full refresh ignores existing silver entirely: partitions are rebuilt
//! from bronze alone and any partition bronze no longer backs is removed.

use super::bronze::{self, SnapshotRef};
use super::keys::{self, LayerKeys, PARTITION_FILE};
use super::outcome::{MergeMode, MergeOutcome, MergeStatus};
use super::parquet::{
    date_column, frame, from_parquet_bytes, missing_columns, read_dates, read_f64, read_str,
    read_str_required, to_parquet_bytes,
};
use super::store::ObjectStore;
use super::watermark::{read_watermark, write_watermark, SilverWatermark};
use super::DataError;
use crate::domain::{CurrencyPair, LayerRunId};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

pub const LAYER: &str = "silver";

/// Value of the `source` column.
pub const SILVER_SOURCE: &str = "bankofcanada_valet";

pub const SILVER_COLUMNS: [&str; 9] = [
    "obs_date",
    "series_id",
    "value",
    "base_currency",
    "quote_currency",
    "source",
    "ingested_at",
    "run_id",
    "raw_key",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SilverRecord {
    pub obs_date: NaiveDate,
    pub series_id: String,
    pub value: f64,
    pub base_currency: Option<String>,
    pub quote_currency: Option<String>,
    pub source: String,
    pub ingested_at: DateTime<Utc>,
    pub run_id: String,
    /// Bronze payload key the row was parsed from.
    pub raw_key: String,
}

fn format_ingested_at(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ── Frame conversion ────────────────────────────────────────────────

pub fn records_to_frame(records: &[SilverRecord]) -> Result<DataFrame, DataError> {
    let dates: Vec<NaiveDate> = records.iter().map(|r| r.obs_date).collect();
    let series: Vec<String> = records.iter().map(|r| r.series_id.clone()).collect();
    let values: Vec<f64> = records.iter().map(|r| r.value).collect();
    let bases: Vec<Option<String>> = records.iter().map(|r| r.base_currency.clone()).collect();
    let quotes: Vec<Option<String>> = records.iter().map(|r| r.quote_currency.clone()).collect();
    let sources: Vec<String> = records.iter().map(|r| r.source.clone()).collect();
    let ingested: Vec<String> = records
        .iter()
        .map(|r| format_ingested_at(&r.ingested_at))
        .collect();
    let run_ids: Vec<String> = records.iter().map(|r| r.run_id.clone()).collect();
    let raw_keys: Vec<String> = records.iter().map(|r| r.raw_key.clone()).collect();

    frame(vec![
        date_column("obs_date", &dates)?,
        Column::new("series_id".into(), series),
        Column::new("value".into(), values),
        Column::new("base_currency".into(), bases),
        Column::new("quote_currency".into(), quotes),
        Column::new("source".into(), sources),
        Column::new("ingested_at".into(), ingested),
        Column::new("run_id".into(), run_ids),
        Column::new("raw_key".into(), raw_keys),
    ])
}

pub fn frame_to_records(df: &DataFrame, key: &str) -> Result<Vec<SilverRecord>, DataError> {
    let missing = missing_columns(df, &SILVER_COLUMNS);
    if !missing.is_empty() {
        return Err(DataError::ValidationError(format!(
            "silver object {key} is missing columns: [{}]",
            missing.join(", ")
        )));
    }

    let dates = read_dates(df, "obs_date")?;
    let series = read_str_required(df, "series_id")?;
    let values = read_f64(df, "value")?;
    let bases = read_str(df, "base_currency")?;
    let quotes = read_str(df, "quote_currency")?;
    let sources = read_str_required(df, "source")?;
    let ingested = read_str_required(df, "ingested_at")?;
    let run_ids = read_str_required(df, "run_id")?;
    let raw_keys = read_str_required(df, "raw_key")?;

    let mut out = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let value = values[i].ok_or_else(|| DataError::Malformed {
            key: key.to_string(),
            reason: format!("null value at row {i}"),
        })?;
        let ingested_at = DateTime::parse_from_rfc3339(&ingested[i])
            .map_err(|e| DataError::Malformed {
                key: key.to_string(),
                reason: format!("ingested_at '{}': {e}", ingested[i]),
            })?
            .with_timezone(&Utc);
        out.push(SilverRecord {
            obs_date: dates[i],
            series_id: series[i].clone(),
            value,
            base_currency: bases[i].clone(),
            quote_currency: quotes[i].clone(),
            source: sources[i].clone(),
            ingested_at,
            run_id: run_ids[i].clone(),
            raw_key: raw_keys[i].clone(),
        });
    }
    Ok(out)
}

// ── Dedup ───────────────────────────────────────────────────────────

/// Keep the latest-ingested row per (series_id, obs_date).
///
/// The sort is stable, so among rows with equal `ingested_at` the one that
/// came first in `records` survives. Output is ordered by (series_id, obs_date).
pub fn dedup_latest(mut records: Vec<SilverRecord>) -> Vec<SilverRecord> {
    records.sort_by(|a, b| b.ingested_at.cmp(&a.ingested_at));
    let mut seen: HashSet<(String, NaiveDate)> = HashSet::new();
    records.retain(|r| seen.insert((r.series_id.clone(), r.obs_date)));
    records.sort_by(|a, b| {
        a.series_id
            .cmp(&b.series_id)
            .then_with(|| a.obs_date.cmp(&b.obs_date))
    });
    records
}

// ── Partitions ──────────────────────────────────────────────────────

/// Every `ds=` partition of the series as `(obs_date, key)`, ascending.
pub fn list_partitions(
    store: &dyn ObjectStore,
    keys: &LayerKeys,
) -> Result<Vec<(NaiveDate, String)>, DataError> {
    let mut parts: Vec<(NaiveDate, String)> = store
        .list(&keys.silver_prefix())?
        .into_iter()
        .filter(|k| k.ends_with(PARTITION_FILE))
        .filter_map(|k| Some((keys::parse_partition_date(&k)?, k)))
        .collect();
    parts.sort();
    Ok(parts)
}

pub fn read_partition(store: &dyn ObjectStore, key: &str) -> Result<Vec<SilverRecord>, DataError> {
    let bytes = store.get(key)?;
    let df = from_parquet_bytes(&bytes)?;
    frame_to_records(&df, key)
}

/// Concatenated rows of the given partitions, in the order given.
pub fn read_partitions(
    store: &dyn ObjectStore,
    partitions: &[(NaiveDate, String)],
) -> Result<Vec<SilverRecord>, DataError> {
    let mut out = Vec::new();
    for (_, key) in partitions {
        out.extend(read_partition(store, key)?);
    }
    Ok(out)
}

pub fn write_partition(
    store: &dyn ObjectStore,
    keys: &LayerKeys,
    obs_date: NaiveDate,
    records: &[SilverRecord],
) -> Result<String, DataError> {
    let key = keys.silver_partition(obs_date);
    let df = records_to_frame(records)?;
    store.put(&key, &to_parquet_bytes(&df)?)?;
    Ok(key)
}

// ── Bronze -> silver merge ──────────────────────────────────────────

/// `retrieved_at_utc` from the sidecar, else the snapshot's own `ingest_ts`.
fn snapshot_ingested_at(store: &dyn ObjectStore, snap: &SnapshotRef) -> Option<DateTime<Utc>> {
    match bronze::read_meta(store, &snap.payload_key) {
        Ok(meta) => match meta.retrieved_at() {
            Some(ts) => return Some(ts),
            None => tracing::warn!(
                key = %snap.payload_key,
                retrieved_at_utc = %meta.retrieved_at_utc,
                "invalid retrieved_at_utc in bronze meta, using ingest_ts"
            ),
        },
        Err(e) => tracing::warn!(
            key = %snap.payload_key,
            error = %e,
            "bronze meta unreadable, using ingest_ts"
        ),
    }
    keys::ingest_ts_to_datetime(&snap.ingest_ts)
}

/// Merge pending bronze snapshots of one series into its silver partitions.
pub fn merge_bronze_to_silver(
    store: &dyn ObjectStore,
    keys: &LayerKeys,
    full_refresh: bool,
    now: DateTime<Utc>,
) -> Result<MergeOutcome, DataError> {
    let series_id = keys.series_id();
    let watermark_key = keys.silver_watermark();
    let watermark: Option<SilverWatermark> = read_watermark(store, &watermark_key)?;
    let mode = MergeMode::select(full_refresh, watermark.is_some());
    let watermark = if mode == MergeMode::FullRefresh { None } else { watermark };

    let snapshots = bronze::list_snapshots(store, keys)?;
    let pending: Vec<SnapshotRef> = match (&mode, &watermark) {
        (MergeMode::Incremental, Some(wm)) => snapshots
            .into_iter()
            .filter(|s| s.ingest_ts.as_str() > wm.last_ingest_ts.as_str())
            .collect(),
        _ => snapshots,
    };

    if pending.is_empty() {
        tracing::info!(series_id, %mode, "no new bronze snapshots");
        return Ok(MergeOutcome::empty(LAYER, series_id, mode, MergeStatus::NoNewFiles));
    }

    let inputs: Vec<String> = pending.iter().map(|s| s.payload_key.clone()).collect();
    let run_id = LayerRunId::derive(LAYER, series_id, &inputs);
    let pair = CurrencyPair::from_series_id(series_id);

    let mut fresh: Vec<SilverRecord> = Vec::new();
    let mut processed = 0usize;
    let mut skipped = 0usize;
    for snap in &pending {
        let observations = match bronze::read_observations(store, &snap.payload_key, series_id) {
            Ok(obs) => obs,
            Err(e) => {
                tracing::warn!(key = %snap.payload_key, error = %e, "skipping unreadable bronze snapshot");
                skipped += 1;
                continue;
            }
        };
        let Some(ingested_at) = snapshot_ingested_at(store, snap) else {
            tracing::warn!(key = %snap.payload_key, "snapshot has no usable timestamp, skipping");
            skipped += 1;
            continue;
        };
        processed += 1;
        fresh.extend(observations.into_iter().map(|obs| SilverRecord {
            obs_date: obs.obs_date,
            series_id: series_id.to_string(),
            value: obs.value,
            base_currency: pair.as_ref().map(|p| p.base.clone()),
            quote_currency: pair.as_ref().map(|p| p.quote.clone()),
            source: SILVER_SOURCE.to_string(),
            ingested_at,
            run_id: run_id.to_string(),
            raw_key: snap.payload_key.clone(),
        }));
    }

    // Skipped snapshots count as considered: the watermark moves past them.
    let max_ingest_ts = pending
        .iter()
        .map(|s| s.ingest_ts.clone())
        .chain(watermark.as_ref().map(|wm| wm.last_ingest_ts.clone()))
        .max()
        .unwrap_or_default();
    let prev_obs_date = watermark.as_ref().and_then(|wm| wm.last_obs_date);

    let mut outcome = MergeOutcome::empty(LAYER, series_id, mode, MergeStatus::NoRecords);
    outcome.files_processed = processed;
    outcome.files_skipped = skipped;
    outcome.run_id = Some(run_id.to_string());

    if fresh.is_empty() {
        tracing::warn!(series_id, files = pending.len(), skipped, "bronze snapshots yielded no records");
        write_watermark(
            store,
            &watermark_key,
            &SilverWatermark {
                last_ingest_ts: max_ingest_ts,
                last_obs_date: prev_obs_date,
                updated_at: now,
            },
        )?;
        return Ok(outcome);
    }

    let touched: BTreeSet<NaiveDate> = fresh.iter().map(|r| r.obs_date).collect();

    // Existing rows first so that ties on ingested_at keep them
    let mut combined: Vec<SilverRecord> = Vec::with_capacity(fresh.len() + touched.len());
    if mode != MergeMode::FullRefresh {
        for date in &touched {
            match read_partition(store, &keys.silver_partition(*date)) {
                Ok(rows) => combined.extend(rows),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
    }
    combined.extend(fresh);
    let survivors = dedup_latest(combined);

    let mut by_date: BTreeMap<NaiveDate, Vec<SilverRecord>> = BTreeMap::new();
    for rec in survivors {
        by_date.entry(rec.obs_date).or_default().push(rec);
    }
    let mut rows_written = 0usize;
    for (date, rows) in &by_date {
        write_partition(store, keys, *date, rows)?;
        rows_written += rows.len();
    }

    let mut removed = 0usize;
    if mode == MergeMode::FullRefresh {
        for (date, key) in list_partitions(store, keys)? {
            if !by_date.contains_key(&date) && store.delete(&key)? {
                removed += 1;
            }
        }
    }

    let min_date = touched.first().copied();
    let max_date = touched.last().copied();
    write_watermark(
        store,
        &watermark_key,
        &SilverWatermark {
            last_ingest_ts: max_ingest_ts,
            last_obs_date: prev_obs_date.max(max_date),
            updated_at: now,
        },
    )?;

    outcome.status = MergeStatus::Success;
    outcome.rows_written = rows_written;
    outcome.min_obs_date = min_date;
    outcome.max_obs_date = max_date;

    tracing::info!(
        series_id,
        %mode,
        files = processed,
        skipped,
        partitions = by_date.len(),
        removed,
        rows = rows_written,
        "silver merge complete"
    );
    Ok(outcome)
}
