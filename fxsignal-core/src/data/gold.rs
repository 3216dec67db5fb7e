//! Gold layer: one parquet file per series with return, lag, rolling,
//! calendar and forward target columns computed from silver.
//!
//! Incremental runs recompute only the new dates, using up to
//! [`CONTEXT_DAYS`] calendar days of earlier silver partitions as warm-up
//! for the lagged and rolling columns. Rows already written only have their
//! forward targets filled in once the later values arrive.

use super::keys::LayerKeys;
use super::outcome::{MergeMode, MergeOutcome, MergeStatus};
use super::parquet::{
    date_column, frame, from_parquet_bytes, missing_columns, read_bool, read_dates, read_f64,
    read_i32, read_str, read_str_required, to_parquet_bytes,
};
use super::silver::{self, SilverRecord};
use super::store::ObjectStore;
use super::watermark::{read_watermark, write_watermark, GoldWatermark};
use super::DataError;
use crate::domain::{is_month_end, LayerRunId};
use crate::features::rolling::{pct_change, rolling_mean_min, rolling_std_min};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const LAYER: &str = "gold";

/// Calendar days of silver read before the first new date.
pub const CONTEXT_DAYS: i64 = 30;

pub const GOLD_COLUMNS: [&str; 38] = [
    "obs_date",
    "series_id",
    "base_currency",
    "quote_currency",
    "value",
    "prev_value",
    "daily_return",
    "log_return",
    "return_5d",
    "return_21d",
    "lag_1d",
    "lag_2d",
    "lag_3d",
    "lag_5d",
    "lag_21d",
    "rolling_mean_5d",
    "rolling_mean_21d",
    "rolling_std_5d",
    "rolling_std_21d",
    "volatility_ratio",
    "ma_crossover",
    "distance_from_ma21",
    "day_of_week",
    "day_of_month",
    "week_of_year",
    "month",
    "quarter",
    "year",
    "is_month_start",
    "is_month_end",
    "is_quarter_end",
    "is_year_start",
    "is_year_end",
    "target_return_1d",
    "target_direction_1d",
    "target_return_5d",
    "source",
    "run_id",
];

/// Rows after a date that its forward targets read.
pub const TARGET_LEAD: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldRecord {
    pub obs_date: NaiveDate,
    pub series_id: String,
    pub base_currency: Option<String>,
    pub quote_currency: Option<String>,
    pub value: f64,
    pub prev_value: Option<f64>,
    pub daily_return: Option<f64>,
    pub log_return: Option<f64>,
    pub return_5d: Option<f64>,
    pub return_21d: Option<f64>,
    pub lag_1d: Option<f64>,
    pub lag_2d: Option<f64>,
    pub lag_3d: Option<f64>,
    pub lag_5d: Option<f64>,
    pub lag_21d: Option<f64>,
    pub rolling_mean_5d: Option<f64>,
    pub rolling_mean_21d: Option<f64>,
    pub rolling_std_5d: Option<f64>,
    pub rolling_std_21d: Option<f64>,
    /// `rolling_std_5d / rolling_std_21d`.
    pub volatility_ratio: Option<f64>,
    /// `rolling_mean_5d / rolling_mean_21d - 1`.
    pub ma_crossover: Option<f64>,
    /// `(value - rolling_mean_21d) / rolling_mean_21d`.
    pub distance_from_ma21: Option<f64>,
    /// 0 = Monday.
    pub day_of_week: i32,
    pub day_of_month: i32,
    /// ISO week.
    pub week_of_year: i32,
    pub month: i32,
    pub quarter: i32,
    pub year: i32,
    pub is_month_start: bool,
    pub is_month_end: bool,
    pub is_quarter_end: bool,
    pub is_year_start: bool,
    pub is_year_end: bool,
    /// Next row's `log_return`; null on the last row.
    pub target_return_1d: Option<f64>,
    /// 1 when `target_return_1d > 0`, else 0; null with it.
    pub target_direction_1d: Option<i32>,
    /// `value[i + 5] / value[i] - 1`; null on the last five rows.
    pub target_return_5d: Option<f64>,
    pub source: String,
    pub run_id: String,
}

impl GoldRecord {
    fn copy_targets_from(&mut self, other: &GoldRecord) {
        self.target_return_1d = other.target_return_1d;
        self.target_direction_1d = other.target_direction_1d;
        self.target_return_5d = other.target_return_5d;
    }
}

fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

/// `xs[i - k]`, NaN before the start.
fn lag(xs: &[f64], i: usize, k: usize) -> f64 {
    i.checked_sub(k).map_or(f64::NAN, |j| xs[j])
}

/// `xs[i + k]`, NaN past the end.
fn lead(xs: &[f64], i: usize, k: usize) -> f64 {
    xs.get(i + k).copied().unwrap_or(f64::NAN)
}

/// Compute gold rows for one series of deduplicated silver rows.
///
/// Rows are ordered by `obs_date` first; lagged and forward columns refer
/// to neighbouring rows, not calendar days.
pub fn compute_gold(silver: &[SilverRecord], run_id: &str) -> Vec<GoldRecord> {
    let mut rows: Vec<&SilverRecord> = silver.iter().collect();
    rows.sort_by_key(|r| r.obs_date);

    let value: Vec<f64> = rows.iter().map(|r| r.value).collect();
    let log_return: Vec<f64> = (0..value.len())
        .map(|i| (value[i] / lag(&value, i, 1)).ln())
        .collect();
    let return_5d = pct_change(&value, 5);
    let return_21d = pct_change(&value, 21);
    let mean_5 = rolling_mean_min(&value, 5, 1);
    let mean_21 = rolling_mean_min(&value, 21, 1);
    let std_5 = rolling_std_min(&value, 5, 2);
    let std_21 = rolling_std_min(&value, 21, 5);

    rows.iter()
        .enumerate()
        .map(|(i, r)| {
            let d = r.obs_date;
            let prev = lag(&value, i, 1);
            let target_return_1d = finite(lead(&log_return, i, 1));
            GoldRecord {
                obs_date: d,
                series_id: r.series_id.clone(),
                base_currency: r.base_currency.clone(),
                quote_currency: r.quote_currency.clone(),
                value: r.value,
                prev_value: finite(prev),
                daily_return: finite(value[i] / prev - 1.0),
                log_return: finite(log_return[i]),
                return_5d: finite(return_5d[i]),
                return_21d: finite(return_21d[i]),
                lag_1d: finite(prev),
                lag_2d: finite(lag(&value, i, 2)),
                lag_3d: finite(lag(&value, i, 3)),
                lag_5d: finite(lag(&value, i, 5)),
                lag_21d: finite(lag(&value, i, 21)),
                rolling_mean_5d: finite(mean_5[i]),
                rolling_mean_21d: finite(mean_21[i]),
                rolling_std_5d: finite(std_5[i]),
                rolling_std_21d: finite(std_21[i]),
                volatility_ratio: finite(std_5[i] / std_21[i]),
                ma_crossover: finite(mean_5[i] / mean_21[i] - 1.0),
                distance_from_ma21: finite((value[i] - mean_21[i]) / mean_21[i]),
                day_of_week: d.weekday().num_days_from_monday() as i32,
                day_of_month: d.day() as i32,
                week_of_year: d.iso_week().week() as i32,
                month: d.month() as i32,
                quarter: d.month0() as i32 / 3 + 1,
                year: d.year(),
                is_month_start: d.day() == 1,
                is_month_end: is_month_end(d),
                is_quarter_end: is_month_end(d) && d.month() % 3 == 0,
                is_year_start: d.ordinal() == 1,
                is_year_end: d.month() == 12 && d.day() == 31,
                target_return_1d,
                target_direction_1d: target_return_1d.map(|t| i32::from(t > 0.0)),
                target_return_5d: finite(lead(&value, i, TARGET_LEAD) / value[i] - 1.0),
                source: r.source.clone(),
                run_id: run_id.to_string(),
            }
        })
        .collect()
}

// ── Frame conversion ────────────────────────────────────────────────

fn f64_col(records: &[GoldRecord], name: &str, f: impl Fn(&GoldRecord) -> Option<f64>) -> Column {
    Column::new(name.into(), records.iter().map(f).collect::<Vec<Option<f64>>>())
}

fn i32_col(records: &[GoldRecord], name: &str, f: impl Fn(&GoldRecord) -> i32) -> Column {
    Column::new(name.into(), records.iter().map(f).collect::<Vec<i32>>())
}

fn bool_col(records: &[GoldRecord], name: &str, f: impl Fn(&GoldRecord) -> bool) -> Column {
    Column::new(name.into(), records.iter().map(f).collect::<Vec<bool>>())
}

fn str_col(records: &[GoldRecord], name: &str, f: impl Fn(&GoldRecord) -> Option<String>) -> Column {
    Column::new(name.into(), records.iter().map(f).collect::<Vec<Option<String>>>())
}

pub fn records_to_frame(records: &[GoldRecord]) -> Result<DataFrame, DataError> {
    let dates: Vec<NaiveDate> = records.iter().map(|r| r.obs_date).collect();
    let r = records;

    frame(vec![
        date_column("obs_date", &dates)?,
        Column::new(
            "series_id".into(),
            r.iter().map(|x| x.series_id.clone()).collect::<Vec<String>>(),
        ),
        str_col(r, "base_currency", |x| x.base_currency.clone()),
        str_col(r, "quote_currency", |x| x.quote_currency.clone()),
        Column::new("value".into(), r.iter().map(|x| x.value).collect::<Vec<f64>>()),
        f64_col(r, "prev_value", |x| x.prev_value),
        f64_col(r, "daily_return", |x| x.daily_return),
        f64_col(r, "log_return", |x| x.log_return),
        f64_col(r, "return_5d", |x| x.return_5d),
        f64_col(r, "return_21d", |x| x.return_21d),
        f64_col(r, "lag_1d", |x| x.lag_1d),
        f64_col(r, "lag_2d", |x| x.lag_2d),
        f64_col(r, "lag_3d", |x| x.lag_3d),
        f64_col(r, "lag_5d", |x| x.lag_5d),
        f64_col(r, "lag_21d", |x| x.lag_21d),
        f64_col(r, "rolling_mean_5d", |x| x.rolling_mean_5d),
        f64_col(r, "rolling_mean_21d", |x| x.rolling_mean_21d),
        f64_col(r, "rolling_std_5d", |x| x.rolling_std_5d),
        f64_col(r, "rolling_std_21d", |x| x.rolling_std_21d),
        f64_col(r, "volatility_ratio", |x| x.volatility_ratio),
        f64_col(r, "ma_crossover", |x| x.ma_crossover),
        f64_col(r, "distance_from_ma21", |x| x.distance_from_ma21),
        i32_col(r, "day_of_week", |x| x.day_of_week),
        i32_col(r, "day_of_month", |x| x.day_of_month),
        i32_col(r, "week_of_year", |x| x.week_of_year),
        i32_col(r, "month", |x| x.month),
        i32_col(r, "quarter", |x| x.quarter),
        i32_col(r, "year", |x| x.year),
        bool_col(r, "is_month_start", |x| x.is_month_start),
        bool_col(r, "is_month_end", |x| x.is_month_end),
        bool_col(r, "is_quarter_end", |x| x.is_quarter_end),
        bool_col(r, "is_year_start", |x| x.is_year_start),
        bool_col(r, "is_year_end", |x| x.is_year_end),
        f64_col(r, "target_return_1d", |x| x.target_return_1d),
        Column::new(
            "target_direction_1d".into(),
            r.iter().map(|x| x.target_direction_1d).collect::<Vec<Option<i32>>>(),
        ),
        f64_col(r, "target_return_5d", |x| x.target_return_5d),
        Column::new(
            "source".into(),
            r.iter().map(|x| x.source.clone()).collect::<Vec<String>>(),
        ),
        Column::new(
            "run_id".into(),
            r.iter().map(|x| x.run_id.clone()).collect::<Vec<String>>(),
        ),
    ])
}

pub fn frame_to_records(df: &DataFrame, key: &str) -> Result<Vec<GoldRecord>, DataError> {
    let missing = missing_columns(df, &GOLD_COLUMNS);
    if !missing.is_empty() {
        return Err(DataError::ValidationError(format!(
            "gold object {key} is missing columns: [{}]",
            missing.join(", ")
        )));
    }
    let malformed = |reason: String| DataError::Malformed {
        key: key.to_string(),
        reason,
    };
    let required_i32 = |name: &str| -> Result<Vec<i32>, DataError> {
        read_i32(df, name)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| malformed(format!("null {name} at row {i}"))))
            .collect()
    };
    let required_bool = |name: &str| -> Result<Vec<bool>, DataError> {
        read_bool(df, name)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| v.ok_or_else(|| malformed(format!("null {name} at row {i}"))))
            .collect()
    };

    let dates = read_dates(df, "obs_date")?;
    let series = read_str_required(df, "series_id")?;
    let bases = read_str(df, "base_currency")?;
    let quotes = read_str(df, "quote_currency")?;
    let values = read_f64(df, "value")?;
    let prev = read_f64(df, "prev_value")?;
    let daily = read_f64(df, "daily_return")?;
    let log = read_f64(df, "log_return")?;
    let r5 = read_f64(df, "return_5d")?;
    let r21 = read_f64(df, "return_21d")?;
    let l1 = read_f64(df, "lag_1d")?;
    let l2 = read_f64(df, "lag_2d")?;
    let l3 = read_f64(df, "lag_3d")?;
    let l5 = read_f64(df, "lag_5d")?;
    let l21 = read_f64(df, "lag_21d")?;
    let m5 = read_f64(df, "rolling_mean_5d")?;
    let m21 = read_f64(df, "rolling_mean_21d")?;
    let s5 = read_f64(df, "rolling_std_5d")?;
    let s21 = read_f64(df, "rolling_std_21d")?;
    let vol_ratio = read_f64(df, "volatility_ratio")?;
    let crossover = read_f64(df, "ma_crossover")?;
    let distance = read_f64(df, "distance_from_ma21")?;
    let dow = required_i32("day_of_week")?;
    let dom = required_i32("day_of_month")?;
    let week = required_i32("week_of_year")?;
    let month = required_i32("month")?;
    let quarter = required_i32("quarter")?;
    let year = required_i32("year")?;
    let month_start = required_bool("is_month_start")?;
    let month_end = required_bool("is_month_end")?;
    let quarter_end = required_bool("is_quarter_end")?;
    let year_start = required_bool("is_year_start")?;
    let year_end = required_bool("is_year_end")?;
    let t1 = read_f64(df, "target_return_1d")?;
    let dir1 = read_i32(df, "target_direction_1d")?;
    let t5 = read_f64(df, "target_return_5d")?;
    let sources = read_str_required(df, "source")?;
    let run_ids = read_str_required(df, "run_id")?;

    (0..df.height())
        .map(|i| {
            Ok(GoldRecord {
                obs_date: dates[i],
                series_id: series[i].clone(),
                base_currency: bases[i].clone(),
                quote_currency: quotes[i].clone(),
                value: values[i].ok_or_else(|| malformed(format!("null value at row {i}")))?,
                prev_value: prev[i],
                daily_return: daily[i],
                log_return: log[i],
                return_5d: r5[i],
                return_21d: r21[i],
                lag_1d: l1[i],
                lag_2d: l2[i],
                lag_3d: l3[i],
                lag_5d: l5[i],
                lag_21d: l21[i],
                rolling_mean_5d: m5[i],
                rolling_mean_21d: m21[i],
                rolling_std_5d: s5[i],
                rolling_std_21d: s21[i],
                volatility_ratio: vol_ratio[i],
                ma_crossover: crossover[i],
                distance_from_ma21: distance[i],
                day_of_week: dow[i],
                day_of_month: dom[i],
                week_of_year: week[i],
                month: month[i],
                quarter: quarter[i],
                year: year[i],
                is_month_start: month_start[i],
                is_month_end: month_end[i],
                is_quarter_end: quarter_end[i],
                is_year_start: year_start[i],
                is_year_end: year_end[i],
                target_return_1d: t1[i],
                target_direction_1d: dir1[i],
                target_return_5d: t5[i],
                source: sources[i].clone(),
                run_id: run_ids[i].clone(),
            })
        })
        .collect()
}

/// Current gold rows of a series; empty when the file does not exist yet.
pub fn read_gold(store: &dyn ObjectStore, keys: &LayerKeys) -> Result<Vec<GoldRecord>, DataError> {
    let key = keys.gold_data();
    match store.get(&key) {
        Ok(bytes) => frame_to_records(&from_parquet_bytes(&bytes)?, &key),
        Err(e) if e.is_not_found() => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Keep the last occurrence per (series_id, obs_date), ordered by date.
fn dedup_newest_write(records: Vec<GoldRecord>) -> Vec<GoldRecord> {
    let mut seen: HashSet<(String, NaiveDate)> = HashSet::new();
    let mut out: Vec<GoldRecord> = records
        .into_iter()
        .rev()
        .filter(|r| seen.insert((r.series_id.clone(), r.obs_date)))
        .collect();
    out.sort_by(|a, b| {
        a.obs_date
            .cmp(&b.obs_date)
            .then_with(|| a.series_id.cmp(&b.series_id))
    });
    out
}

/// Fill forward targets of already-written rows from recomputed warm-up
/// rows. Only the target columns change; returns how many rows gained one.
fn refresh_targets(existing: &mut [GoldRecord], warmup: &[GoldRecord]) -> usize {
    let by_date: HashMap<NaiveDate, &GoldRecord> = warmup.iter().map(|r| (r.obs_date, r)).collect();
    let mut resolved = 0;
    for rec in existing.iter_mut() {
        let Some(fresh) = by_date.get(&rec.obs_date).filter(|f| f.series_id == rec.series_id) else {
            continue;
        };
        if (rec.target_return_5d.is_none() && fresh.target_return_5d.is_some())
            || (rec.target_return_1d.is_none() && fresh.target_return_1d.is_some())
        {
            resolved += 1;
        }
        rec.copy_targets_from(fresh);
    }
    resolved
}

// ── Silver -> gold merge ────────────────────────────────────────────

pub fn merge_silver_to_gold(
    store: &dyn ObjectStore,
    keys: &LayerKeys,
    full_refresh: bool,
    now: DateTime<Utc>,
) -> Result<MergeOutcome, DataError> {
    let series_id = keys.series_id();
    let watermark_key = keys.gold_watermark();
    let watermark: Option<GoldWatermark> = read_watermark(store, &watermark_key)?;
    let mode = MergeMode::select(full_refresh, watermark.is_some());
    let last = match mode {
        MergeMode::Incremental => watermark.as_ref().map(|wm| wm.last_obs_date),
        _ => None,
    };

    let partitions = silver::list_partitions(store, keys)?;
    let new_parts: Vec<(NaiveDate, String)> = partitions
        .iter()
        .filter(|(date, _)| last.map_or(true, |l| *date > l))
        .cloned()
        .collect();
    let Some(earliest_new) = new_parts.first().map(|(date, _)| *date) else {
        tracing::info!(series_id, %mode, "no new silver partitions");
        return Ok(MergeOutcome::empty(LAYER, series_id, mode, MergeStatus::NoNewFiles));
    };

    let context_start = earliest_new - chrono::Duration::days(CONTEXT_DAYS);
    let context: Vec<(NaiveDate, String)> = partitions
        .iter()
        .filter(|(date, _)| *date >= context_start && *date < earliest_new)
        .cloned()
        .collect();

    let inputs: Vec<String> = new_parts.iter().map(|(_, key)| key.clone()).collect();
    let run_id = LayerRunId::derive(LAYER, series_id, &inputs);

    let mut selected = context.clone();
    selected.extend(new_parts.iter().cloned());
    let silver_rows = silver::read_partitions(store, &selected)?;

    let mut outcome = MergeOutcome::empty(LAYER, series_id, mode, MergeStatus::NoRecords);
    outcome.files_processed = selected.len();
    outcome.run_id = Some(run_id.to_string());

    let (fresh, warmup): (Vec<GoldRecord>, Vec<GoldRecord>) =
        compute_gold(&silver_rows, run_id.as_str())
            .into_iter()
            .partition(|r| last.map_or(true, |l| r.obs_date > l));
    if fresh.is_empty() {
        tracing::warn!(series_id, partitions = selected.len(), "silver partitions yielded no gold rows");
        return Ok(outcome);
    }

    let mut existing = match mode {
        MergeMode::FullRefresh => Vec::new(),
        _ => read_gold(store, keys)?,
    };
    let resolved = refresh_targets(&mut existing, &warmup);
    let rows_written = fresh.len();
    let min_date = fresh.first().map(|r| r.obs_date);
    let max_date = fresh.last().map(|r| r.obs_date);

    let mut combined = existing;
    combined.extend(fresh);
    let merged = dedup_newest_write(combined);

    let df = records_to_frame(&merged)?;
    store.put(&keys.gold_data(), &to_parquet_bytes(&df)?)?;

    if let Some(last_obs_date) = merged.last().map(|r| r.obs_date) {
        write_watermark(
            store,
            &watermark_key,
            &GoldWatermark {
                last_obs_date,
                updated_at: now,
            },
        )?;
    }

    outcome.status = MergeStatus::Success;
    outcome.rows_written = rows_written;
    outcome.min_obs_date = min_date;
    outcome.max_obs_date = max_date;

    tracing::info!(
        series_id,
        %mode,
        new_partitions = new_parts.len(),
        context_partitions = context.len(),
        rows = rows_written,
        resolved_targets = resolved,
        total_rows = merged.len(),
        "gold merge complete"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::silver::{write_partition, SILVER_SOURCE};
    use crate::data::store::MemoryStore;
    use chrono::{TimeZone, Weekday};

    fn business_days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
        let mut out = Vec::with_capacity(n);
        let mut d = start;
        while out.len() < n {
            if !matches!(d.weekday(), Weekday::Sat | Weekday::Sun) {
                out.push(d);
            }
            d = d.succ_opt().unwrap();
        }
        out
    }

    fn seed_silver(store: &MemoryStore, keys: &LayerKeys, dates: &[NaiveDate]) {
        let ingested_at = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        for (i, date) in dates.iter().enumerate() {
            let rec = SilverRecord {
                obs_date: *date,
                series_id: keys.series_id().to_string(),
                value: 1.30 + 0.01 * ((i * 7 % 11) as f64),
                base_currency: Some("USD".into()),
                quote_currency: Some("CAD".into()),
                source: SILVER_SOURCE.into(),
                ingested_at,
                run_id: "silver-test".into(),
                raw_key: "bronze/x".into(),
            };
            write_partition(store, keys, *date, &[rec]).unwrap();
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 0).unwrap()
    }

    #[test]
    fn compute_gold_columns() {
        let dates = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 6);
        let silver: Vec<SilverRecord> = dates
            .iter()
            .zip([1.0, 2.0, 4.0, 4.0, 2.0, 1.0])
            .map(|(d, v)| SilverRecord {
                obs_date: *d,
                series_id: "FXUSDCAD".into(),
                value: v,
                base_currency: None,
                quote_currency: None,
                source: SILVER_SOURCE.into(),
                ingested_at: now(),
                run_id: "s".into(),
                raw_key: "k".into(),
            })
            .collect();
        let gold = compute_gold(&silver, "g");

        assert_eq!(gold[0].prev_value, None);
        assert_eq!(gold[0].daily_return, None);
        assert_eq!(gold[0].rolling_mean_5d, Some(1.0));
        assert_eq!(gold[0].rolling_std_5d, None);
        assert_eq!(gold[1].prev_value, Some(1.0));
        assert_eq!(gold[1].daily_return, Some(1.0));
        assert_eq!(gold[1].log_return, Some(2.0_f64.ln()));
        assert_eq!(gold[5].return_5d, Some(0.0));
        assert_eq!(gold[4].rolling_mean_5d, Some(13.0 / 5.0));
        assert_eq!(gold[3].rolling_std_21d, None);
        assert!(gold[4].rolling_std_21d.is_some());
        assert_eq!(gold[0].day_of_week, 0);
        assert!(gold.iter().all(|g| g.run_id == "g"));
    }

    #[test]
    fn initial_load_then_no_new_partitions() {
        let store = MemoryStore::new();
        let keys = LayerKeys::new("BoC", "FXUSDCAD");
        let dates = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 40);
        seed_silver(&store, &keys, &dates);

        let out = merge_silver_to_gold(&store, &keys, false, now()).unwrap();
        assert_eq!(out.mode, MergeMode::InitialLoad);
        assert_eq!(out.status, MergeStatus::Success);
        assert_eq!(out.rows_written, 40);
        assert_eq!(read_gold(&store, &keys).unwrap().len(), 40);

        let wm: GoldWatermark = read_watermark(&store, &keys.gold_watermark()).unwrap().unwrap();
        assert_eq!(wm.last_obs_date, dates[39]);

        let again = merge_silver_to_gold(&store, &keys, false, now()).unwrap();
        assert_eq!(again.status, MergeStatus::NoNewFiles);
    }

    #[test]
    fn incremental_matches_full_recompute_on_short_windows() {
        let store = MemoryStore::new();
        let keys = LayerKeys::new("BoC", "FXUSDCAD");
        let dates = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 60);
        seed_silver(&store, &keys, &dates[..50]);
        merge_silver_to_gold(&store, &keys, false, now()).unwrap();

        seed_silver(&store, &keys, &dates);
        let out = merge_silver_to_gold(&store, &keys, false, now()).unwrap();
        assert_eq!(out.mode, MergeMode::Incremental);
        assert_eq!(out.rows_written, 10);
        assert_eq!(out.min_obs_date, Some(dates[50]));
        let incremental = read_gold(&store, &keys).unwrap();
        assert_eq!(incremental.len(), 60);

        let reference = MemoryStore::new();
        seed_silver(&reference, &keys, &dates);
        merge_silver_to_gold(&reference, &keys, false, now()).unwrap();
        let full = read_gold(&reference, &keys).unwrap();

        for (a, b) in incremental[50..].iter().zip(&full[50..]) {
            assert_eq!(a.obs_date, b.obs_date);
            assert_eq!(a.prev_value, b.prev_value);
            assert_eq!(a.daily_return, b.daily_return);
            assert_eq!(a.rolling_mean_5d, b.rolling_mean_5d);
            assert_eq!(a.rolling_std_5d, b.rolling_std_5d);
        }
        for (a, b) in incremental[..50].iter().zip(&full[..50]) {
            let relabeled = GoldRecord {
                run_id: b.run_id.clone(),
                ..a.clone()
            };
            assert_eq!(&relabeled, b);
        }
    }

    #[test]
    fn full_refresh_rebuilds_from_all_partitions() {
        let store = MemoryStore::new();
        let keys = LayerKeys::new("BoC", "FXUSDCAD");
        let dates = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 30);
        seed_silver(&store, &keys, &dates);
        merge_silver_to_gold(&store, &keys, false, now()).unwrap();

        let out = merge_silver_to_gold(&store, &keys, true, now()).unwrap();
        assert_eq!(out.mode, MergeMode::FullRefresh);
        assert_eq!(out.rows_written, 30);
        let rows = read_gold(&store, &keys).unwrap();
        assert_eq!(rows.len(), 30);
        let unique: HashSet<NaiveDate> = rows.iter().map(|r| r.obs_date).collect();
        assert_eq!(unique.len(), 30);
    }

    #[test]
    fn newest_write_wins() {
        let silver = silver_rows(&[NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()], &[1.0]);
        let first = compute_gold(&silver, "r").remove(0);
        let second = GoldRecord {
            value: 2.0,
            ..first.clone()
        };
        let out = dedup_newest_write(vec![first, second]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 2.0);
    }

    fn silver_rows(dates: &[NaiveDate], values: &[f64]) -> Vec<SilverRecord> {
        dates
            .iter()
            .zip(values)
            .map(|(d, v)| SilverRecord {
                obs_date: *d,
                series_id: "FXUSDCAD".into(),
                value: *v,
                base_currency: None,
                quote_currency: None,
                source: SILVER_SOURCE.into(),
                ingested_at: now(),
                run_id: "s".into(),
                raw_key: "k".into(),
            })
            .collect()
    }

    #[test]
    fn lags_look_back_by_row() {
        let dates = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 30);
        let values: Vec<f64> = (0..30).map(|i| 1.0 + i as f64 / 100.0).collect();
        let gold = compute_gold(&silver_rows(&dates, &values), "g");

        for (i, g) in gold.iter().enumerate() {
            let back = |k: usize| i.checked_sub(k).map(|j| values[j]);
            assert_eq!(g.lag_1d, back(1), "lag_1d row {i}");
            assert_eq!(g.lag_2d, back(2), "lag_2d row {i}");
            assert_eq!(g.lag_3d, back(3), "lag_3d row {i}");
            assert_eq!(g.lag_5d, back(5), "lag_5d row {i}");
            assert_eq!(g.lag_21d, back(21), "lag_21d row {i}");
        }
        assert_eq!(gold[1].lag_1d, gold[1].prev_value);
    }

    #[test]
    fn targets_shift_forward_and_are_null_at_the_tail() {
        let dates = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 12);
        let values = [1.0, 2.0, 4.0, 4.0, 2.0, 1.0, 1.5, 1.5, 3.0, 2.0, 2.5, 2.0];
        let gold = compute_gold(&silver_rows(&dates, &values), "g");
        let n = gold.len();

        for i in 0..n - 1 {
            assert_eq!(gold[i].target_return_1d, gold[i + 1].log_return, "row {i}");
        }
        assert_eq!(gold[n - 1].target_return_1d, None);
        assert_eq!(gold[n - 1].target_direction_1d, None);

        assert_eq!(gold[0].target_direction_1d, Some(1));
        assert_eq!(gold[2].target_direction_1d, Some(0));
        assert_eq!(gold[3].target_direction_1d, Some(0));

        assert_eq!(gold[0].target_return_5d, Some(1.0 / 1.0 - 1.0));
        assert_eq!(gold[1].target_return_5d, Some(1.5 / 2.0 - 1.0));
        assert!(gold[n - 6].target_return_5d.is_some());
        assert!(gold[n - 5..].iter().all(|g| g.target_return_5d.is_none()));
    }

    #[test]
    fn derived_signals_follow_rolling_stats() {
        let dates = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 8);
        let values = [1.0, 2.0, 4.0, 4.0, 2.0, 1.0, 3.0, 2.0];
        let gold = compute_gold(&silver_rows(&dates, &values), "g");

        // rolling_std_21d needs five rows
        assert_eq!(gold[3].volatility_ratio, None);
        let g = &gold[7];
        let (s5, s21) = (g.rolling_std_5d.unwrap(), g.rolling_std_21d.unwrap());
        let (m5, m21) = (g.rolling_mean_5d.unwrap(), g.rolling_mean_21d.unwrap());
        assert_eq!(g.volatility_ratio, Some(s5 / s21));
        assert_eq!(g.ma_crossover, Some(m5 / m21 - 1.0));
        assert_eq!(g.distance_from_ma21, Some((2.0 - m21) / m21));
        assert_eq!(gold[0].ma_crossover, Some(0.0));
    }

    #[test]
    fn calendar_flags() {
        let ymd = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        let dates = [ymd(2024, 1, 1), ymd(2024, 6, 28), ymd(2024, 9, 30), ymd(2024, 12, 31)];
        let gold = compute_gold(&silver_rows(&dates, &[1.0, 1.0, 1.0, 1.0]), "g");

        let new_year = &gold[0];
        assert!(new_year.is_month_start && new_year.is_year_start);
        assert!(!new_year.is_year_end && !new_year.is_quarter_end);
        assert_eq!((new_year.quarter, new_year.week_of_year, new_year.year), (1, 1, 2024));

        // last business day of June is not the calendar quarter end
        let june = &gold[1];
        assert!(!june.is_month_end && !june.is_quarter_end);
        assert_eq!((june.day_of_month, june.quarter, june.day_of_week), (28, 2, 4));

        let q3 = &gold[2];
        assert!(q3.is_month_end && q3.is_quarter_end && !q3.is_year_end);
        assert_eq!(q3.quarter, 3);

        let eve = &gold[3];
        assert!(eve.is_year_end && eve.is_quarter_end && eve.is_month_end);
        assert!(!eve.is_month_start);
        // ISO week 1 of the following year
        assert_eq!((eve.week_of_year, eve.year, eve.quarter), (1, 2024, 4));
    }

    #[test]
    fn incremental_fills_targets_of_the_previous_tail() {
        let store = MemoryStore::new();
        let keys = LayerKeys::new("BoC", "FXUSDCAD");
        let dates = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 40);
        seed_silver(&store, &keys, &dates[..30]);
        merge_silver_to_gold(&store, &keys, false, now()).unwrap();
        let before = read_gold(&store, &keys).unwrap();
        assert!(before[25..].iter().all(|g| g.target_return_5d.is_none()));
        assert_eq!(before[29].target_return_1d, None);

        seed_silver(&store, &keys, &dates);
        merge_silver_to_gold(&store, &keys, false, now()).unwrap();
        let after = read_gold(&store, &keys).unwrap();

        assert!(after[..35].iter().all(|g| g.target_return_5d.is_some()));
        assert!(after[35..].iter().all(|g| g.target_return_5d.is_none()));
        assert_eq!(after[29].target_return_1d, after[30].log_return);
        // nothing but the targets moved on old rows
        assert_eq!(after[29].run_id, before[29].run_id);
        assert_eq!(after[29].lag_21d, before[29].lag_21d);
        assert_eq!(after[29].rolling_std_21d, before[29].rolling_std_21d);
    }

    #[test]
    fn frame_roundtrip_keeps_nulls() {
        let dates = business_days(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), 7);
        let gold = compute_gold(&silver_rows(&dates, &[1.0, 1.1, 1.2, 1.1, 1.0, 1.3, 1.2]), "g");
        let df = records_to_frame(&gold).unwrap();
        assert_eq!(df.width(), GOLD_COLUMNS.len());
        assert_eq!(frame_to_records(&df, "gold/x").unwrap(), gold);
    }
}
