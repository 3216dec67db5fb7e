//! Gold series -> h7 feature table.

use super::rolling::{pct_change, rolling_mean, rolling_median, rolling_std, safe_div};
use super::schema::{
    feature_index, FEATURE_COUNT, FEATURE_NAMES_H7, MOM_WINDOWS, REGIME_MEDIAN_WINDOW,
    RET_PERIODS, VOL_WINDOWS,
};
use crate::domain::{is_month_end, HORIZON};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("gold contract violated, missing columns: [{}]", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("expected exactly one series_id per input, found: [{}]", .0.join(", "))]
    MultipleSeries(Vec<String>),

    #[error("feature frame error: {0}")]
    Frame(String),
}

/// One row of the gold contract: `obs_date`, `value`, `prev_value` plus the
/// optional `daily_return` and `series_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldRow {
    pub obs_date: NaiveDate,
    pub value: f64,
    pub prev_value: Option<f64>,
    pub daily_return: Option<f64>,
    pub series_id: Option<String>,
}

/// A complete feature row: no NaN in any feature or target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub obs_date: NaiveDate,
    pub values: [f64; FEATURE_COUNT],
    pub direction_7d: u8,
    pub fwd_return_7d: f64,
}

impl FeatureRow {
    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.values[i])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub series_id: Option<String>,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Numeric feature column by name, `None` if it is not a known feature.
    pub fn numeric_column(&self, name: &str) -> Option<Vec<f64>> {
        let idx = feature_index(name)?;
        Some(self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Categorical column by name. Only `series_id` exists, and only when the
    /// input carried one.
    pub fn categorical_column(&self, name: &str) -> Option<Vec<String>> {
        if name != super::schema::SERIES_ID_COL {
            return None;
        }
        let sid = self.series_id.as_ref()?;
        Some(vec![sid.clone(); self.rows.len()])
    }

    pub fn obs_dates(&self) -> Vec<NaiveDate> {
        self.rows.iter().map(|r| r.obs_date).collect()
    }
}

fn single_series_id(rows: &[GoldRow]) -> Result<Option<String>, FeatureError> {
    let ids: BTreeSet<&str> = rows.iter().filter_map(|r| r.series_id.as_deref()).collect();
    match ids.len() {
        0 => Ok(None),
        1 => Ok(ids.into_iter().next().map(str::to_string)),
        _ => Err(FeatureError::MultipleSeries(
            ids.into_iter().map(str::to_string).collect(),
        )),
    }
}

/// The `daily_return` column counts as present when any row carries a value.
fn has_daily_return(rows: &[GoldRow]) -> bool {
    rows.iter().any(|r| r.daily_return.is_some())
}

/// `ret_1d`: the `daily_return` column as-is when present (nulls stay NaN),
/// otherwise `value / prev_value - 1` for every row.
fn one_day_returns(rows: &[&GoldRow], use_daily_return: bool) -> Vec<f64> {
    rows.iter()
        .map(|r| {
            if use_daily_return {
                r.daily_return.unwrap_or(f64::NAN)
            } else {
                r.prev_value.map_or(f64::NAN, |prev| r.value / prev - 1.0)
            }
        })
        .collect()
}

/// Build the h7 feature table from one gold series.
///
/// Rows are re-sorted by `obs_date` (stable). Targets are computed on the full
/// series, the last [`HORIZON`] rows are dropped, and only then are the
/// backward-looking features computed. Any row left with a non-finite value
/// is discarded.
pub fn build_features(gold: &[GoldRow]) -> Result<FeatureTable, FeatureError> {
    let series_id = single_series_id(gold)?;

    let mut sorted: Vec<&GoldRow> = gold.iter().collect();
    sorted.sort_by_key(|r| r.obs_date);

    // Targets on the full series
    let n = sorted.len();
    let kept = n.saturating_sub(HORIZON);
    let fwd_return: Vec<f64> = (0..kept)
        .map(|i| sorted[i + HORIZON].value / sorted[i].value - 1.0)
        .collect();
    let rows = &sorted[..kept];

    let value: Vec<f64> = rows.iter().map(|r| r.value).collect();
    let ret_1d = one_day_returns(rows, has_daily_return(gold));

    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(FEATURE_COUNT);
    columns.push(value.clone());
    columns.push(ret_1d.clone());
    for p in RET_PERIODS {
        columns.push(pct_change(&value, p));
    }
    let vols: Vec<Vec<f64>> = VOL_WINDOWS.iter().map(|&w| rolling_std(&ret_1d, w)).collect();
    columns.extend(vols.iter().cloned());
    for w in MOM_WINDOWS {
        columns.push(rolling_mean(&ret_1d, w));
    }

    let vol_21 = &vols[2];
    let vol_63 = &vols[3];
    columns.push(safe_div(&ret_1d, vol_21));
    columns.push(safe_div(&ret_1d, vol_63));
    columns.push(safe_div(vol_21, vol_63));
    let vol_med = rolling_median(vol_21, REGIME_MEDIAN_WINDOW);
    // NaN comparisons are false, matching an int cast of the boolean mask
    let is_high_vol: Vec<f64> = vol_21
        .iter()
        .zip(&vol_med)
        .map(|(v, m)| if v > m { 1.0 } else { 0.0 })
        .collect();
    columns.push(vol_med);
    columns.push(is_high_vol);

    columns.push(
        rows.iter()
            .map(|r| r.obs_date.weekday().num_days_from_monday() as f64)
            .collect(),
    );
    columns.push(rows.iter().map(|r| r.obs_date.month() as f64).collect());
    columns.push(
        rows.iter()
            .map(|r| if is_month_end(r.obs_date) { 1.0 } else { 0.0 })
            .collect(),
    );
    debug_assert_eq!(columns.len(), FEATURE_NAMES_H7.len());

    let mut out = Vec::with_capacity(kept);
    for (i, row) in rows.iter().enumerate() {
        let mut values = [0.0; FEATURE_COUNT];
        for (slot, col) in values.iter_mut().zip(&columns) {
            *slot = col[i];
        }
        let fwd = fwd_return[i];
        if !fwd.is_finite() || values.iter().any(|v| !v.is_finite()) {
            continue;
        }
        out.push(FeatureRow {
            obs_date: row.obs_date,
            values,
            direction_7d: u8::from(fwd > 0.0),
            fwd_return_7d: fwd,
        });
    }

    tracing::debug!(
        series_id = series_id.as_deref().unwrap_or("-"),
        input_rows = n,
        output_rows = out.len(),
        "built h7 features"
    );

    Ok(FeatureTable {
        series_id,
        rows: out,
    })
}
