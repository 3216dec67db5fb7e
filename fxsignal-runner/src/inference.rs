//! Gold series -> decision predictions.
//!
//! Each series is scored independently (in parallel), then the rows are
//! concatenated and re-sorted canonically by `(obs_date, series_id)`. Any
//! failure aborts the whole run before anything is written.

use chrono::NaiveDate;
use fxsignal_core::data::parquet::{
    date_column, frame, from_parquet_bytes, missing_columns, read_dates, read_f64, read_str,
    to_parquet_bytes,
};
use fxsignal_core::data::DataError;
use fxsignal_core::domain::Direction;
use fxsignal_core::features::{gold_rows_from_frame, build_features, FeatureError, FeatureTable};
use fxsignal_core::policy::{apply_threshold_policy, PolicyError};
use polars::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::model::{Classifier, FeatureMatrix, FeatureSpec, ModelError};

pub const PREDICTIONS_FILE: &str = "decision_predictions_h7.parquet";

/// Exact column set and order of the decision parquet.
pub const OUTPUT_COLUMNS: [&str; 4] = ["obs_date", "series_id", "p_up_logreg", "action_logreg"];

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no series to score")]
    NoSeries,

    #[error("failed to read gold input {path}: {reason}")]
    ReadGold { path: String, reason: String },

    #[error("{series_id}: {source}")]
    Feature {
        series_id: String,
        #[source]
        source: FeatureError,
    },

    #[error("{series_id}: gold file holds series_id \"{found}\"")]
    SeriesMismatch { series_id: String, found: String },

    #[error("{series_id}: missing {kind} features: [{}]", .columns.join(", "))]
    MissingFeatures {
        series_id: String,
        kind: &'static str,
        columns: Vec<String>,
    },

    #[error("{series_id}: model returned {got} probabilities for {expected} rows")]
    LengthMismatch {
        series_id: String,
        got: usize,
        expected: usize,
    },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("output contract violation: {0}")]
    Contract(String),

    #[error("no predictions generated")]
    Empty,

    #[error("predictions I/O error at {path}: {reason}")]
    Io { path: String, reason: String },
}

impl InferenceError {
    fn data(path: &Path, e: DataError) -> Self {
        InferenceError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

/// A series to score and the local gold file it is scored from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesInput {
    pub series_id: String,
    pub gold_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub obs_date: NaiveDate,
    pub series_id: String,
    pub p_up: f64,
    pub action: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceOptions {
    pub threshold: f64,
    /// Validate and score everything but skip the write.
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceSummary {
    pub rows: usize,
    pub by_series_rows: BTreeMap<String, usize>,
    pub min_obs_date: Option<NaiveDate>,
    pub max_obs_date: Option<NaiveDate>,
    pub written: Option<PathBuf>,
}

// ── Per-series scoring ───────────────────────────────────────────────

fn read_gold_table(input: &SeriesInput) -> Result<FeatureTable, InferenceError> {
    let read_err = |reason: String| InferenceError::ReadGold {
        path: input.gold_path.display().to_string(),
        reason,
    };
    let bytes = std::fs::read(&input.gold_path).map_err(|e| read_err(e.to_string()))?;
    let df = from_parquet_bytes(&bytes).map_err(|e| read_err(e.to_string()))?;

    let feature_err = |source: FeatureError| InferenceError::Feature {
        series_id: input.series_id.clone(),
        source,
    };
    let mut rows = gold_rows_from_frame(&df).map_err(feature_err)?;
    for row in &mut rows {
        match &row.series_id {
            Some(found) if *found != input.series_id => {
                return Err(InferenceError::SeriesMismatch {
                    series_id: input.series_id.clone(),
                    found: found.clone(),
                })
            }
            Some(_) => {}
            None => row.series_id = Some(input.series_id.clone()),
        }
    }
    build_features(&rows).map_err(feature_err)
}

/// Pick exactly the spec's columns out of a feature table, categorical first.
pub fn select_features(
    series_id: &str,
    table: &FeatureTable,
    spec: &FeatureSpec,
) -> Result<FeatureMatrix, InferenceError> {
    let mut matrix = FeatureMatrix {
        rows: table.len(),
        ..FeatureMatrix::default()
    };

    let mut missing = Vec::new();
    for name in &spec.categorical {
        match table.categorical_column(name) {
            Some(values) => matrix.categorical.push((name.clone(), values)),
            None => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(InferenceError::MissingFeatures {
            series_id: series_id.to_string(),
            kind: "categorical",
            columns: missing,
        });
    }

    for name in &spec.numeric {
        match table.numeric_column(name) {
            Some(values) => matrix.numeric.push((name.clone(), values)),
            None => missing.push(name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(InferenceError::MissingFeatures {
            series_id: series_id.to_string(),
            kind: "numeric",
            columns: missing,
        });
    }
    Ok(matrix)
}

fn score_series(
    input: &SeriesInput,
    classifier: &dyn Classifier,
    spec: &FeatureSpec,
    threshold: f64,
) -> Result<Vec<PredictionRow>, InferenceError> {
    let table = read_gold_table(input)?;
    let matrix = select_features(&input.series_id, &table, spec)?;
    let p_up = classifier.predict_proba(&matrix)?;
    if p_up.len() != table.len() {
        return Err(InferenceError::LengthMismatch {
            series_id: input.series_id.clone(),
            got: p_up.len(),
            expected: table.len(),
        });
    }
    let actions = apply_threshold_policy(&p_up, threshold)?;

    tracing::info!(series_id = %input.series_id, rows = table.len(), "scored series");
    Ok(table
        .rows
        .iter()
        .zip(p_up)
        .zip(actions)
        .map(|((row, p), action)| PredictionRow {
            obs_date: row.obs_date,
            series_id: input.series_id.clone(),
            p_up: p,
            action,
        })
        .collect())
}

/// Score every series; rows come back sorted by `(obs_date, series_id)`.
pub fn score_all(
    inputs: &[SeriesInput],
    classifier: &dyn Classifier,
    spec: &FeatureSpec,
    threshold: f64,
) -> Result<Vec<PredictionRow>, InferenceError> {
    if inputs.is_empty() {
        return Err(InferenceError::NoSeries);
    }
    let per_series: Vec<Vec<PredictionRow>> = inputs
        .par_iter()
        .map(|input| score_series(input, classifier, spec, threshold))
        .collect::<Result<_, _>>()?;

    let mut rows: Vec<PredictionRow> = per_series.into_iter().flatten().collect();
    if rows.is_empty() {
        return Err(InferenceError::Empty);
    }
    rows.sort_by(|a, b| {
        a.obs_date
            .cmp(&b.obs_date)
            .then_with(|| a.series_id.cmp(&b.series_id))
    });
    Ok(rows)
}

// ── Output contract ──────────────────────────────────────────────────

pub fn predictions_to_frame(rows: &[PredictionRow]) -> Result<DataFrame, InferenceError> {
    let contract = |e: DataError| InferenceError::Contract(e.to_string());
    let dates: Vec<NaiveDate> = rows.iter().map(|r| r.obs_date).collect();
    frame(vec![
        date_column("obs_date", &dates).map_err(contract)?,
        Column::new(
            "series_id".into(),
            rows.iter().map(|r| r.series_id.clone()).collect::<Vec<String>>(),
        ),
        Column::new(
            "p_up_logreg".into(),
            rows.iter().map(|r| r.p_up).collect::<Vec<f64>>(),
        ),
        Column::new(
            "action_logreg".into(),
            rows.iter().map(|r| r.action.as_str().to_string()).collect::<Vec<String>>(),
        ),
    ])
    .map_err(contract)
}

/// Exactly [`OUTPUT_COLUMNS`] in order, and no null `series_id`.
pub fn validate_output_frame(df: &DataFrame) -> Result<(), InferenceError> {
    let missing = missing_columns(df, &OUTPUT_COLUMNS);
    if !missing.is_empty() {
        return Err(InferenceError::Contract(format!(
            "missing required columns: [{}]",
            missing.join(", ")
        )));
    }
    let names: Vec<String> = df.get_column_names().iter().map(|n| n.to_string()).collect();
    let extra: Vec<String> = names
        .iter()
        .filter(|n| !OUTPUT_COLUMNS.contains(&n.as_str()))
        .cloned()
        .collect();
    if !extra.is_empty() {
        return Err(InferenceError::Contract(format!(
            "extra columns found: [{}]",
            extra.join(", ")
        )));
    }
    if names != OUTPUT_COLUMNS {
        return Err(InferenceError::Contract(format!(
            "column order [{}], expected [{}]",
            names.join(", "),
            OUTPUT_COLUMNS.join(", ")
        )));
    }
    let nulls = df
        .column("series_id")
        .map(|c| c.null_count())
        .map_err(|e| InferenceError::Contract(e.to_string()))?;
    if nulls > 0 {
        return Err(InferenceError::Contract(format!("series_id has {nulls} nulls")));
    }
    Ok(())
}

/// Read a decision parquet back into rows.
pub fn read_predictions(path: &Path) -> Result<Vec<PredictionRow>, InferenceError> {
    let bytes = std::fs::read(path).map_err(|e| InferenceError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let df = from_parquet_bytes(&bytes).map_err(|e| InferenceError::data(path, e))?;
    let missing = missing_columns(&df, &OUTPUT_COLUMNS);
    if !missing.is_empty() {
        return Err(InferenceError::Contract(format!(
            "{} missing required columns: [{}]",
            path.display(),
            missing.join(", ")
        )));
    }

    let dates = read_dates(&df, "obs_date").map_err(|e| InferenceError::data(path, e))?;
    let series = read_str(&df, "series_id").map_err(|e| InferenceError::data(path, e))?;
    let p_up = read_f64(&df, "p_up_logreg").map_err(|e| InferenceError::data(path, e))?;
    let actions = read_str(&df, "action_logreg").map_err(|e| InferenceError::data(path, e))?;

    (0..df.height())
        .map(|i| {
            let series_id = series[i]
                .clone()
                .ok_or_else(|| InferenceError::Contract(format!("row {i}: null series_id")))?;
            let action = actions[i]
                .as_deref()
                .ok_or_else(|| InferenceError::Contract(format!("row {i}: null action_logreg")))?
                .parse::<Direction>()
                .map_err(|e| InferenceError::Contract(format!("row {i}: {e}")))?;
            Ok(PredictionRow {
                obs_date: dates[i],
                series_id,
                p_up: p_up[i].unwrap_or(f64::NAN),
                action,
            })
        })
        .collect()
}

pub fn summarize(rows: &[PredictionRow]) -> InferenceSummary {
    let mut by_series_rows = BTreeMap::new();
    for row in rows {
        *by_series_rows.entry(row.series_id.clone()).or_insert(0) += 1;
    }
    InferenceSummary {
        rows: rows.len(),
        by_series_rows,
        min_obs_date: rows.iter().map(|r| r.obs_date).min(),
        max_obs_date: rows.iter().map(|r| r.obs_date).max(),
        written: None,
    }
}

/// Write `bytes` next to `path` and rename into place.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Score all series and write the decision parquet to `out_path`.
pub fn run_inference(
    inputs: &[SeriesInput],
    classifier: &dyn Classifier,
    spec: &FeatureSpec,
    out_path: &Path,
    options: InferenceOptions,
) -> Result<InferenceSummary, InferenceError> {
    tracing::info!(
        series = inputs.len(),
        threshold = options.threshold,
        out = %out_path.display(),
        "running inference"
    );
    let rows = score_all(inputs, classifier, spec, options.threshold)?;
    let df = predictions_to_frame(&rows)?;
    validate_output_frame(&df)?;

    let mut summary = summarize(&rows);
    if options.dry_run {
        tracing::info!(rows = summary.rows, out = %out_path.display(), "dry run, not writing");
        return Ok(summary);
    }

    let bytes = to_parquet_bytes(&df).map_err(|e| InferenceError::data(out_path, e))?;
    write_atomic(out_path, &bytes).map_err(|e| InferenceError::Io {
        path: out_path.display().to_string(),
        reason: e.to_string(),
    })?;
    tracing::info!(rows = summary.rows, out = %out_path.display(), "wrote predictions");
    summary.written = Some(out_path.to_path_buf());
    Ok(summary)
}
