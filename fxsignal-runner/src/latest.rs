//! Per-pair "latest" artifacts for dashboards and API consumers.
//!
//! One JSON and one CSV file per pair, holding the most recent rows of the
//! decision parquet with the banded decision and its confidence.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use fxsignal_core::domain::HORIZON_TAG;
use fxsignal_core::policy::{apply_threshold_policy, confidence_from_p};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{Clock, SystemClock, TtlCache};
use crate::inference::{read_predictions, write_atomic, PredictionRow};

pub const DEFAULT_LIMIT_ROWS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestRow {
    pub obs_date: String,
    pub pair: String,
    pub p_up_logreg: Option<f64>,
    pub action_logreg: Option<String>,
    pub decision: Option<String>,
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestArtifact {
    pub sha: String,
    pub pair: String,
    pub horizon: String,
    pub generated_at: String,
    pub rows: Vec<LatestRow>,
}

/// `FXUSDCAD` -> `USD_CAD`. Every series is quoted against CAD.
pub fn series_id_to_pair(series_id: &str) -> Option<String> {
    let base = series_id.strip_prefix("FX")?.strip_suffix("CAD")?;
    if base.is_empty() {
        return None;
    }
    Some(format!("{base}_CAD"))
}

pub fn latest_file_stem(pair: &str) -> String {
    format!("latest_{pair}_{HORIZON_TAG}")
}

/// Artifact for one pair from its prediction rows (any order).
pub fn build_latest_for_series(
    rows: &[PredictionRow],
    sha: &str,
    pair: &str,
    limit_rows: usize,
    threshold: f64,
    generated_at: DateTime<Utc>,
) -> Result<LatestArtifact> {
    let mut sorted: Vec<&PredictionRow> = rows.iter().collect();
    sorted.sort_by_key(|r| r.obs_date);
    let tail = &sorted[sorted.len().saturating_sub(limit_rows)..];

    let p: Vec<f64> = tail.iter().map(|r| r.p_up).collect();
    let decisions = apply_threshold_policy(&p, threshold)?;
    let confidences = confidence_from_p(&p, threshold)?;

    let rows = tail
        .iter()
        .zip(decisions)
        .zip(confidences)
        .map(|((r, decision), confidence)| {
            let p_up = r.p_up.is_finite().then_some(r.p_up);
            LatestRow {
                obs_date: r.obs_date.format("%Y-%m-%d").to_string(),
                pair: pair.to_string(),
                p_up_logreg: p_up,
                action_logreg: Some(r.action.as_str().to_string()),
                decision: p_up.map(|_| decision.as_str().to_string()),
                confidence: p_up.map(|_| confidence),
            }
        })
        .collect();

    Ok(LatestArtifact {
        sha: sha.to_string(),
        pair: pair.to_string(),
        horizon: HORIZON_TAG.to_string(),
        generated_at: generated_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        rows,
    })
}

fn csv_bytes(artifact: &LatestArtifact) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in &artifact.rows {
        writer.serialize(row).context("Failed to serialize latest row")?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to finish latest CSV: {e}"))
}

pub fn artifact_json(artifact: &LatestArtifact) -> Result<String> {
    serde_json::to_string_pretty(artifact).context("Failed to serialize latest artifact")
}

/// Write `latest_<PAIR>_h7.json` and `.csv` into `dir`.
pub fn write_latest_artifacts(dir: &Path, artifact: &LatestArtifact) -> Result<(PathBuf, PathBuf)> {
    let stem = latest_file_stem(&artifact.pair);
    let json_path = dir.join(format!("{stem}.json"));
    let csv_path = dir.join(format!("{stem}.csv"));

    let json = artifact_json(artifact)?;
    write_atomic(&json_path, json.as_bytes())
        .with_context(|| format!("Failed to write {}", json_path.display()))?;
    write_atomic(&csv_path, &csv_bytes(artifact)?)
        .with_context(|| format!("Failed to write {}", csv_path.display()))?;
    Ok((json_path, csv_path))
}

/// Build and write artifacts for every pair in a decision parquet. Series
/// ids that do not map to a CAD pair are skipped with a warning.
pub fn build_all_latest(
    predictions_path: &Path,
    target_dir: &Path,
    sha: &str,
    limit_rows: usize,
    threshold: f64,
    generated_at: DateTime<Utc>,
) -> Result<Vec<(PathBuf, PathBuf)>> {
    let rows = read_predictions(predictions_path)
        .with_context(|| format!("Failed to read {}", predictions_path.display()))?;

    let mut by_series: BTreeMap<&str, Vec<PredictionRow>> = BTreeMap::new();
    for row in &rows {
        by_series.entry(row.series_id.as_str()).or_default().push(row.clone());
    }

    let mut written = Vec::with_capacity(by_series.len());
    for (series_id, series_rows) in &by_series {
        let Some(pair) = series_id_to_pair(series_id) else {
            tracing::warn!(%series_id, "skipping series without a CAD pair");
            continue;
        };
        let artifact =
            build_latest_for_series(series_rows, sha, &pair, limit_rows, threshold, generated_at)?;
        let paths = write_latest_artifacts(target_dir, &artifact)?;
        if !paths.0.is_file() || !paths.1.is_file() {
            bail!("latest artifacts for {pair} were not created");
        }
        written.push(paths);
    }

    tracing::info!(
        generated = written.len(),
        dir = %target_dir.display(),
        "wrote latest artifacts"
    );
    Ok(written)
}

/// Read side of the latest directory, with parsed artifacts cached for `ttl`.
pub struct LatestReader<C: Clock = SystemClock> {
    dir: PathBuf,
    cache: TtlCache<LatestArtifact, C>,
}

impl LatestReader<SystemClock> {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::with_clock(dir, ttl, SystemClock)
    }
}

impl<C: Clock> LatestReader<C> {
    pub fn with_clock(dir: impl Into<PathBuf>, ttl: Duration, clock: C) -> Self {
        Self {
            dir: dir.into(),
            cache: TtlCache::with_clock(ttl, clock),
        }
    }

    /// Artifact for `pair` (e.g. `USD_CAD`).
    pub fn artifact(&self, pair: &str) -> Result<LatestArtifact> {
        self.cache.get_or_try_insert_with(pair, || {
            let path = self.dir.join(format!("{}.json", latest_file_stem(pair)));
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("No latest artifact at {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("Malformed {}", path.display()))
        })
    }

    /// Pairs with a JSON artifact on disk, sorted.
    pub fn pairs(&self) -> Result<Vec<String>> {
        let prefix = "latest_";
        let suffix = format!("_{HORIZON_TAG}.json");
        let mut pairs: Vec<String> = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter_map(|name| {
                name.strip_prefix(prefix)
                    .and_then(|rest| rest.strip_suffix(suffix.as_str()))
                    .map(str::to_string)
            })
            .collect();
        pairs.sort();
        Ok(pairs)
    }
}
