//! Run manifest: what went into a run and what came out, with content hashes.
//!
//! Serialized with sorted keys and two-space indentation so two runs over the
//! same inputs differ only in the timestamp fields.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use fxsignal_core::data::parquet::{from_parquet_bytes, read_dates};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::config::PIPELINE_TIMEZONE;
use crate::inference::{read_predictions, write_atomic, SeriesInput};
use crate::model::ArtifactPaths;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldInputEntry {
    pub series_id: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
    pub min_obs_date: Option<NaiveDate>,
    pub max_obs_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifactsEntry {
    pub dir: String,
    /// Keyed by file name.
    pub files: BTreeMap<String, FileEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionsEntry {
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub rows: usize,
    pub min_obs_date: Option<NaiveDate>,
    pub max_obs_date: Option<NaiveDate>,
    pub by_series_rows: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_date: String,
    pub run_timestamp: String,
    pub timezone: String,
    pub git_sha: String,
    pub tool_version: String,
    pub gold_inputs: Vec<GoldInputEntry>,
    pub model_artifacts: ModelArtifactsEntry,
    pub predictions: PredictionsEntry,
}

pub struct ManifestInputs<'a> {
    pub run_date: &'a str,
    pub run_timestamp: &'a str,
    pub git_sha: &'a str,
    pub gold_inputs: &'a [SeriesInput],
    pub artifacts: &'a ArtifactPaths,
    pub predictions_path: &'a Path,
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn file_entry(path: &Path) -> Result<FileEntry> {
    let bytes = std::fs::metadata(path)
        .with_context(|| format!("File not found: {}", path.display()))?
        .len();
    Ok(FileEntry {
        path: path.display().to_string(),
        sha256: sha256_file(path)?,
        bytes,
    })
}

/// Row count and obs_date range of a parquet file with an `obs_date` column.
fn obs_date_range(path: &Path) -> Result<(usize, Option<NaiveDate>, Option<NaiveDate>)> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let df = from_parquet_bytes(&bytes).with_context(|| format!("Failed to decode {}", path.display()))?;
    let dates = read_dates(&df, "obs_date")
        .with_context(|| format!("Column 'obs_date' unreadable in {}", path.display()))?;
    Ok((
        dates.len(),
        dates.iter().min().copied(),
        dates.iter().max().copied(),
    ))
}

/// Commit of the working tree, `unknown` outside a git checkout.
pub fn git_sha() -> String {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output();
    match output {
        Ok(out) if out.status.success() => {
            let sha = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if sha.is_empty() {
                "unknown".to_string()
            } else {
                sha
            }
        }
        Ok(out) => {
            tracing::warn!(stderr = %String::from_utf8_lossy(&out.stderr).trim(), "git rev-parse HEAD failed");
            "unknown".to_string()
        }
        Err(e) => {
            tracing::warn!(error = %e, "git not available");
            "unknown".to_string()
        }
    }
}

pub fn build_run_manifest(inputs: &ManifestInputs<'_>) -> Result<RunManifest> {
    let mut gold_sorted: Vec<&SeriesInput> = inputs.gold_inputs.iter().collect();
    gold_sorted.sort_by(|a, b| a.series_id.cmp(&b.series_id));

    let mut gold_inputs = Vec::with_capacity(gold_sorted.len());
    for input in gold_sorted {
        let entry = file_entry(&input.gold_path)?;
        let (rows, min_obs_date, max_obs_date) = obs_date_range(&input.gold_path)?;
        gold_inputs.push(GoldInputEntry {
            series_id: input.series_id.clone(),
            path: entry.path,
            sha256: entry.sha256,
            bytes: entry.bytes,
            rows,
            min_obs_date,
            max_obs_date,
        });
    }

    let mut files = BTreeMap::new();
    for path in inputs.artifacts.files() {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        files.insert(name, file_entry(path)?);
    }

    let rows = read_predictions(inputs.predictions_path).with_context(|| {
        format!("Failed to read predictions {}", inputs.predictions_path.display())
    })?;
    let summary = crate::inference::summarize(&rows);
    let pred_file = file_entry(inputs.predictions_path)?;

    Ok(RunManifest {
        run_date: inputs.run_date.to_string(),
        run_timestamp: inputs.run_timestamp.to_string(),
        timezone: PIPELINE_TIMEZONE.to_string(),
        git_sha: inputs.git_sha.to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        gold_inputs,
        model_artifacts: ModelArtifactsEntry {
            dir: inputs.artifacts.dir.display().to_string(),
            files,
        },
        predictions: PredictionsEntry {
            path: pred_file.path,
            sha256: pred_file.sha256,
            bytes: pred_file.bytes,
            rows: summary.rows,
            min_obs_date: summary.min_obs_date,
            max_obs_date: summary.max_obs_date,
            by_series_rows: summary.by_series_rows,
        },
    })
}

/// Rebuild every object with its keys in sorted order.
pub fn canonicalize(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

pub fn manifest_json(manifest: &RunManifest) -> Result<String> {
    let value = serde_json::to_value(manifest).context("Failed to serialize run manifest")?;
    serde_json::to_string_pretty(&canonicalize(value)).context("Failed to render run manifest")
}

pub fn write_manifest(path: &Path, manifest: &RunManifest) -> Result<PathBuf> {
    let json = manifest_json(manifest)?;
    write_atomic(path, json.as_bytes())
        .with_context(|| format!("Failed to write manifest to {}", path.display()))?;
    Ok(path.to_path_buf())
}

pub fn read_manifest(path: &Path) -> Result<RunManifest> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Malformed manifest {}", path.display()))
}
