//! Pipeline configuration.
//!
//! Loaded from TOML. Unknown keys are rejected at every level and the
//! loaded value is validated before anything else runs.

use fxsignal_core::data::keys::DEFAULT_SOURCE;
use fxsignal_core::domain::HORIZON_TAG;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::inference::SeriesInput;
use crate::model::ArtifactNames;

pub const PIPELINE_TIMEZONE: &str = "America/Toronto";

/// File name of a gold series inside its local directory.
pub const GOLD_FILE: &str = "data.parquet";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse config {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_threshold() -> f64 {
    0.6
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

fn default_gold_key_template() -> String {
    "gold/source={source}/series={series_id}/data.parquet".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    pub horizon: String,
    pub timezone: String,
    /// Decision threshold; must lie strictly inside (0.5, 1.0).
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    pub series: Vec<SeriesConfig>,
    pub storage: StorageConfig,
    pub artifacts: ArtifactsConfig,
    pub outputs: OutputsConfig,
    #[serde(default)]
    pub publish: Option<PublishConfig>,
    #[serde(default)]
    pub notify: Option<NotifyConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SeriesConfig {
    pub series_id: String,
    /// Directory holding the series' local gold file.
    pub gold_local_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Root of the object store holding bronze, silver and gold.
    pub root: PathBuf,
    #[serde(default = "default_source")]
    pub source: String,
    /// Object key of a gold series; `{series_id}` and `{source}` are filled in.
    #[serde(default = "default_gold_key_template")]
    pub gold_key_template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
    /// Explicit file names inside `dir`. When unset, the file is discovered.
    #[serde(default)]
    pub model_file: Option<String>,
    #[serde(default)]
    pub features_file: Option<String>,
    #[serde(default)]
    pub metadata_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputsConfig {
    pub runs_dir: PathBuf,
    pub latest_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PublishConfig {
    /// Root of the object store receiving published outputs.
    pub root: PathBuf,
    /// Prefix for one run; `{horizon}` and `{run_date}` are filled in.
    pub prefix_runs_template: String,
    /// Prefix for the latest outputs; `{horizon}` is filled in.
    pub prefix_latest: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NotifyConfig {
    /// Subject line; `{horizon}` and `{run_date}` are filled in.
    pub subject_template: String,
    /// Directory the outbox writes rendered messages to.
    pub outbox_dir: PathBuf,
    pub sender: String,
    pub recipients: Vec<String>,
}

/// Replace each `{name}` in `template` with its value.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("{{{name}}}"), value)
    })
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        tracing::debug!(path = %path.display(), series = config.series.len(), "loaded pipeline config");
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.horizon != HORIZON_TAG {
            return Err(ConfigError::Invalid(format!(
                "horizon must be \"{HORIZON_TAG}\", got \"{}\"",
                self.horizon
            )));
        }
        if self.timezone != PIPELINE_TIMEZONE {
            return Err(ConfigError::Invalid(format!(
                "timezone must be \"{PIPELINE_TIMEZONE}\", got \"{}\"",
                self.timezone
            )));
        }
        if !(self.threshold > 0.5 && self.threshold < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "threshold must be in (0.5, 1.0), got {}",
                self.threshold
            )));
        }
        if self.series.is_empty() {
            return Err(ConfigError::Invalid("series list is empty".into()));
        }
        let mut seen = BTreeSet::new();
        for s in &self.series {
            if s.series_id.trim().is_empty() {
                return Err(ConfigError::Invalid("series_id must not be empty".into()));
            }
            if !seen.insert(s.series_id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate series_id \"{}\"",
                    s.series_id
                )));
            }
        }
        if self.storage.source.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.source must not be empty".into()));
        }
        if !self.storage.gold_key_template.contains("{series_id}") {
            return Err(ConfigError::Invalid(
                "storage.gold_key_template must contain {series_id}".into(),
            ));
        }
        if let Some(publish) = &self.publish {
            if !publish.prefix_runs_template.contains("{run_date}") {
                return Err(ConfigError::Invalid(
                    "publish.prefix_runs_template must contain {run_date}".into(),
                ));
            }
            for (name, prefix) in [
                ("prefix_runs_template", &publish.prefix_runs_template),
                ("prefix_latest", &publish.prefix_latest),
            ] {
                if !prefix.ends_with('/') {
                    return Err(ConfigError::Invalid(format!(
                        "publish.{name} must end with '/'"
                    )));
                }
            }
        }
        if let Some(notify) = &self.notify {
            if notify.recipients.is_empty() {
                return Err(ConfigError::Invalid("notify.recipients is empty".into()));
            }
            if notify.sender.trim().is_empty() {
                return Err(ConfigError::Invalid("notify.sender must not be empty".into()));
            }
        }
        Ok(())
    }

    pub fn series_ids(&self) -> Vec<String> {
        self.series.iter().map(|s| s.series_id.clone()).collect()
    }

    /// Object key of the gold file for `series_id`.
    pub fn gold_key_for(&self, series_id: &str) -> String {
        render_template(
            &self.storage.gold_key_template,
            &[("series_id", series_id), ("source", &self.storage.source)],
        )
    }

    /// Series with the local gold file each one is scored from.
    pub fn series_inputs(&self) -> Vec<SeriesInput> {
        self.series
            .iter()
            .map(|s| SeriesInput {
                series_id: s.series_id.clone(),
                gold_path: s.gold_local_path.join(GOLD_FILE),
            })
            .collect()
    }

    /// Explicit artifact file names from `[artifacts]`.
    pub fn artifact_names(&self) -> ArtifactNames {
        ArtifactNames {
            model: self.artifacts.model_file.as_ref().map(PathBuf::from),
            features: self.artifacts.features_file.as_ref().map(PathBuf::from),
            metadata: self.artifacts.metadata_file.as_ref().map(PathBuf::from),
        }
    }

    pub fn run_dir(&self, run_date: &str) -> PathBuf {
        self.outputs.runs_dir.join(run_date)
    }
}
