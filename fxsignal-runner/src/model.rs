//! Model artifacts: discovery, feature spec, and the logistic classifier.
//!
//! An artifact directory holds three JSON files:
//! - the model (`logreg_h7_global.json`, `logreg_h7.json`, `model.json`,
//!   or a single `logreg_*.json`)
//! - the feature spec (`features_h7.json`, `features_h7_global.json`, or a
//!   single `features_*.json`)
//! - free-form metadata (`metadata_h7.json`, `metadata_h7_global.json`, or
//!   a single `metadata_*.json`)

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{kind} file not found in {dir}; tried: {tried}")]
    NotFound {
        kind: &'static str,
        dir: String,
        tried: String,
    },

    #[error("multiple {kind} files found in {dir}: [{}]", .candidates.join(", "))]
    Ambiguous {
        kind: &'static str,
        dir: String,
        candidates: Vec<String>,
    },

    #[error("failed to read {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("malformed {path}: {reason}")]
    Malformed { path: String, reason: String },

    #[error("feature spec does not match model inputs: missing [{}], unexpected [{}]",
        .missing.join(", "), .unexpected.join(", "))]
    InputMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("feature matrix lacks column \"{0}\"")]
    MissingColumn(String),
}

// ── Discovery ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Model,
    Features,
    Metadata,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Model => "model",
            ArtifactKind::Features => "features",
            ArtifactKind::Metadata => "metadata",
        }
    }

    fn candidates(&self) -> &'static [&'static str] {
        match self {
            ArtifactKind::Model => &["logreg_h7_global.json", "logreg_h7.json", "model.json"],
            ArtifactKind::Features => &["features_h7.json", "features_h7_global.json"],
            ArtifactKind::Metadata => &["metadata_h7.json", "metadata_h7_global.json"],
        }
    }

    fn fallback_prefix(&self) -> &'static str {
        match self {
            ArtifactKind::Model => "logreg_",
            ArtifactKind::Features => "features_",
            ArtifactKind::Metadata => "metadata_",
        }
    }
}

/// Locate one artifact in `dir`: the fixed candidates in order, then a
/// single `<prefix>*.json`.
pub fn find_artifact(dir: &Path, kind: ArtifactKind) -> Result<PathBuf, ModelError> {
    for name in kind.candidates() {
        let path = dir.join(name);
        if path.is_file() {
            return Ok(path);
        }
    }

    let entries = std::fs::read_dir(dir).map_err(|e| ModelError::Io {
        path: dir.display().to_string(),
        reason: e.to_string(),
    })?;
    let mut matches: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| name.starts_with(kind.fallback_prefix()) && name.ends_with(".json"))
        .collect();
    matches.sort();

    match matches.len() {
        0 => Err(ModelError::NotFound {
            kind: kind.as_str(),
            dir: dir.display().to_string(),
            tried: format!("{}, {}*.json", kind.candidates().join(", "), kind.fallback_prefix()),
        }),
        1 => Ok(dir.join(&matches[0])),
        _ => Err(ModelError::Ambiguous {
            kind: kind.as_str(),
            dir: dir.display().to_string(),
            candidates: matches,
        }),
    }
}

/// Explicit file names that bypass discovery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArtifactNames {
    pub model: Option<PathBuf>,
    pub features: Option<PathBuf>,
    pub metadata: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub model: PathBuf,
    pub features: PathBuf,
    pub metadata: PathBuf,
}

impl ArtifactPaths {
    /// Resolve all three files. Relative explicit names are taken inside `dir`.
    pub fn locate(dir: &Path, names: &ArtifactNames) -> Result<Self, ModelError> {
        let resolve = |explicit: &Option<PathBuf>, kind: ArtifactKind| match explicit {
            Some(name) => {
                let path = if name.is_absolute() { name.clone() } else { dir.join(name) };
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(ModelError::NotFound {
                        kind: kind.as_str(),
                        dir: dir.display().to_string(),
                        tried: path.display().to_string(),
                    })
                }
            }
            None => find_artifact(dir, kind),
        };
        Ok(Self {
            dir: dir.to_path_buf(),
            model: resolve(&names.model, ArtifactKind::Model)?,
            features: resolve(&names.features, ArtifactKind::Features)?,
            metadata: resolve(&names.metadata, ArtifactKind::Metadata)?,
        })
    }

    /// The three files in manifest order.
    pub fn files(&self) -> [&Path; 3] {
        [&self.model, &self.features, &self.metadata]
    }
}

// ── Feature spec ─────────────────────────────────────────────────────

/// Feature spec as found on disk: a bare list of numeric names, or the split
/// form with categorical columns.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RawFeatureSpec {
    Legacy(Vec<String>),
    Split {
        #[serde(default)]
        categorical: Vec<String>,
        numeric: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub categorical: Vec<String>,
    pub numeric: Vec<String>,
}

impl From<RawFeatureSpec> for FeatureSpec {
    fn from(raw: RawFeatureSpec) -> Self {
        match raw {
            RawFeatureSpec::Legacy(numeric) => Self {
                categorical: Vec::new(),
                numeric,
            },
            RawFeatureSpec::Split {
                categorical,
                numeric,
            } => Self {
                categorical,
                numeric,
            },
        }
    }
}

impl FeatureSpec {
    /// Selected columns: categorical first, then numeric.
    pub fn columns(&self) -> Vec<String> {
        self.categorical.iter().chain(&self.numeric).cloned().collect()
    }
}

// ── Metadata ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelMetadata(pub serde_json::Value);

impl ModelMetadata {
    fn field(&self, name: &str) -> Option<String> {
        match self.0.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn version(&self) -> Option<String> {
        self.field("version")
    }

    pub fn horizon(&self) -> Option<String> {
        self.field("horizon")
    }
}

// ── Classifier ───────────────────────────────────────────────────────

/// Column-major inputs for one series, named as the model expects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureMatrix {
    pub rows: usize,
    pub categorical: Vec<(String, Vec<String>)>,
    pub numeric: Vec<(String, Vec<f64>)>,
}

impl FeatureMatrix {
    pub fn numeric(&self, name: &str) -> Option<&[f64]> {
        self.numeric
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn categorical(&self, name: &str) -> Option<&[String]> {
        self.categorical
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }
}

/// A binary classifier producing P(class 1) per row.
pub trait Classifier: Send + Sync {
    /// Every column the model reads.
    fn input_columns(&self) -> Vec<String>;

    fn predict_proba(&self, inputs: &FeatureMatrix) -> Result<Vec<f64>, ModelError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumericTerm {
    pub name: String,
    /// Standard-scaler centre.
    pub mean: f64,
    /// Standard-scaler scale; zero is treated as one.
    pub scale: f64,
    pub coef: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CategoricalTerm {
    pub name: String,
    /// One-hot coefficient per known level. Unknown levels contribute zero.
    pub levels: BTreeMap<String, f64>,
}

/// Logistic regression over standardised numeric and one-hot categorical
/// inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogisticModel {
    pub intercept: f64,
    #[serde(default)]
    pub categorical: Vec<CategoricalTerm>,
    pub numeric: Vec<NumericTerm>,
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

impl LogisticModel {
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let model: Self = read_json(path)?;
        model.check(path)?;
        Ok(model)
    }

    fn check(&self, path: &Path) -> Result<(), ModelError> {
        let malformed = |reason: String| ModelError::Malformed {
            path: path.display().to_string(),
            reason,
        };
        if !self.intercept.is_finite() {
            return Err(malformed("intercept is not finite".into()));
        }
        let mut names = BTreeSet::new();
        for term in &self.numeric {
            if !(term.mean.is_finite() && term.scale.is_finite() && term.coef.is_finite()) {
                return Err(malformed(format!("non-finite parameter for {}", term.name)));
            }
            if !names.insert(term.name.as_str()) {
                return Err(malformed(format!("duplicate input {}", term.name)));
            }
        }
        for term in &self.categorical {
            if term.levels.values().any(|c| !c.is_finite()) {
                return Err(malformed(format!("non-finite level coefficient for {}", term.name)));
            }
            if !names.insert(term.name.as_str()) {
                return Err(malformed(format!("duplicate input {}", term.name)));
            }
        }
        Ok(())
    }
}

impl Classifier for LogisticModel {
    fn input_columns(&self) -> Vec<String> {
        self.categorical
            .iter()
            .map(|t| t.name.clone())
            .chain(self.numeric.iter().map(|t| t.name.clone()))
            .collect()
    }

    fn predict_proba(&self, inputs: &FeatureMatrix) -> Result<Vec<f64>, ModelError> {
        let mut z = vec![self.intercept; inputs.rows];

        for term in &self.numeric {
            let column = inputs
                .numeric(&term.name)
                .ok_or_else(|| ModelError::MissingColumn(term.name.clone()))?;
            let scale = if term.scale == 0.0 { 1.0 } else { term.scale };
            for (acc, x) in z.iter_mut().zip(column) {
                *acc += term.coef * (x - term.mean) / scale;
            }
        }
        for term in &self.categorical {
            let column = inputs
                .categorical(&term.name)
                .ok_or_else(|| ModelError::MissingColumn(term.name.clone()))?;
            for (acc, level) in z.iter_mut().zip(column) {
                *acc += term.levels.get(level).copied().unwrap_or(0.0);
            }
        }

        Ok(z.into_iter().map(sigmoid).collect())
    }
}

// ── Loading ──────────────────────────────────────────────────────────

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let bytes = std::fs::read(path).map_err(|e| ModelError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ModelError::Malformed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Everything inference needs from an artifact directory.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub paths: ArtifactPaths,
    pub spec: FeatureSpec,
    pub metadata: ModelMetadata,
    pub model: LogisticModel,
}

/// Locate and load the artifacts, then check the feature spec names exactly
/// the columns the model reads.
pub fn load_model_artifacts(dir: &Path, names: &ArtifactNames) -> Result<LoadedModel, ModelError> {
    let paths = ArtifactPaths::locate(dir, names)?;
    let model = LogisticModel::load(&paths.model)?;
    let raw: RawFeatureSpec = read_json(&paths.features)?;
    let spec = FeatureSpec::from(raw);
    let metadata: ModelMetadata = read_json(&paths.metadata)?;

    check_inputs(&spec, &model)?;

    tracing::info!(
        model = %paths.model.display(),
        version = metadata.version().as_deref().unwrap_or("unknown"),
        categorical = spec.categorical.len(),
        numeric = spec.numeric.len(),
        "loaded model artifacts"
    );
    Ok(LoadedModel {
        paths,
        spec,
        metadata,
        model,
    })
}

/// The spec's columns and the model's inputs must be the same set.
pub fn check_inputs(spec: &FeatureSpec, model: &dyn Classifier) -> Result<(), ModelError> {
    let wanted: BTreeSet<String> = model.input_columns().into_iter().collect();
    let selected: BTreeSet<String> = spec.columns().into_iter().collect();
    let missing: Vec<String> = wanted.difference(&selected).cloned().collect();
    let unexpected: Vec<String> = selected.difference(&wanted).cloned().collect();
    if missing.is_empty() && unexpected.is_empty() {
        Ok(())
    } else {
        Err(ModelError::InputMismatch {
            missing,
            unexpected,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    fn tiny_model() -> LogisticModel {
        LogisticModel {
            intercept: 0.0,
            categorical: vec![CategoricalTerm {
                name: "series_id".into(),
                levels: BTreeMap::from([("FXUSDCAD".to_string(), 1.0)]),
            }],
            numeric: vec![NumericTerm {
                name: "ret_1d".into(),
                mean: 0.0,
                scale: 0.5,
                coef: 2.0,
            }],
        }
    }

    #[test]
    fn candidates_win_in_order() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "model.json", "{}");
        touch(dir.path(), "logreg_h7.json", "{}");
        let found = find_artifact(dir.path(), ArtifactKind::Model).unwrap();
        assert_eq!(found.file_name().unwrap(), "logreg_h7.json");
    }

    #[test]
    fn single_fallback_match_is_used() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "features_v3.json", "[]");
        let found = find_artifact(dir.path(), ArtifactKind::Features).unwrap();
        assert_eq!(found.file_name().unwrap(), "features_v3.json");
    }

    #[test]
    fn ambiguous_fallback_names_every_candidate() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "metadata_a.json", "{}");
        touch(dir.path(), "metadata_b.json", "{}");
        let err = find_artifact(dir.path(), ArtifactKind::Metadata).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("metadata_a.json") && msg.contains("metadata_b.json"), "{msg}");
    }

    #[test]
    fn nothing_found_lists_what_was_tried() {
        let dir = TempDir::new().unwrap();
        let err = find_artifact(dir.path(), ArtifactKind::Model).unwrap_err();
        assert!(err.to_string().contains("logreg_h7_global.json"));
    }

    #[test]
    fn explicit_name_must_exist() {
        let dir = TempDir::new().unwrap();
        let names = ArtifactNames {
            model: Some("custom.json".into()),
            ..ArtifactNames::default()
        };
        assert!(matches!(
            ArtifactPaths::locate(dir.path(), &names),
            Err(ModelError::NotFound { kind: "model", .. })
        ));
    }

    #[test]
    fn both_feature_spec_shapes_normalize() {
        let legacy: RawFeatureSpec = serde_json::from_str(r#"["value", "ret_1d"]"#).unwrap();
        let spec = FeatureSpec::from(legacy);
        assert!(spec.categorical.is_empty());
        assert_eq!(spec.numeric, vec!["value", "ret_1d"]);

        let split: RawFeatureSpec =
            serde_json::from_str(r#"{"categorical": ["series_id"], "numeric": ["ret_1d"]}"#).unwrap();
        let spec = FeatureSpec::from(split);
        assert_eq!(spec.columns(), vec!["series_id", "ret_1d"]);
    }

    #[test]
    fn predict_proba_applies_scaler_and_one_hot() {
        let model = tiny_model();
        let inputs = FeatureMatrix {
            rows: 3,
            categorical: vec![(
                "series_id".into(),
                vec!["FXUSDCAD".into(), "FXEURCAD".into(), "FXEURCAD".into()],
            )],
            numeric: vec![("ret_1d".into(), vec![0.0, 0.0, -0.25])],
        };
        let p = model.predict_proba(&inputs).unwrap();
        assert!((p[0] - sigmoid(1.0)).abs() < 1e-12);
        assert!((p[1] - 0.5).abs() < 1e-12);
        assert!((p[2] - sigmoid(-1.0)).abs() < 1e-12);
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(1000.0), 1.0);
        assert_eq!(sigmoid(-1000.0), 0.0);
        assert!(sigmoid(-1000.0).is_finite());
    }

    #[test]
    fn mismatched_spec_is_rejected() {
        let spec = FeatureSpec {
            categorical: vec![],
            numeric: vec!["ret_1d".into(), "vol_5d".into()],
        };
        match check_inputs(&spec, &tiny_model()) {
            Err(ModelError::InputMismatch { missing, unexpected }) => {
                assert_eq!(missing, vec!["series_id"]);
                assert_eq!(unexpected, vec!["vol_5d"]);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn load_full_directory() {
        let dir = TempDir::new().unwrap();
        touch(
            dir.path(),
            "logreg_h7_global.json",
            &serde_json::to_string(&tiny_model()).unwrap(),
        );
        touch(
            dir.path(),
            "features_h7.json",
            r#"{"categorical": ["series_id"], "numeric": ["ret_1d"]}"#,
        );
        touch(dir.path(), "metadata_h7.json", r#"{"version": 3, "horizon": "h7"}"#);

        let loaded = load_model_artifacts(dir.path(), &ArtifactNames::default()).unwrap();
        assert_eq!(loaded.metadata.version().as_deref(), Some("3"));
        assert_eq!(loaded.metadata.horizon().as_deref(), Some("h7"));
        assert_eq!(loaded.model.input_columns(), vec!["series_id", "ret_1d"]);
    }

    #[test]
    fn non_finite_parameters_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(
            &path,
            r#"{"intercept": 0.0, "numeric": [{"name": "a", "mean": 0.0, "scale": 1.0, "coef": 1e400}]}"#,
        )
        .unwrap();
        // 1e400 overflows to an error in serde_json, which is also malformed.
        assert!(matches!(LogisticModel::load(&path), Err(ModelError::Malformed { .. })));
    }
}
