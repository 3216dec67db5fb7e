//! Run notification: a plain-text signal summary handed to a [`Notifier`].
//!
//! The body is rendered from the promoted `latest` directory only, so what
//! subscribers read is exactly what was promoted.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use fxsignal_core::domain::{CurrencyPair, Direction};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::{render_template, NotifyConfig};
use crate::inference::{read_predictions, write_atomic, PREDICTIONS_FILE};
use crate::manifest::{read_manifest, MANIFEST_FILE};

const RULE_WIDTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub sender: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

impl Notification {
    /// RFC 822 style text.
    pub fn render(&self) -> String {
        format!(
            "From: {}\nTo: {}\nSubject: {}\n\n{}\n",
            self.sender,
            self.recipients.join(", "),
            self.subject,
            self.body
        )
    }
}

/// Delivery of a rendered notification.
pub trait Notifier {
    /// Returns a delivery reference (path, message id).
    fn send(&self, message: &Notification) -> Result<String>;
}

/// Writes each message as a text file into a directory, named by content
/// hash so resending the same message is idempotent.
#[derive(Debug, Clone)]
pub struct FileOutbox {
    dir: PathBuf,
}

impl FileOutbox {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Notifier for FileOutbox {
    fn send(&self, message: &Notification) -> Result<String> {
        let text = message.render();
        let digest = hex::encode(Sha256::digest(text.as_bytes()));
        let path = self.dir.join(format!("message_{}.txt", &digest[..16]));
        write_atomic(&path, text.as_bytes())
            .with_context(|| format!("Failed to write outbox message {}", path.display()))?;
        tracing::info!(path = %path.display(), recipients = message.recipients.len(), "queued notification");
        Ok(path.display().to_string())
    }
}

/// Publish locations shown in the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishInfo {
    pub store: String,
    pub runs_prefix: String,
    pub latest_prefix: String,
}

pub fn build_subject(template: &str, horizon: &str, run_date: &str) -> String {
    render_template(template, &[("horizon", horizon), ("run_date", run_date)])
}

fn horizon_display(horizon: &str) -> String {
    match horizon {
        "h7" => "7-Day".to_string(),
        "h14" => "14-Day".to_string(),
        "h30" => "30-Day".to_string(),
        other => other.to_uppercase(),
    }
}

fn pair_display(series_id: &str) -> String {
    CurrencyPair::from_series_id(series_id)
        .map(|p| p.to_string())
        .unwrap_or_else(|| series_id.to_string())
}

/// Reader-facing signal name and a coarse confidence bucket.
pub fn signal_description(action: Direction, p_up: f64) -> (&'static str, &'static str) {
    let signal = match action {
        Direction::Up => "Bullish",
        Direction::Down => "Bearish",
        Direction::Sideways => return ("Neutral", "Low"),
    };
    let score = (p_up - 0.5).abs() * 2.0;
    let confidence = if score >= 0.4 {
        "High"
    } else if score >= 0.2 {
        "Moderate"
    } else {
        "Low"
    };
    (signal, confidence)
}

fn indicator(action: Direction) -> &'static str {
    match action {
        Direction::Up => "▲",
        Direction::Down => "▼",
        Direction::Sideways => "◆",
    }
}

struct LatestSignal {
    series_id: String,
    obs_date: NaiveDate,
    p_up: f64,
    action: Direction,
}

/// Most recent row per series, sorted by series id.
fn latest_signals(predictions: &Path) -> Result<Vec<LatestSignal>> {
    let rows = read_predictions(predictions)
        .with_context(|| format!("Cannot build notification without {}", predictions.display()))?;
    let mut latest: BTreeMap<String, LatestSignal> = BTreeMap::new();
    for row in rows {
        let newer = latest
            .get(&row.series_id)
            .map_or(true, |cur| row.obs_date > cur.obs_date);
        if newer {
            latest.insert(
                row.series_id.clone(),
                LatestSignal {
                    series_id: row.series_id,
                    obs_date: row.obs_date,
                    p_up: row.p_up,
                    action: row.action,
                },
            );
        }
    }
    Ok(latest.into_values().collect())
}

fn rule(ch: char) -> String {
    ch.to_string().repeat(RULE_WIDTH)
}

fn percent(p: f64) -> String {
    format!("{:.1}%", p * 100.0)
}

/// Model version recorded in the metadata file the manifest points at.
fn model_version(manifest_files: &BTreeMap<String, crate::manifest::FileEntry>) -> Option<String> {
    let (_, entry) = manifest_files.iter().find(|(name, _)| name.contains("metadata"))?;
    let text = std::fs::read_to_string(&entry.path).ok()?;
    let meta: crate::model::ModelMetadata = serde_json::from_str(&text).ok()?;
    meta.version()
}

/// Plain-text body from the promoted latest directory.
pub fn build_body(
    horizon: &str,
    run_date: &str,
    latest_dir: &Path,
    publish: Option<&PublishInfo>,
) -> Result<String> {
    let signals = latest_signals(&latest_dir.join(PREDICTIONS_FILE))?;
    let manifest_path = latest_dir.join(MANIFEST_FILE);
    let manifest = if manifest_path.is_file() {
        Some(read_manifest(&manifest_path)?)
    } else {
        None
    };

    let horizon_label = horizon_display(horizon);
    let readable_date = NaiveDate::parse_from_str(run_date, "%Y-%m-%d")
        .map(|d| d.format("%B %d, %Y").to_string())
        .unwrap_or_else(|_| run_date.to_string());

    let mut lines = vec![
        rule('═'),
        format!("  FX FORECAST SIGNALS - {horizon_label} Horizon"),
        format!("  Generated: {readable_date}"),
        rule('═'),
        String::new(),
        "TODAY'S SIGNALS".to_string(),
        rule('─'),
        String::new(),
    ];

    for s in &signals {
        let (signal, confidence) = signal_description(s.action, s.p_up);
        lines.push(format!("  {} {}", indicator(s.action), pair_display(&s.series_id)));
        lines.push(format!("    Signal: {signal}"));
        lines.push(format!("    Probability: {}", percent(s.p_up)));
        lines.push(format!("    Confidence: {confidence}"));
        lines.push(format!("    Action: {}", s.action));
        lines.push(format!("    As of: {}", s.obs_date.format("%Y-%m-%d")));
        lines.push(String::new());
    }

    lines.push(rule('─'));
    lines.push("QUICK REFERENCE".to_string());
    lines.push(rule('─'));
    lines.push(String::new());
    lines.push("  Pair         Signal      Prob.    Action".to_string());
    lines.push(format!("  {}", "─".repeat(44)));
    for s in &signals {
        let (signal, _) = signal_description(s.action, s.p_up);
        lines.push(format!(
            "  {:<12} {:<11} {:<8} {}",
            pair_display(&s.series_id),
            signal,
            percent(s.p_up),
            s.action
        ));
    }
    lines.push(String::new());

    lines.push(rule('─'));
    lines.push("TECHNICAL DETAILS".to_string());
    lines.push(rule('─'));
    lines.push(String::new());
    lines.push(format!("  Forecast horizon: {horizon_label}"));
    if let Some(manifest) = &manifest {
        if let Some(version) = model_version(&manifest.model_artifacts.files) {
            lines.push(format!("  Model version: {version}"));
        }
        for (series_id, count) in &manifest.predictions.by_series_rows {
            lines.push(format!("  {}: {count} scored dates", pair_display(series_id)));
        }
    }
    if let Some(info) = publish {
        lines.push(String::new());
        lines.push(format!("  Run outputs: {}/{}", info.store, info.runs_prefix));
        lines.push(format!("  Data available at: {}/{}", info.store, info.latest_prefix));
    }
    lines.push(String::new());
    lines.push(rule('═'));
    lines.push("  This is an automated forecast from the FX pipeline.".to_string());
    lines.push("  Not financial advice.".to_string());
    lines.push(rule('═'));

    Ok(lines.join("\n"))
}

/// Subject and body for a run, addressed per `cfg`.
pub fn build_notification(
    cfg: &NotifyConfig,
    horizon: &str,
    run_date: &str,
    latest_dir: &Path,
    publish: Option<&PublishInfo>,
) -> Result<Notification> {
    Ok(Notification {
        sender: cfg.sender.clone(),
        recipients: cfg.recipients.clone(),
        subject: build_subject(&cfg.subject_template, horizon, run_date),
        body: build_body(horizon, run_date, latest_dir, publish)?,
    })
}
