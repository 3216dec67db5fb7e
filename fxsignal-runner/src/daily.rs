//! The daily run: sync, score, record, promote, then optionally publish and
//! notify.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use fxsignal_core::data::{LocalStore, ObjectStore};
use fxsignal_core::domain::HORIZON_TAG;
use std::path::PathBuf;

use crate::config::PipelineConfig;
use crate::inference::{run_inference, InferenceOptions, InferenceSummary, PREDICTIONS_FILE};
use crate::manifest::{build_run_manifest, git_sha, write_manifest, ManifestInputs, MANIFEST_FILE};
use crate::model::load_model_artifacts;
use crate::notify::{build_notification, FileOutbox, Notifier, PublishInfo};
use crate::promotion::promote_to_latest;
use crate::publish::{publish_latest_outputs, publish_run_outputs};
use crate::run_date::{resolve_run_date, toronto_now_iso};
use crate::sync::sync_gold_from_config;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyOptions {
    /// `YYYY-MM-DD`; today in Toronto when unset.
    pub run_date: Option<String>,
    pub sync_gold: bool,
    pub publish: bool,
    pub notify: bool,
    /// Overrides `artifacts.dir`.
    pub models_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailyReport {
    pub run_date: String,
    pub run_dir: PathBuf,
    pub predictions: InferenceSummary,
    pub promoted: Vec<String>,
    pub published: Option<PublishInfo>,
    /// Delivery reference of the notification, when one was sent.
    pub notified: Option<String>,
}

impl DailyReport {
    /// `[OK] run_date=... promoted=...[ published=runs:...,latest:...][ emailed=true]`
    pub fn summary_line(&self) -> String {
        let mut line = format!(
            "[OK] run_date={} promoted={}",
            self.run_date,
            self.promoted.join(",")
        );
        if let Some(info) = &self.published {
            line.push_str(&format!(
                " published=runs:{},latest:{}",
                info.runs_prefix, info.latest_prefix
            ));
        }
        if self.notified.is_some() {
            line.push_str(" emailed=true");
        }
        line
    }
}

/// Targets of the publish and notify steps.
#[derive(Clone, Copy, Default)]
pub struct Delivery<'a> {
    pub publisher: Option<&'a dyn ObjectStore>,
    pub notifier: Option<&'a dyn Notifier>,
}

/// Run with the publish store and outbox named in the config.
pub fn run_daily(cfg: &PipelineConfig, opts: &DailyOptions, now: DateTime<Utc>) -> Result<DailyReport> {
    let store = cfg.publish.as_ref().map(|p| LocalStore::new(&p.root));
    let outbox = cfg.notify.as_ref().map(|n| FileOutbox::new(&n.outbox_dir));
    let delivery = Delivery {
        publisher: store.as_ref().map(|s| s as &dyn ObjectStore),
        notifier: outbox.as_ref().map(|o| o as &dyn Notifier),
    };
    run_daily_with(cfg, opts, now, delivery)
}

/// The daily run against caller-supplied delivery targets.
///
/// Steps stop at the first failure. Promotion happens before publishing, so a
/// failed publish leaves `latest/` updated and sends no notification.
pub fn run_daily_with(
    cfg: &PipelineConfig,
    opts: &DailyOptions,
    now: DateTime<Utc>,
    delivery: Delivery<'_>,
) -> Result<DailyReport> {
    if opts.publish && cfg.publish.is_none() {
        bail!("publish requested but the config has no [publish] section");
    }
    if opts.notify && cfg.notify.is_none() {
        bail!("notify requested but the config has no [notify] section");
    }
    if opts.publish && delivery.publisher.is_none() {
        bail!("publish requested but no publish store was provided");
    }
    if opts.notify && delivery.notifier.is_none() {
        bail!("notify requested but no notifier was provided");
    }

    let run_date = resolve_run_date(opts.run_date.as_deref(), now)?
        .format("%Y-%m-%d")
        .to_string();
    let run_timestamp = toronto_now_iso(now);
    let run_dir = cfg.run_dir(&run_date);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("Failed to create run directory {}", run_dir.display()))?;
    tracing::info!(%run_date, %run_timestamp, run_dir = %run_dir.display(), "daily run");

    if opts.sync_gold {
        let store = LocalStore::new(&cfg.storage.root);
        sync_gold_from_config(&store, cfg).context("Gold sync failed")?;
    }

    let models_dir = opts.models_dir.clone().unwrap_or_else(|| cfg.artifacts.dir.clone());
    let loaded = load_model_artifacts(&models_dir, &cfg.artifact_names())
        .with_context(|| format!("Failed to load model artifacts from {}", models_dir.display()))?;

    let inputs = cfg.series_inputs();
    let predictions_path = run_dir.join(PREDICTIONS_FILE);
    let predictions = run_inference(
        &inputs,
        &loaded.model,
        &loaded.spec,
        &predictions_path,
        InferenceOptions {
            threshold: cfg.threshold,
            dry_run: false,
        },
    )
    .context("Inference failed")?;

    let manifest = build_run_manifest(&ManifestInputs {
        run_date: &run_date,
        run_timestamp: &run_timestamp,
        git_sha: &git_sha(),
        gold_inputs: &inputs,
        artifacts: &loaded.paths,
        predictions_path: &predictions_path,
    })?;
    let manifest_path = write_manifest(&run_dir.join(MANIFEST_FILE), &manifest)?;

    let latest_dir = &cfg.outputs.latest_dir;
    promote_to_latest(
        latest_dir,
        &[(predictions_path, PREDICTIONS_FILE), (manifest_path, MANIFEST_FILE)],
    )
    .context("Promotion to latest failed")?;
    let promoted = vec![PREDICTIONS_FILE.to_string(), MANIFEST_FILE.to_string()];

    let published = match (&cfg.publish, delivery.publisher, opts.publish) {
        (Some(publish), Some(store), true) => {
            tracing::info!(store = %store.describe(), "publishing outputs");
            let runs = publish_run_outputs(
                store,
                &run_dir,
                HORIZON_TAG,
                &run_date,
                &publish.prefix_runs_template,
            )
            .context("Publishing run outputs failed")?;
            let latest = publish_latest_outputs(store, latest_dir, HORIZON_TAG, &publish.prefix_latest)
                .context("Publishing latest outputs failed")?;
            Some(PublishInfo {
                store: runs.store,
                runs_prefix: runs.prefix,
                latest_prefix: latest.prefix,
            })
        }
        _ => None,
    };

    let notified = match (&cfg.notify, delivery.notifier, opts.notify) {
        (Some(notify), Some(notifier), true) => {
            let message = build_notification(notify, HORIZON_TAG, &run_date, latest_dir, published.as_ref())?;
            Some(notifier.send(&message).context("Notification failed")?)
        }
        _ => None,
    };

    Ok(DailyReport {
        run_date,
        run_dir,
        predictions,
        promoted,
        published,
        notified,
    })
}
