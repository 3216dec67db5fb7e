//! Daily run end to end over synthetic gold series in a temp directory.

use chrono::{DateTime, TimeZone, Utc};
use fxsignal_core::data::parquet::to_parquet_bytes;
use fxsignal_core::data::{DataError, LocalStore, MemoryStore, ObjectInfo, ObjectStore};
use fxsignal_core::features::gold_rows_to_frame;
use fxsignal_core::synthetic::random_walk_gold;
use fxsignal_runner::inference::read_predictions;
use fxsignal_runner::manifest::read_manifest;
use fxsignal_runner::{
    build_all_latest, run_daily, run_daily_with, DailyOptions, Delivery, LatestReader,
    Notification, Notifier, PipelineConfig, MANIFEST_FILE, PREDICTIONS_FILE,
};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

const SERIES: [&str; 2] = ["FXUSDCAD", "FXEURCAD"];

fn evening() -> DateTime<Utc> {
    // 17:00 in Toronto
    Utc.with_ymd_and_hms(2024, 3, 5, 22, 0, 0).unwrap()
}

fn gold_bytes(series_id: &str, seed: u64) -> Vec<u8> {
    let rows = random_walk_gold(series_id, 300, seed);
    to_parquet_bytes(&gold_rows_to_frame(&rows).unwrap()).unwrap()
}

fn write_local_gold(root: &Path) {
    for (i, sid) in SERIES.iter().enumerate() {
        let path = root.join("gold").join(sid).join("data.parquet");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, gold_bytes(sid, i as u64 + 1)).unwrap();
    }
}

fn write_models(root: &Path) {
    let dir = root.join("models");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("logreg_h7_global.json"),
        r#"{
  "intercept": 0.05,
  "categorical": [{"name": "series_id", "levels": {"FXUSDCAD": 0.1, "FXEURCAD": -0.1}}],
  "numeric": [
    {"name": "ret_5d", "mean": 0.0, "scale": 0.01, "coef": 0.8},
    {"name": "mom_21d", "mean": 0.0, "scale": 0.02, "coef": 0.5}
  ]
}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("features_h7.json"),
        r#"{"categorical": ["series_id"], "numeric": ["ret_5d", "mom_21d"]}"#,
    )
    .unwrap();
    std::fs::write(dir.join("metadata_h7.json"), r#"{"version": "1", "horizon": "h7"}"#).unwrap();
}

fn config(root: &Path, extra: &str) -> PipelineConfig {
    let r = root.display();
    let text = format!(
        r#"
horizon = "h7"
timezone = "America/Toronto"

[[series]]
series_id = "FXUSDCAD"
gold_local_path = '{r}/gold/FXUSDCAD'

[[series]]
series_id = "FXEURCAD"
gold_local_path = '{r}/gold/FXEURCAD'

[storage]
root = '{r}/lake'

[artifacts]
dir = '{r}/models'

[outputs]
runs_dir = '{r}/outputs/runs'
latest_dir = '{r}/outputs/latest'
{extra}
"#
    );
    PipelineConfig::from_toml_str(&text).unwrap()
}

fn publish_and_notify(root: &Path) -> String {
    let r = root.display();
    format!(
        r#"
[publish]
root = '{r}/published'
prefix_runs_template = "runs/{{horizon}}/{{run_date}}/"
prefix_latest = "latest/{{horizon}}/"

[notify]
subject_template = "FX signals {{horizon}} {{run_date}}"
outbox_dir = '{r}/outbox'
sender = "pipeline@example.com"
recipients = ["ops@example.com"]
"#
    )
}

#[test]
fn daily_run_promotes_predictions_and_manifest() {
    let tmp = TempDir::new().unwrap();
    write_local_gold(tmp.path());
    write_models(tmp.path());
    let cfg = config(tmp.path(), "");

    let report = run_daily(&cfg, &DailyOptions::default(), evening()).unwrap();
    assert_eq!(report.run_date, "2024-03-05");
    assert_eq!(
        report.summary_line(),
        "[OK] run_date=2024-03-05 promoted=decision_predictions_h7.parquet,manifest.json"
    );
    assert_eq!(report.predictions.rows, 42);
    assert_eq!(report.predictions.by_series_rows["FXUSDCAD"], 21);

    let run_dir = tmp.path().join("outputs/runs/2024-03-05");
    let latest_dir = tmp.path().join("outputs/latest");
    for name in [PREDICTIONS_FILE, MANIFEST_FILE] {
        assert_eq!(
            std::fs::read(run_dir.join(name)).unwrap(),
            std::fs::read(latest_dir.join(name)).unwrap(),
            "{name} differs between run and latest"
        );
    }
    // no staging left behind
    assert_eq!(std::fs::read_dir(&latest_dir).unwrap().count(), 2);

    let manifest = read_manifest(&latest_dir.join(MANIFEST_FILE)).unwrap();
    assert_eq!(manifest.run_date, "2024-03-05");
    assert!(manifest.run_timestamp.starts_with("2024-03-05T17:00:00"));
    assert_eq!(manifest.timezone, "America/Toronto");
    assert_eq!(manifest.gold_inputs.len(), 2);
    assert_eq!(manifest.gold_inputs[0].rows, 300);
    assert_eq!(manifest.predictions.rows, 42);
    assert_eq!(manifest.model_artifacts.files.len(), 3);
    assert!(manifest.model_artifacts.files.contains_key("logreg_h7_global.json"));

    let rows = read_predictions(&latest_dir.join(PREDICTIONS_FILE)).unwrap();
    assert_eq!(rows.len(), 42);
    assert!(rows
        .windows(2)
        .all(|w| (w[0].obs_date, &w[0].series_id) <= (w[1].obs_date, &w[1].series_id)));
    assert!(rows.iter().all(|r| r.p_up > 0.0 && r.p_up < 1.0));

    let target = tmp.path().join("latest_artifacts");
    let written = build_all_latest(
        &latest_dir.join(PREDICTIONS_FILE),
        &target,
        "deadbeef",
        10,
        0.6,
        evening(),
    )
    .unwrap();
    assert_eq!(written.len(), 2);
    let reader = LatestReader::new(&target, Duration::from_secs(60));
    assert_eq!(reader.pairs().unwrap(), vec!["EUR_CAD", "USD_CAD"]);
    assert_eq!(reader.artifact("USD_CAD").unwrap().rows.len(), 10);
}

#[test]
fn rerun_same_day_gives_same_predictions() {
    let tmp = TempDir::new().unwrap();
    write_local_gold(tmp.path());
    write_models(tmp.path());
    let cfg = config(tmp.path(), "");
    let opts = DailyOptions {
        run_date: Some("2024-03-01".into()),
        ..DailyOptions::default()
    };

    run_daily(&cfg, &opts, evening()).unwrap();
    let latest = tmp.path().join("outputs/latest").join(PREDICTIONS_FILE);
    let first = read_predictions(&latest).unwrap();
    run_daily(&cfg, &opts, evening()).unwrap();
    assert_eq!(read_predictions(&latest).unwrap(), first);
    assert!(tmp.path().join("outputs/runs/2024-03-01").is_dir());
}

#[test]
fn sync_publish_and_notify() {
    let tmp = TempDir::new().unwrap();
    write_models(tmp.path());
    let cfg = config(tmp.path(), &publish_and_notify(tmp.path()));

    // gold only exists in the lake until synced
    let lake = LocalStore::new(tmp.path().join("lake"));
    for (i, sid) in SERIES.iter().enumerate() {
        lake.put(&cfg.gold_key_for(sid), &gold_bytes(sid, i as u64 + 1)).unwrap();
    }

    let opts = DailyOptions {
        sync_gold: true,
        publish: true,
        notify: true,
        ..DailyOptions::default()
    };
    let report = run_daily(&cfg, &opts, evening()).unwrap();
    assert_eq!(
        report.summary_line(),
        "[OK] run_date=2024-03-05 promoted=decision_predictions_h7.parquet,manifest.json \
         published=runs:runs/h7/2024-03-05/,latest:latest/h7/ emailed=true"
    );
    assert!(tmp.path().join("gold/FXUSDCAD/data.parquet").is_file());

    let published = LocalStore::new(tmp.path().join("published"));
    for key in [
        "runs/h7/2024-03-05/decision_predictions_h7.parquet",
        "runs/h7/2024-03-05/manifest.json",
        "latest/h7/decision_predictions_h7.parquet",
        "latest/h7/manifest.json",
    ] {
        assert!(published.exists(key).unwrap(), "{key} not published");
    }

    let outbox: Vec<_> = std::fs::read_dir(tmp.path().join("outbox"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(outbox.len(), 1);
    let message = std::fs::read_to_string(&outbox[0]).unwrap();
    assert!(message.contains("FX signals h7 2024-03-05"));
    assert!(message.contains("FX FORECAST SIGNALS - 7-Day Horizon"));
    assert!(message.contains("USD/CAD"));
    assert!(message.contains("runs/h7/2024-03-05/"));
}

#[test]
fn publish_without_section_fails_before_any_output() {
    let tmp = TempDir::new().unwrap();
    write_local_gold(tmp.path());
    write_models(tmp.path());
    let cfg = config(tmp.path(), "");
    let opts = DailyOptions {
        publish: true,
        ..DailyOptions::default()
    };

    let err = run_daily(&cfg, &opts, evening()).unwrap_err();
    assert!(err.to_string().contains("publish"));
    assert!(!tmp.path().join("outputs").exists());
}

#[test]
fn failed_inference_keeps_previous_latest() {
    let tmp = TempDir::new().unwrap();
    write_local_gold(tmp.path());
    write_models(tmp.path());
    let cfg = config(tmp.path(), "");

    let latest_dir = tmp.path().join("outputs/latest");
    std::fs::create_dir_all(&latest_dir).unwrap();
    std::fs::write(latest_dir.join(PREDICTIONS_FILE), b"previous").unwrap();
    std::fs::remove_file(tmp.path().join("gold/FXEURCAD/data.parquet")).unwrap();

    let err = run_daily(&cfg, &DailyOptions::default(), evening()).unwrap_err();
    assert!(format!("{err:#}").contains("FXEURCAD"));
    assert_eq!(std::fs::read(latest_dir.join(PREDICTIONS_FILE)).unwrap(), b"previous");
    assert!(!latest_dir.join(MANIFEST_FILE).exists());
    assert!(!tmp
        .path()
        .join("outputs/runs/2024-03-05")
        .join(PREDICTIONS_FILE)
        .exists());
}

#[test]
fn bad_run_date_rejected() {
    let tmp = TempDir::new().unwrap();
    write_local_gold(tmp.path());
    write_models(tmp.path());
    let cfg = config(tmp.path(), "");
    for bad in ["2024-13-01", "2024-3-5", "yesterday"] {
        let opts = DailyOptions {
            run_date: Some(bad.into()),
            ..DailyOptions::default()
        };
        assert!(run_daily(&cfg, &opts, evening()).is_err(), "{bad}");
    }
}

/// Accepts reads and listings but refuses every write.
struct ReadOnlyStore;

impl ObjectStore for ReadOnlyStore {
    fn describe(&self) -> String {
        "readonly://".into()
    }
    fn get(&self, key: &str) -> Result<Vec<u8>, DataError> {
        Err(DataError::NotFound { key: key.into() })
    }
    fn put(&self, key: &str, _: &[u8]) -> Result<ObjectInfo, DataError> {
        Err(DataError::StorageError(format!("write to {key} denied")))
    }
    fn list(&self, _: &str) -> Result<Vec<String>, DataError> {
        Ok(Vec::new())
    }
    fn exists(&self, _: &str) -> Result<bool, DataError> {
        Ok(false)
    }
    fn delete(&self, _: &str) -> Result<bool, DataError> {
        Ok(false)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl Notifier for RecordingNotifier {
    fn send(&self, message: &Notification) -> anyhow::Result<String> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(message.clone());
        Ok(format!("recorded-{}", sent.len()))
    }
}

fn publish_and_notify_opts() -> DailyOptions {
    DailyOptions {
        publish: true,
        notify: true,
        ..DailyOptions::default()
    }
}

#[test]
fn failed_publish_sends_no_notification_but_latest_is_promoted() {
    let tmp = TempDir::new().unwrap();
    write_local_gold(tmp.path());
    write_models(tmp.path());
    let cfg = config(tmp.path(), &publish_and_notify(tmp.path()));

    let latest_dir = tmp.path().join("outputs/latest");
    std::fs::create_dir_all(&latest_dir).unwrap();
    std::fs::write(latest_dir.join(PREDICTIONS_FILE), b"previous").unwrap();

    let notifier = RecordingNotifier::default();
    let delivery = Delivery {
        publisher: Some(&ReadOnlyStore),
        notifier: Some(&notifier),
    };
    let err = run_daily_with(&cfg, &publish_and_notify_opts(), evening(), delivery).unwrap_err();

    let message = format!("{err:#}");
    assert!(message.contains("Publishing run outputs failed"), "{message}");
    assert!(message.contains("denied"), "{message}");
    assert!(notifier.sent.lock().unwrap().is_empty());
    assert!(!tmp.path().join("outbox").exists());

    // promotion ran before publishing
    let run_dir = tmp.path().join("outputs/runs/2024-03-05");
    for name in [PREDICTIONS_FILE, MANIFEST_FILE] {
        assert_eq!(
            std::fs::read(latest_dir.join(name)).unwrap(),
            std::fs::read(run_dir.join(name)).unwrap(),
            "{name} not promoted"
        );
    }
}

#[test]
fn injected_publisher_and_notifier_receive_the_run() {
    let tmp = TempDir::new().unwrap();
    write_local_gold(tmp.path());
    write_models(tmp.path());
    let cfg = config(tmp.path(), &publish_and_notify(tmp.path()));

    let store = MemoryStore::new();
    let notifier = RecordingNotifier::default();
    let delivery = Delivery {
        publisher: Some(&store),
        notifier: Some(&notifier),
    };
    let report = run_daily_with(&cfg, &publish_and_notify_opts(), evening(), delivery).unwrap();

    assert_eq!(report.notified.as_deref(), Some("recorded-1"));
    assert_eq!(report.published.as_ref().unwrap().store, "memory://");
    assert_eq!(store.list("runs/h7/2024-03-05/").unwrap().len(), 2);
    assert_eq!(store.list("latest/h7/").unwrap().len(), 2);

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "FX signals h7 2024-03-05");
    assert_eq!(sent[0].recipients, vec!["ops@example.com".to_string()]);
    // config-built targets were not touched
    assert!(!tmp.path().join("published").exists());
    assert!(!tmp.path().join("outbox").exists());
}

#[test]
fn publish_without_a_store_is_rejected_up_front() {
    let tmp = TempDir::new().unwrap();
    write_local_gold(tmp.path());
    write_models(tmp.path());
    let cfg = config(tmp.path(), &publish_and_notify(tmp.path()));

    let err = run_daily_with(&cfg, &publish_and_notify_opts(), evening(), Delivery::default()).unwrap_err();
    assert!(err.to_string().contains("publish store"));
    assert!(!tmp.path().join("outputs").exists());
}
