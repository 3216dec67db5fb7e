//! End-to-end bronze -> silver -> gold -> features over a local store.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use fxsignal_core::data::bronze::{self, ingest_series, IngestWindow};
use fxsignal_core::data::gold::{merge_silver_to_gold, read_gold};
use fxsignal_core::data::silver::{list_partitions, merge_bronze_to_silver};
use fxsignal_core::data::{
    FetchError, LayerKeys, LocalStore, MergeMode, MergeStatus, ObjectStore, ObservationProvider,
    RawResponse,
};
use fxsignal_core::features::{build_features, GoldRow};
use fxsignal_core::synthetic::random_walk;
use std::collections::BTreeMap;

/// Serves a fixed synthetic history, clipped to the requested window.
struct HistoryProvider {
    history: Vec<(NaiveDate, f64)>,
}

impl ObservationProvider for HistoryProvider {
    fn source(&self) -> &str {
        "BoC"
    }

    fn format(&self) -> &str {
        "json"
    }

    fn fetch(&self, series_id: &str, start: NaiveDate, end: NaiveDate) -> Result<RawResponse, FetchError> {
        let observations: Vec<serde_json::Value> = self
            .history
            .iter()
            .filter(|(d, _)| *d >= start && *d <= end)
            .map(|(d, v)| {
                let mut entry = serde_json::Map::new();
                entry.insert("d".into(), serde_json::json!(d.to_string()));
                entry.insert(series_id.into(), serde_json::json!({"v": format!("{v:.6}")}));
                serde_json::Value::Object(entry)
            })
            .collect();
        let body = serde_json::to_vec(&serde_json::json!({ "observations": observations })).unwrap();
        Ok(RawResponse {
            request_url: format!("https://example.test/{series_id}"),
            http_status: 200,
            headers: BTreeMap::new(),
            body,
            retries: 0,
        })
    }
}

fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 21, 0, 0).unwrap()
}

fn evening(day: NaiveDate, hour: u32) -> DateTime<Utc> {
    day.and_hms_opt(hour, 0, 0).unwrap().and_utc()
}

#[test]
fn backfill_then_daily_increment() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    let series = vec!["FXUSDCAD".to_string()];
    let keys = LayerKeys::new("BoC", "FXUSDCAD");

    let walk = random_walk("FXUSDCAD", 320, 99);
    let history: Vec<(NaiveDate, f64)> = walk.iter().map(|o| (o.obs_date, o.value)).collect();
    let last_day = history[history.len() - 1].0;
    let provider = HistoryProvider {
        history: history.clone(),
    };


    // Backfill everything except the last five observations
    let backfill_end = history[history.len() - 6].0;
    let report = ingest_series(
        &provider,
        &store,
        &series,
        IngestWindow::Backfill {
            start: history[0].0,
            end: Some(backfill_end),
        },
        evening(backfill_end, 21),
    );
    assert!(report.all_succeeded());
    assert!(report.snapshots[0].ingest_ts.ends_with("_backfill"));

    let silver = merge_bronze_to_silver(&store, &keys, false, evening(backfill_end, 22)).unwrap();
    assert_eq!(silver.mode, MergeMode::InitialLoad);
    assert_eq!(silver.rows_written, 315);
    let gold = merge_silver_to_gold(&store, &keys, false, evening(backfill_end, 22)).unwrap();
    assert_eq!(gold.rows_written, 315);

    // Daily incremental ingest with lookback overlapping existing dates
    let report = ingest_series(
        &provider,
        &store,
        &series,
        IngestWindow::Incremental { lookback_days: 10 },
        evening(last_day, 21),
    );
    assert!(report.all_succeeded());

    let silver = merge_bronze_to_silver(&store, &keys, false, evening(last_day, 22)).unwrap();
    assert_eq!(silver.mode, MergeMode::Incremental);
    assert_eq!(silver.files_processed, 1);
    assert_eq!(list_partitions(&store, &keys).unwrap().len(), 320);

    let gold = merge_silver_to_gold(&store, &keys, false, evening(last_day, 22)).unwrap();
    assert_eq!(gold.mode, MergeMode::Incremental);
    assert_eq!(gold.rows_written, 5);
    assert_eq!(gold.max_obs_date, Some(last_day));

    let again = merge_silver_to_gold(&store, &keys, false, evening(last_day, 23)).unwrap();
    assert_eq!(again.status, MergeStatus::NoNewFiles);

    // Gold feeds the feature builder directly
    let rows: Vec<GoldRow> = read_gold(&store, &keys)
        .unwrap()
        .into_iter()
        .map(|g| GoldRow {
            obs_date: g.obs_date,
            value: g.value,
            prev_value: g.prev_value,
            daily_return: g.daily_return,
            series_id: Some(g.series_id),
        })
        .collect();
    assert_eq!(rows.len(), 320);
    let table = build_features(&rows).unwrap();
    assert_eq!(table.len(), 320 - 7 - 272);
    assert_eq!(table.series_id.as_deref(), Some("FXUSDCAD"));

    assert!(store.exists(&keys.gold_watermark()).unwrap());
    assert_eq!(bronze::list_snapshots(&store, &keys).unwrap().len(), 2);
}

#[test]
fn full_refresh_leaves_silver_bytes_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::new(dir.path());
    let keys = LayerKeys::new("BoC", "FXUSDCAD");
    let walk = random_walk("FXUSDCAD", 40, 5);
    let provider = HistoryProvider {
        history: walk.iter().map(|o| (o.obs_date, o.value)).collect(),
    };
    let series = vec!["FXUSDCAD".to_string()];

    ingest_series(
        &provider,
        &store,
        &series,
        IngestWindow::Backfill {
            start: walk[0].obs_date,
            end: Some(walk[39].obs_date),
        },
        at(2020, 3, 1),
    );
    merge_bronze_to_silver(&store, &keys, false, at(2020, 3, 1)).unwrap();
    let parts = list_partitions(&store, &keys).unwrap();
    let before: Vec<Vec<u8>> = parts.iter().map(|(_, k)| store.get(k).unwrap()).collect();

    let refresh = merge_bronze_to_silver(&store, &keys, true, at(2020, 3, 5)).unwrap();
    assert_eq!(refresh.mode, MergeMode::FullRefresh);
    let after: Vec<Vec<u8>> = parts.iter().map(|(_, k)| store.get(k).unwrap()).collect();
    assert_eq!(before, after);
}
