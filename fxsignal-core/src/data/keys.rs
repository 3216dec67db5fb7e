//! Object key layout for the bronze, silver and gold layers.
//!
//! ```text
//! bronze/source={SRC}/series={ID}/ingest_date={YYYY-MM-DD}/ingest_ts={YYYYMMDDTHHMMSSZ}[_backfill]/observations.{fmt}.gz
//! bronze/.../_meta.json
//! silver/source={SRC}/series={ID}/ds={YYYY-MM-DD}/data.parquet
//! silver/source={SRC}/series={ID}/_watermark.json
//! gold/source={SRC}/series={ID}/data.parquet
//! gold/source={SRC}/series={ID}/_watermark.json
//! ```

use chrono::NaiveDate;

pub const DEFAULT_SOURCE: &str = "BoC";
pub const BACKFILL_SUFFIX: &str = "_backfill";
pub const META_FILE: &str = "_meta.json";
pub const WATERMARK_FILE: &str = "_watermark.json";
pub const PARTITION_FILE: &str = "data.parquet";

/// Key builder for one (source, series) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerKeys {
    source: String,
    series_id: String,
}

impl LayerKeys {
    pub fn new(source: impl Into<String>, series_id: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            series_id: series_id.into(),
        }
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn layer_prefix(&self, layer: &str) -> String {
        format!("{layer}/source={}/series={}/", self.source, self.series_id)
    }

    // ── Bronze ──

    pub fn bronze_prefix(&self) -> String {
        self.layer_prefix("bronze")
    }

    /// Directory-like prefix of a single snapshot.
    pub fn bronze_snapshot_prefix(&self, ingest_date: NaiveDate, ingest_ts: &str) -> String {
        format!(
            "{}ingest_date={}/ingest_ts={ingest_ts}/",
            self.bronze_prefix(),
            ingest_date.format("%Y-%m-%d")
        )
    }

    pub fn bronze_payload(&self, ingest_date: NaiveDate, ingest_ts: &str, fmt: &str) -> String {
        format!(
            "{}observations.{fmt}.gz",
            self.bronze_snapshot_prefix(ingest_date, ingest_ts)
        )
    }

    pub fn bronze_meta(&self, ingest_date: NaiveDate, ingest_ts: &str) -> String {
        format!("{}{META_FILE}", self.bronze_snapshot_prefix(ingest_date, ingest_ts))
    }

    // ── Silver ──

    pub fn silver_prefix(&self) -> String {
        self.layer_prefix("silver")
    }

    pub fn silver_partition(&self, obs_date: NaiveDate) -> String {
        format!(
            "{}ds={}/{PARTITION_FILE}",
            self.silver_prefix(),
            obs_date.format("%Y-%m-%d")
        )
    }

    pub fn silver_watermark(&self) -> String {
        format!("{}{WATERMARK_FILE}", self.silver_prefix())
    }

    // ── Gold ──

    pub fn gold_prefix(&self) -> String {
        self.layer_prefix("gold")
    }

    pub fn gold_data(&self) -> String {
        format!("{}{PARTITION_FILE}", self.gold_prefix())
    }

    pub fn gold_watermark(&self) -> String {
        format!("{}{WATERMARK_FILE}", self.gold_prefix())
    }
}

/// Value of the `name=` segment in a key, if present.
fn segment<'a>(key: &'a str, name: &str) -> Option<&'a str> {
    key.split('/')
        .find_map(|seg| seg.strip_prefix(name).and_then(|v| v.strip_prefix('=')))
}

/// `ingest_ts` of a bronze key, including any `_backfill` suffix.
pub fn parse_ingest_ts(key: &str) -> Option<&str> {
    segment(key, "ingest_ts")
}

/// `ds` partition date of a silver key.
pub fn parse_partition_date(key: &str) -> Option<NaiveDate> {
    segment(key, "ds").and_then(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d").ok())
}

/// True for bronze payload keys (`observations.*.gz`).
pub fn is_bronze_payload(key: &str) -> bool {
    key.rsplit('/')
        .next()
        .is_some_and(|name| name.starts_with("observations.") && name.ends_with(".gz"))
}

/// Sibling `_meta.json` key of a bronze payload key.
pub fn meta_key_for(payload_key: &str) -> String {
    match payload_key.rfind('/') {
        Some(idx) => format!("{}/{META_FILE}", &payload_key[..idx]),
        None => META_FILE.to_string(),
    }
}

/// Fixed-width snapshot timestamp, e.g. `20240102T120000Z`.
pub fn format_ingest_ts(ts: chrono::DateTime<chrono::Utc>, backfill: bool) -> String {
    let base = ts.format("%Y%m%dT%H%M%SZ").to_string();
    if backfill {
        format!("{base}{BACKFILL_SUFFIX}")
    } else {
        base
    }
}

/// Parse the timestamp part of an `ingest_ts` (suffix ignored).
pub fn ingest_ts_to_datetime(ingest_ts: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let base = ingest_ts.strip_suffix(BACKFILL_SUFFIX).unwrap_or(ingest_ts);
    chrono::NaiveDateTime::parse_from_str(base, "%Y%m%dT%H%M%SZ")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn layout_matches_contract() {
        let keys = LayerKeys::new(DEFAULT_SOURCE, "FXUSDCAD");
        assert_eq!(
            keys.bronze_payload(d(2024, 1, 2), "20240102T120000Z", "json"),
            "bronze/source=BoC/series=FXUSDCAD/ingest_date=2024-01-02/ingest_ts=20240102T120000Z/observations.json.gz"
        );
        assert_eq!(
            keys.bronze_meta(d(2024, 1, 2), "20240102T120000Z"),
            "bronze/source=BoC/series=FXUSDCAD/ingest_date=2024-01-02/ingest_ts=20240102T120000Z/_meta.json"
        );
        assert_eq!(
            keys.silver_partition(d(2024, 1, 2)),
            "silver/source=BoC/series=FXUSDCAD/ds=2024-01-02/data.parquet"
        );
        assert_eq!(
            keys.silver_watermark(),
            "silver/source=BoC/series=FXUSDCAD/_watermark.json"
        );
        assert_eq!(keys.gold_data(), "gold/source=BoC/series=FXUSDCAD/data.parquet");
        assert_eq!(
            keys.gold_watermark(),
            "gold/source=BoC/series=FXUSDCAD/_watermark.json"
        );
    }

    #[test]
    fn parses_segments_back() {
        let keys = LayerKeys::new(DEFAULT_SOURCE, "FXUSDCAD");
        let payload = keys.bronze_payload(d(2024, 1, 2), "20240102T120000Z_backfill", "json");
        assert_eq!(parse_ingest_ts(&payload), Some("20240102T120000Z_backfill"));
        assert!(is_bronze_payload(&payload));
        assert_eq!(
            meta_key_for(&payload),
            keys.bronze_meta(d(2024, 1, 2), "20240102T120000Z_backfill")
        );
        assert!(!is_bronze_payload(&meta_key_for(&payload)));

        let part = keys.silver_partition(d(2023, 12, 29));
        assert_eq!(parse_partition_date(&part), Some(d(2023, 12, 29)));
        assert_eq!(parse_partition_date(&keys.silver_watermark()), None);
    }

    #[test]
    fn ingest_ts_is_fixed_width_and_sortable() {
        let a = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 9, 5, 0).unwrap();
        let b = chrono::Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap();
        let ta = format_ingest_ts(a, false);
        let tb = format_ingest_ts(b, true);
        assert_eq!(ta, "20240102T090500Z");
        assert_eq!(tb, "20240102T100000Z_backfill");
        assert!(ta < tb);
        assert_eq!(ingest_ts_to_datetime(&tb), Some(b));
        assert_eq!(ingest_ts_to_datetime("garbage"), None);
    }
}
