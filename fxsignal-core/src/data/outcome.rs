//! Result summary shared by the silver and gold merges.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeMode {
    /// No watermark yet: everything upstream is new.
    InitialLoad,
    /// Only upstream data past the watermark.
    Incremental,
    /// Watermark ignored; every upstream object is reprocessed.
    FullRefresh,
}

impl MergeMode {
    pub fn select(full_refresh: bool, has_watermark: bool) -> Self {
        match (full_refresh, has_watermark) {
            (true, _) => MergeMode::FullRefresh,
            (false, true) => MergeMode::Incremental,
            (false, false) => MergeMode::InitialLoad,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MergeMode::InitialLoad => "initial_load",
            MergeMode::Incremental => "incremental",
            MergeMode::FullRefresh => "full_refresh",
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// Nothing upstream past the watermark; nothing written.
    NoNewFiles,
    /// Upstream objects were found but yielded no usable rows.
    NoRecords,
    Success,
}

impl MergeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStatus::NoNewFiles => "no_new_files",
            MergeStatus::NoRecords => "no_records",
            MergeStatus::Success => "success",
        }
    }
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub series_id: String,
    pub layer: String,
    pub mode: MergeMode,
    pub status: MergeStatus,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub rows_written: usize,
    pub min_obs_date: Option<NaiveDate>,
    pub max_obs_date: Option<NaiveDate>,
    pub run_id: Option<String>,
}

impl MergeOutcome {
    pub(crate) fn empty(layer: &str, series_id: &str, mode: MergeMode, status: MergeStatus) -> Self {
        Self {
            series_id: series_id.to_string(),
            layer: layer.to_string(),
            mode,
            status,
            files_processed: 0,
            files_skipped: 0,
            rows_written: 0,
            min_obs_date: None,
            max_obs_date: None,
            run_id: None,
        }
    }
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let date = |d: Option<NaiveDate>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
        write!(
            f,
            "{} {} mode={} status={} files={} skipped={} rows={} range={}..{}",
            self.layer,
            self.series_id,
            self.mode,
            self.status,
            self.files_processed,
            self.files_skipped,
            self.rows_written,
            date(self.min_obs_date),
            date(self.max_obs_date),
        )
    }
}
