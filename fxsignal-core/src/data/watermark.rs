//! Per-(layer, series) progress markers.
//!
//! A missing watermark means the layer has never been built for that series.

use super::store::ObjectStore;
use super::DataError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilverWatermark {
    /// Highest bronze `ingest_ts` considered, suffix included.
    pub last_ingest_ts: String,
    pub last_obs_date: Option<NaiveDate>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoldWatermark {
    pub last_obs_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

/// Read a watermark, `None` when the key does not exist.
pub fn read_watermark<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<Option<T>, DataError> {
    let bytes = match store.get(key) {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| DataError::Malformed {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

pub fn write_watermark<T: Serialize>(
    store: &dyn ObjectStore,
    key: &str,
    watermark: &T,
) -> Result<(), DataError> {
    let bytes = serde_json::to_vec_pretty(watermark)
        .map_err(|e| DataError::Serialization(format!("watermark {key}: {e}")))?;
    store.put(key, &bytes)?;
    Ok(())
}
