use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single daily rate observation, unique per (series_id, obs_date) once
/// it has passed through the silver layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub obs_date: NaiveDate,
    pub series_id: String,
    pub value: f64,
}

/// True on the last calendar day of the month.
pub fn is_month_end(date: NaiveDate) -> bool {
    date.succ_opt().map_or(true, |next| next.month() != date.month())
}

/// Currency pair parsed from a `FX<BASE><QUOTE>` series id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    /// `FXUSDCAD` -> `USD`/`CAD`. Anything else yields `None`.
    pub fn from_series_id(series_id: &str) -> Option<Self> {
        let rest = series_id.strip_prefix("FX")?;
        if rest.len() != 6 || !rest.chars().all(|c| c.is_ascii_uppercase()) {
            return None;
        }
        Some(Self {
            base: rest[..3].to_string(),
            quote: rest[3..].to_string(),
        })
    }

    /// Underscore form used in file names and API payloads, e.g. `USD_CAD`.
    pub fn label(&self) -> String {
        format!("{}_{}", self.base, self.quote)
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}
