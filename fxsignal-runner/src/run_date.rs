//! Run date and timestamp in the pipeline's home timezone.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use chrono_tz::America::Toronto;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RunDateError {
    #[error("invalid run date \"{0}\", expected YYYY-MM-DD")]
    Invalid(String),
}

/// Calendar date in Toronto at `now`.
pub fn toronto_today(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Toronto).date_naive()
}

/// `now` as ISO-8601 with the Toronto offset, e.g. `2024-01-15T14:30:00-05:00`.
pub fn toronto_now_iso(now: DateTime<Utc>) -> String {
    now.with_timezone(&Toronto)
        .to_rfc3339_opts(SecondsFormat::Secs, false)
}

/// Strict `YYYY-MM-DD`.
pub fn parse_run_date(text: &str) -> Result<NaiveDate, RunDateError> {
    let trimmed = text.trim();
    if trimmed.len() != 10 {
        return Err(RunDateError::Invalid(text.to_string()));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").map_err(|_| RunDateError::Invalid(text.to_string()))
}

/// The override when given, otherwise today in Toronto.
pub fn resolve_run_date(
    override_date: Option<&str>,
    now: DateTime<Utc>,
) -> Result<NaiveDate, RunDateError> {
    match override_date {
        Some(text) => parse_run_date(text),
        None => Ok(toronto_today(now)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn winter_offset() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 19, 30, 0).unwrap();
        assert_eq!(toronto_now_iso(now), "2024-01-15T14:30:00-05:00");
        assert_eq!(toronto_today(now), NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn summer_offset_crosses_midnight() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 3, 0, 0).unwrap();
        assert_eq!(toronto_now_iso(now), "2024-06-30T23:00:00-04:00");
        assert_eq!(toronto_today(now), NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
    }

    #[test]
    fn override_wins() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 3, 0, 0).unwrap();
        let date = resolve_run_date(Some("2024-02-29"), now).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn override_is_strict() {
        let now = Utc.with_ymd_and_hms(2024, 7, 1, 3, 0, 0).unwrap();
        for bad in ["2024-2-29", "2023-02-29", "20240229", "yesterday", ""] {
            assert!(resolve_run_date(Some(bad), now).is_err(), "{bad}");
        }
    }
}
