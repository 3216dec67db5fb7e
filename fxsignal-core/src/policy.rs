//! Threshold decision policy.
//!
//! Maps P(up) to a directional label with a symmetric sideways band
//! `(1 - t, t)` and a paired confidence score. Both functions are pure and
//! preserve the order of their input.

use crate::domain::Direction;
use thiserror::Error;

/// Tolerance applied at both band edges so that `p == t` and `p == 1 - t`
/// survive floating-point round-off.
pub const BOUNDARY_EPS: f64 = 1e-10;

#[derive(Debug, Error, PartialEq)]
pub enum PolicyError {
    #[error("threshold t must be in (0.5, 1.0), got {0}")]
    InvalidThreshold(f64),

    #[error("unknown decision label '{0}' (expected UP, DOWN, SIDEWAYS or ABSTAIN)")]
    UnknownLabel(String),
}

fn validate_threshold(t: f64) -> Result<(), PolicyError> {
    if t > 0.5 && t < 1.0 {
        Ok(())
    } else {
        Err(PolicyError::InvalidThreshold(t))
    }
}

fn classify(p: f64, t: f64) -> Direction {
    if p >= t - BOUNDARY_EPS {
        Direction::Up
    } else if p <= (1.0 - t) + BOUNDARY_EPS {
        Direction::Down
    } else {
        Direction::Sideways
    }
}

/// Label every probability: UP if `p >= t`, DOWN if `p <= 1 - t`, else
/// SIDEWAYS. NaN probabilities fall into the band.
pub fn apply_threshold_policy(p_up: &[f64], t: f64) -> Result<Vec<Direction>, PolicyError> {
    validate_threshold(t)?;
    Ok(p_up.iter().map(|&p| classify(p, t)).collect())
}

/// Confidence in `[0, 1]` for each probability under threshold `t`.
///
/// UP scales `(p - t) / (1 - t)`, DOWN scales `((1 - t) - p) / (1 - t)`,
/// SIDEWAYS is always `0.0`.
pub fn confidence_from_p(p_up: &[f64], t: f64) -> Result<Vec<f64>, PolicyError> {
    validate_threshold(t)?;
    let width = 1.0 - t;
    Ok(p_up
        .iter()
        .map(|&p| match classify(p, t) {
            Direction::Up => ((p - t) / width).clamp(0.0, 1.0),
            Direction::Down => ((width - p) / width).clamp(0.0, 1.0),
            Direction::Sideways => 0.0,
        })
        .collect())
}

/// Normalize a stored label: trims, upper-cases and maps legacy `ABSTAIN`
/// to SIDEWAYS. Unrecognized labels are rejected.
pub fn normalize_label(label: &str) -> Result<Direction, PolicyError> {
    let cleaned = label.trim().to_uppercase();
    if cleaned == "ABSTAIN" {
        return Ok(Direction::Sideways);
    }
    cleaned
        .parse::<Direction>()
        .map_err(|_| PolicyError::UnknownLabel(label.to_string()))
}
