//! Seeded synthetic rate series for tests, benchmarks and dry runs.

use crate::domain::Observation;
use crate::features::GoldRow;
use chrono::{Datelike, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Per-series seed, independent of the order series are generated in.
fn series_seed(series_id: &str, seed: u64) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(series_id.as_bytes());
    let bytes = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&bytes.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// `n` consecutive weekdays starting at `start` (or the next weekday).
pub fn business_days(start: NaiveDate, n: usize) -> Vec<NaiveDate> {
    let mut out = Vec::with_capacity(n);
    let mut day = start;
    while out.len() < n {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            out.push(day);
        }
        match day.succ_opt() {
            Some(next) => day = next,
            None => break,
        }
    }
    out
}

/// Geometric random walk around 1.30 on weekdays from 2020-01-01.
pub fn random_walk(series_id: &str, n: usize, seed: u64) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(series_seed(series_id, seed));
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default();
    let mut value = 1.30_f64;
    business_days(start, n)
        .into_iter()
        .map(|obs_date| {
            value *= 1.0 + rng.gen_range(-0.006..0.006);
            Observation {
                obs_date,
                series_id: series_id.to_string(),
                value,
            }
        })
        .collect()
}

/// [`random_walk`] shaped as gold rows, `prev_value` set from row 1 on.
pub fn random_walk_gold(series_id: &str, n: usize, seed: u64) -> Vec<GoldRow> {
    let walk = random_walk(series_id, n, seed);
    walk.iter()
        .enumerate()
        .map(|(i, obs)| GoldRow {
            obs_date: obs.obs_date,
            value: obs.value,
            prev_value: i.checked_sub(1).map(|j| walk[j].value),
            daily_return: None,
            series_id: Some(series_id.to_string()),
        })
        .collect()
}
