//! Rolling statistics over `f64` series.
//!
//! Every helper returns a vector the same length as its input. The
//! full-window helpers yield NaN wherever the trailing window is incomplete
//! or contains a NaN; the `_min` helpers accept partial windows.

/// Apply `stat` to every complete, NaN-free trailing window of length `window`.
fn rolling_full<F>(xs: &[f64], window: usize, stat: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let n = xs.len();
    let mut out = vec![f64::NAN; n];
    if window == 0 || n < window {
        return out;
    }

    // Index of the most recent NaN seen so far, used to skip tainted windows
    let mut last_nan: Option<usize> = None;
    for i in 0..n {
        if xs[i].is_nan() {
            last_nan = Some(i);
        }
        if i + 1 < window {
            continue;
        }
        let start = i + 1 - window;
        if matches!(last_nan, Some(j) if j >= start) {
            continue;
        }
        out[i] = stat(&xs[start..=i]);
    }
    out
}

fn mean(w: &[f64]) -> f64 {
    w.iter().sum::<f64>() / w.len() as f64
}

/// Sample standard deviation (ddof = 1); callers guarantee `w.len() >= 2`.
fn sample_std(w: &[f64]) -> f64 {
    let m = mean(w);
    let ss: f64 = w.iter().map(|x| (x - m) * (x - m)).sum();
    (ss / (w.len() as f64 - 1.0)).sqrt()
}

/// Rolling arithmetic mean.
pub fn rolling_mean(xs: &[f64], window: usize) -> Vec<f64> {
    rolling_full(xs, window, mean)
}

/// Rolling sample standard deviation (ddof = 1). A window of one is NaN.
pub fn rolling_std(xs: &[f64], window: usize) -> Vec<f64> {
    if window < 2 {
        return vec![f64::NAN; xs.len()];
    }
    rolling_full(xs, window, sample_std)
}

/// Rolling median; even windows average the two middle values.
pub fn rolling_median(xs: &[f64], window: usize) -> Vec<f64> {
    rolling_full(xs, window, |w| {
        let mut sorted = w.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    })
}

/// Partial-window variant: NaNs are skipped and a window needs only
/// `min_periods` valid values. Used for the descriptive gold columns, never
/// for model features.
fn rolling_min_periods<F>(xs: &[f64], window: usize, min_periods: usize, stat: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    (0..xs.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let valid: Vec<f64> = xs[start..=i].iter().copied().filter(|v| !v.is_nan()).collect();
            if valid.is_empty() || valid.len() < min_periods {
                f64::NAN
            } else {
                stat(&valid)
            }
        })
        .collect()
}

pub fn rolling_mean_min(xs: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_min_periods(xs, window, min_periods, mean)
}

pub fn rolling_std_min(xs: &[f64], window: usize, min_periods: usize) -> Vec<f64> {
    rolling_min_periods(xs, window, min_periods.max(2), sample_std)
}

/// Percent change over `periods` rows: `x[i] / x[i - periods] - 1`.
pub fn pct_change(xs: &[f64], periods: usize) -> Vec<f64> {
    (0..xs.len())
        .map(|i| {
            if periods == 0 || i < periods {
                f64::NAN
            } else {
                xs[i] / xs[i - periods] - 1.0
            }
        })
        .collect()
}

/// Elementwise `num / den`, NaN when the denominator is NaN or zero.
pub fn safe_div(num: &[f64], den: &[f64]) -> Vec<f64> {
    num.iter()
        .zip(den)
        .map(|(&a, &b)| if b.is_nan() || b == 0.0 { f64::NAN } else { a / b })
        .collect()
}
