//! Column contract of the h7 feature table.

/// Ordered numeric predictors. Inference selects by name, training relies on
/// this order; do not reorder.
pub const FEATURE_NAMES_H7: [&str; FEATURE_COUNT] = [
    "value",
    "ret_1d",
    "ret_3d",
    "ret_5d",
    "ret_10d",
    "ret_21d",
    "vol_5d",
    "vol_10d",
    "vol_21d",
    "vol_63d",
    "mom_5d",
    "mom_10d",
    "mom_21d",
    "zret_1d_21d",
    "zret_1d_63d",
    "vol_ratio_21_63",
    "vol_21_med_252",
    "is_high_vol",
    "day_of_week",
    "month",
    "is_month_end",
];

pub const FEATURE_COUNT: usize = 21;

pub const TARGET_DIRECTION_H7: &str = "direction_7d";
pub const TARGET_FWD_RETURN_H7: &str = "fwd_return_7d";
pub const SERIES_ID_COL: &str = "series_id";

/// Columns a gold frame must provide.
pub const GOLD_REQUIRED_COLUMNS: [&str; 3] = ["obs_date", "value", "prev_value"];

pub const VOL_WINDOWS: [usize; 4] = [5, 10, 21, 63];
pub const MOM_WINDOWS: [usize; 3] = [5, 10, 21];
pub const RET_PERIODS: [usize; 4] = [3, 5, 10, 21];
pub const REGIME_MEDIAN_WINDOW: usize = 252;

/// Position of a feature in [`FEATURE_NAMES_H7`].
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES_H7.iter().position(|n| *n == name)
}
