//! h7 feature construction: leak-free predictors plus the 7-row forward target.

pub mod builder;
pub mod frame;
pub mod rolling;
pub mod schema;

pub use builder::{build_features, FeatureError, FeatureRow, FeatureTable, GoldRow};
pub use frame::{
    build_features_from_frame, feature_table_to_frame, gold_rows_from_frame, gold_rows_to_frame,
};
pub use schema::{feature_index, FEATURE_COUNT, FEATURE_NAMES_H7};
