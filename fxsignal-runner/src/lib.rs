//! fxsignal runner: the daily batch built on `fxsignal-core`.
//!
//! - Pipeline config (TOML) and run date resolution in America/Toronto
//! - Model artifact discovery and the in-process classifier
//! - Inference over gold series into the decision parquet
//! - Run manifest with checksums, atomic promotion to `latest/`
//! - Optional publish to an object store and a signal notification
//! - Per-pair latest artifacts behind a TTL cache

pub mod cache;
pub mod config;
pub mod daily;
pub mod inference;
pub mod latest;
pub mod manifest;
pub mod model;
pub mod notify;
pub mod promotion;
pub mod publish;
pub mod run_date;
pub mod sync;

pub use cache::{Clock, ManualClock, SystemClock, TtlCache};
pub use config::{ConfigError, PipelineConfig};
pub use daily::{run_daily, run_daily_with, DailyOptions, DailyReport, Delivery};
pub use inference::{
    run_inference, InferenceError, InferenceOptions, InferenceSummary, PredictionRow, SeriesInput,
    PREDICTIONS_FILE,
};
pub use latest::{build_all_latest, LatestArtifact, LatestReader, LatestRow, DEFAULT_LIMIT_ROWS};
pub use manifest::{build_run_manifest, RunManifest, MANIFEST_FILE};
pub use model::{
    load_model_artifacts, ArtifactNames, Classifier, FeatureSpec, LoadedModel, LogisticModel,
    ModelError,
};
pub use notify::{FileOutbox, Notification, Notifier, PublishInfo};
pub use promotion::{promote_to_latest, PromotionError};
pub use publish::{publish_latest_outputs, publish_run_outputs, PublishedLocation};
pub use run_date::{resolve_run_date, RunDateError};
pub use sync::sync_gold_from_config;

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<PipelineConfig>();
        assert_sync::<PipelineConfig>();
        assert_send::<DailyOptions>();
        assert_sync::<DailyOptions>();
    }

    #[test]
    fn model_is_send_sync() {
        assert_send::<LogisticModel>();
        assert_sync::<LogisticModel>();
        assert_send::<LoadedModel>();
        assert_sync::<LoadedModel>();
    }

    #[test]
    fn outputs_are_send_sync() {
        assert_send::<PredictionRow>();
        assert_sync::<PredictionRow>();
        assert_send::<InferenceSummary>();
        assert_sync::<InferenceSummary>();
        assert_send::<RunManifest>();
        assert_sync::<RunManifest>();
        assert_send::<LatestArtifact>();
        assert_sync::<LatestArtifact>();
    }

    #[test]
    fn errors_are_send_sync() {
        assert_send::<InferenceError>();
        assert_sync::<InferenceError>();
        assert_send::<ModelError>();
        assert_sync::<ModelError>();
        assert_send::<PromotionError>();
        assert_sync::<PromotionError>();
        assert_send::<ConfigError>();
        assert_sync::<ConfigError>();
    }

    #[test]
    fn cache_is_send_sync() {
        assert_send::<TtlCache<LatestArtifact>>();
        assert_sync::<TtlCache<LatestArtifact>>();
    }
}
