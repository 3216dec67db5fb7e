//! Pull gold series from the object store onto local disk.

use anyhow::{bail, Context, Result};
use fxsignal_core::data::ObjectStore;
use std::path::{Path, PathBuf};

use crate::config::PipelineConfig;
use crate::inference::write_atomic;

/// Copy one object to `dst`. The download is staged next to `dst` and
/// renamed into place; an empty object is rejected and `dst` is untouched.
pub fn sync_gold_series(store: &dyn ObjectStore, key: &str, dst: &Path) -> Result<u64> {
    let bytes = store
        .get(key)
        .with_context(|| format!("Failed to fetch {key} from {}", store.describe()))?;
    if bytes.is_empty() {
        bail!("downloaded object is empty: {key}");
    }
    write_atomic(dst, &bytes).with_context(|| format!("Failed to write {}", dst.display()))?;
    Ok(bytes.len() as u64)
}

/// Sync every configured series, in series id order.
pub fn sync_gold_from_config(store: &dyn ObjectStore, cfg: &PipelineConfig) -> Result<Vec<PathBuf>> {
    let mut inputs = cfg.series_inputs();
    inputs.sort_by(|a, b| a.series_id.cmp(&b.series_id));

    let mut synced = Vec::with_capacity(inputs.len());
    for input in inputs {
        let key = cfg.gold_key_for(&input.series_id);
        let bytes = sync_gold_series(store, &key, &input.gold_path)?;
        tracing::info!(
            series_id = %input.series_id,
            %key,
            dst = %input.gold_path.display(),
            bytes,
            "synced gold"
        );
        synced.push(input.gold_path);
    }
    Ok(synced)
}
