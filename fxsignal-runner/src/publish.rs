//! Publish run and latest outputs to an object store.

use anyhow::{bail, Context, Result};
use fxsignal_core::data::ObjectStore;
use std::path::Path;

use crate::config::render_template;
use crate::inference::PREDICTIONS_FILE;
use crate::manifest::MANIFEST_FILE;

/// Files published for every run, in upload order.
pub const PUBLISHED_FILES: [&str; 2] = [PREDICTIONS_FILE, MANIFEST_FILE];

/// Where a publish went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedLocation {
    pub store: String,
    pub prefix: String,
    pub keys: Vec<String>,
}

fn upload_dir(store: &dyn ObjectStore, dir: &Path, prefix: &str) -> Result<Vec<String>> {
    for name in PUBLISHED_FILES {
        let path = dir.join(name);
        if !path.is_file() {
            bail!("cannot publish, file not found: {}", path.display());
        }
    }

    let mut keys = Vec::with_capacity(PUBLISHED_FILES.len());
    for name in PUBLISHED_FILES {
        let path = dir.join(name);
        let bytes = std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        let key = format!("{prefix}{name}");
        let info = store
            .put(&key, &bytes)
            .with_context(|| format!("Failed to publish {} to {}", path.display(), store.describe()))?;
        tracing::info!(key = %info.key, bytes = info.bytes, digest = %info.digest, "published");
        keys.push(key);
    }
    Ok(keys)
}

/// Upload one run directory under `prefix_runs_template`.
pub fn publish_run_outputs(
    store: &dyn ObjectStore,
    run_dir: &Path,
    horizon: &str,
    run_date: &str,
    prefix_runs_template: &str,
) -> Result<PublishedLocation> {
    let prefix = render_template(
        prefix_runs_template,
        &[("horizon", horizon), ("run_date", run_date)],
    );
    let keys = upload_dir(store, run_dir, &prefix)?;
    Ok(PublishedLocation {
        store: store.describe(),
        prefix,
        keys,
    })
}

/// Upload the latest directory under `prefix_latest`.
pub fn publish_latest_outputs(
    store: &dyn ObjectStore,
    latest_dir: &Path,
    horizon: &str,
    prefix_latest: &str,
) -> Result<PublishedLocation> {
    let prefix = render_template(prefix_latest, &[("horizon", horizon)]);
    let keys = upload_dir(store, latest_dir, &prefix)?;
    Ok(PublishedLocation {
        store: store.describe(),
        prefix,
        keys,
    })
}
