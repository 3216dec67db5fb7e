//! Atomic promotion of run outputs into the `latest` directory.
//!
//! Every source is checked before anything is touched. Files are copied into
//! a staging directory inside `latest_dir` (same filesystem) and then renamed
//! over their targets, so readers never see a partially written file and a
//! failed promotion leaves the previous outputs in place.

use rand::Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PromotionError {
    #[error("source file not found: {0}")]
    MissingSource(String),

    #[error("invalid target name \"{0}\": must be a plain file name")]
    InvalidName(String),

    #[error("promotion I/O error at {path}: {reason}")]
    Io { path: String, reason: String },
}

fn io_err(path: &Path, e: std::io::Error) -> PromotionError {
    PromotionError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
}

fn staging_dir(latest_dir: &Path) -> PathBuf {
    let tag: u32 = rand::thread_rng().gen();
    latest_dir.join(format!(".tmp_{tag:08x}"))
}

/// Copy each `(source, target name)` into `latest_dir` atomically per file.
/// Returns the promoted paths in input order.
pub fn promote_to_latest(
    latest_dir: &Path,
    files: &[(PathBuf, &str)],
) -> Result<Vec<PathBuf>, PromotionError> {
    for (src, name) in files {
        if !src.is_file() {
            return Err(PromotionError::MissingSource(src.display().to_string()));
        }
        if !is_plain_name(name) {
            return Err(PromotionError::InvalidName((*name).to_string()));
        }
    }

    std::fs::create_dir_all(latest_dir).map_err(|e| io_err(latest_dir, e))?;
    let staging = staging_dir(latest_dir);
    std::fs::create_dir_all(&staging).map_err(|e| io_err(&staging, e))?;

    let result = stage_and_swap(&staging, latest_dir, files);
    if staging.exists() {
        if let Err(e) = std::fs::remove_dir_all(&staging) {
            tracing::warn!(dir = %staging.display(), error = %e, "failed to clean staging dir");
        }
    }

    let promoted = result?;
    tracing::info!(dir = %latest_dir.display(), files = promoted.len(), "promoted to latest");
    Ok(promoted)
}

fn stage_and_swap(
    staging: &Path,
    latest_dir: &Path,
    files: &[(PathBuf, &str)],
) -> Result<Vec<PathBuf>, PromotionError> {
    let mut staged = Vec::with_capacity(files.len());
    for (src, name) in files {
        let tmp = staging.join(name);
        std::fs::copy(src, &tmp).map_err(|e| io_err(src, e))?;
        staged.push((tmp, latest_dir.join(name)));
    }

    let mut promoted = Vec::with_capacity(staged.len());
    for (tmp, dst) in staged {
        std::fs::rename(&tmp, &dst).map_err(|e| io_err(&dst, e))?;
        promoted.push(dst);
    }
    Ok(promoted)
}
