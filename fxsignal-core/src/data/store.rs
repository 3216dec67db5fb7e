//! Object storage abstraction.
//!
//! Layers address byte blobs by `/`-separated keys. `LocalStore` maps keys
//! onto a directory tree with atomic writes; `MemoryStore` backs tests. An S3
//! client slots in behind the same trait.

use super::DataError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// What a successful put stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub key: String,
    pub bytes: u64,
    /// BLAKE3 hex digest of the stored content.
    pub digest: String,
}

impl ObjectInfo {
    fn for_content(key: &str, bytes: &[u8]) -> Self {
        Self {
            key: key.to_string(),
            bytes: bytes.len() as u64,
            digest: blake3::hash(bytes).to_hex().to_string(),
        }
    }
}

pub trait ObjectStore: Send + Sync {
    /// Human-readable location, used in logs.
    fn describe(&self) -> String;

    fn get(&self, key: &str) -> Result<Vec<u8>, DataError>;

    fn put(&self, key: &str, bytes: &[u8]) -> Result<ObjectInfo, DataError>;

    /// All keys beginning with `prefix`, sorted ascending.
    fn list(&self, prefix: &str) -> Result<Vec<String>, DataError>;

    fn exists(&self, key: &str) -> Result<bool, DataError>;

    /// Remove an object. `Ok(false)` when there was nothing to remove.
    fn delete(&self, key: &str) -> Result<bool, DataError>;
}

fn validate_key(key: &str) -> Result<(), DataError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.ends_with('/')
        || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(DataError::ValidationError(format!("invalid object key '{key}'")));
    }
    Ok(())
}

// ── Local filesystem ────────────────────────────────────────────────

/// Filesystem-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem path backing `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, DataError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.root.clone(), |p, seg| p.join(seg)))
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), DataError> {
        let entries = fs::read_dir(dir)
            .map_err(|e| DataError::StorageError(format!("read dir {}: {e}", dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| DataError::StorageError(format!("dir entry: {e}")))?;
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, out)?;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
                continue;
            }
            if let Ok(rel) = path.strip_prefix(&self.root) {
                let key: Vec<String> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(key.join("/"));
            }
        }
        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, DataError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(DataError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(DataError::StorageError(format!("read {}: {e}", path.display()))),
        }
    }

    /// Write to `<path>.tmp`, then rename into place.
    fn put(&self, key: &str, bytes: &[u8]) -> Result<ObjectInfo, DataError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| DataError::StorageError(format!("failed to create dir: {e}")))?;
        }
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, bytes)
            .map_err(|e| DataError::StorageError(format!("write {}: {e}", tmp_path.display())))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            DataError::StorageError(format!("atomic rename failed: {e}"))
        })?;

        Ok(ObjectInfo::for_content(key, bytes))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, DataError> {
        // Walk from the deepest directory the prefix fully names
        let dir_part = match prefix.rfind('/') {
            Some(idx) => &prefix[..idx],
            None => "",
        };
        let start = if dir_part.is_empty() {
            self.root.clone()
        } else {
            self.path_for(dir_part)?
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        self.walk(&start, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn exists(&self, key: &str) -> Result<bool, DataError> {
        Ok(self.path_for(key)?.is_file())
    }

    fn delete(&self, key: &str) -> Result<bool, DataError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DataError::StorageError(format!("remove {}: {e}", path.display()))),
        }
    }
}

// ── In-memory ───────────────────────────────────────────────────────

/// Map-backed store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>, DataError> {
        self.objects
            .lock()
            .map_err(|_| DataError::StorageError("memory store lock poisoned".into()))
    }
}

impl ObjectStore for MemoryStore {
    fn describe(&self) -> String {
        "memory://".to_string()
    }

    fn get(&self, key: &str) -> Result<Vec<u8>, DataError> {
        validate_key(key)?;
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| DataError::NotFound {
                key: key.to_string(),
            })
    }

    fn put(&self, key: &str, bytes: &[u8]) -> Result<ObjectInfo, DataError> {
        validate_key(key)?;
        self.lock()?.insert(key.to_string(), bytes.to_vec());
        Ok(ObjectInfo::for_content(key, bytes))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, DataError> {
        Ok(self
            .lock()?
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn exists(&self, key: &str) -> Result<bool, DataError> {
        validate_key(key)?;
        Ok(self.lock()?.contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<bool, DataError> {
        validate_key(key)?;
        Ok(self.lock()?.remove(key).is_some())
    }
}
