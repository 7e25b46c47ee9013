use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use skusync_core::ObjectKey;

use crate::error::StorageError;

/// Keys whose download failed and must be fetched again, inside the work
/// directory.
pub const RETRY_FILE: &str = "retry.json";

/// Local directory holding fetched-but-not-yet-merged objects.
///
/// Each object lives at `<root>/<key>`, so the layout mirrors the remote.
/// In-flight downloads and bookkeeping live in a separate work directory
/// (`<root>.work`), so every file under the root is a real object whatever
/// its name.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
    work: PathBuf,
}

fn work_dir_for(root: &Path) -> PathBuf {
    match root.file_name() {
        Some(name) => {
            let mut name: OsString = name.to_os_string();
            name.push(".work");
            root.with_file_name(name)
        }
        // `/` or `..`: fall back to a nested directory the walk skips
        None => root.join(".work"),
    }
}

/// Flatten a key into one file name; `%` is escaped first so the mapping
/// stays injective.
fn partial_name(key: &ObjectKey) -> String {
    format!("{}.part", key.as_str().replace('%', "%25").replace('/', "%2F"))
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let work = work_dir_for(&root);
        Self { root, work }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn work_dir(&self) -> &Path {
        &self.work
    }

    /// Create the staging and work directories if they do not exist.
    pub fn ensure(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.work)?;
        Ok(())
    }

    /// Where `key` is staged.
    pub fn path_for(&self, key: &ObjectKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    /// Write `data` for `key`: temp file in the work directory first, then
    /// rename into place, so a crashed or timed-out download never leaves a
    /// truncated staged file.
    pub async fn write_atomic(&self, key: &ObjectKey, data: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::create_dir_all(&self.work).await?;

        let tmp = self.work.join(partial_name(key));
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(StorageError::Io(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(StorageError::Io(e));
        }

        debug!(key = %key, path = %path.display(), bytes = data.len(), "staged object");
        Ok(path)
    }

    /// All staged files in file-name order (stable across runs).
    pub fn list_files(&self) -> Vec<PathBuf> {
        if !self.root.exists() {
            return Vec::new();
        }

        let work = self.work.as_path();
        walkdir::WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.path() != work)
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }

    /// Keys recorded by [`StagingArea::save_retry_keys`]; empty when none were.
    pub fn load_retry_keys(&self) -> Result<BTreeSet<ObjectKey>, StorageError> {
        let path = self.work.join(RETRY_FILE);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Replace the retry list with `keys`. An empty set removes the file.
    pub fn save_retry_keys(&self, keys: &BTreeSet<ObjectKey>) -> Result<(), StorageError> {
        let path = self.work.join(RETRY_FILE);
        if keys.is_empty() {
            return match std::fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }

        std::fs::create_dir_all(&self.work)?;
        let tmp = self.work.join(format!("{RETRY_FILE}.part"));
        std::fs::write(&tmp, serde_json::to_vec(keys)?)?;
        std::fs::rename(&tmp, &path)?;
        info!(count = keys.len(), path = %path.display(), "recorded objects to retry");
        Ok(())
    }
}
