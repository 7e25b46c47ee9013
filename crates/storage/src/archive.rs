use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::StorageError;

/// Moves processed files out of the staging area so they are not merged again.
///
/// Archived names are `<UTC timestamp>_<original file name>`.
#[derive(Debug, Clone)]
pub struct Archiver {
    archive_dir: PathBuf,
}

impl Archiver {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Create the archive directory if it does not exist.
    pub fn ensure(&self) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.archive_dir)?;
        Ok(())
    }

    /// Archive `source` stamped with the current time.
    pub fn archive(&self, source: &Path) -> Result<PathBuf, StorageError> {
        self.archive_at(source, Utc::now())
    }

    /// Archive `source` stamped with `at`. Returns the archived path.
    pub fn archive_at(&self, source: &Path, at: DateTime<Utc>) -> Result<PathBuf, StorageError> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StorageError::Other(format!("cannot archive '{}': no file name", source.display()))
            })?;

        self.ensure()?;
        let stamp = at.format("%Y%m%dT%H%M%S%6fZ").to_string();
        let mut target = self.archive_dir.join(format!("{}_{}", stamp, file_name));
        // Same name from two staging subdirectories within one microsecond.
        let mut n = 1;
        while target.exists() {
            target = self.archive_dir.join(format!("{}-{}_{}", stamp, n, file_name));
            n += 1;
        }

        move_file(source, &target)?;
        info!(from = %source.display(), to = %target.display(), "archived file");
        Ok(target)
    }
}

/// Rename, falling back to copy + delete across filesystems.
fn move_file(from: &Path, to: &Path) -> Result<(), StorageError> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    std::fs::copy(from, to)?;
    if let Err(e) = std::fs::remove_file(from) {
        std::fs::remove_file(to).ok();
        return Err(StorageError::Io(e));
    }
    Ok(())
}
