//! Single-writer guard for a log directory

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::debug;

use crate::error::{EventLogError, EventLogResult};

/// Name of the lock file; dotfiles are ignored when scanning for logs
pub const LOCK_FILE_NAME: &str = ".writer.lock";

/// Exclusive advisory lock held by the process that appends to a directory
///
/// The lock is tied to the open file handle and goes away with it, so a
/// crashed writer never leaves the directory locked.
#[derive(Debug)]
pub struct DirectoryLock {
    _file: File,
    path: PathBuf,
}

impl DirectoryLock {
    /// Take the lock on `dir` without waiting
    pub fn acquire(dir: &Path) -> EventLogResult<Self> {
        let path = dir.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                EventLogError::io(format!("failed to open lock {}: {}", path.display(), e))
            })?;

        if file.try_lock_exclusive().is_err() {
            return Err(EventLogError::DirectoryLocked(dir.display().to_string()));
        }

        debug!(path = %path.display(), "log directory locked");
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Whether a directory entry belongs to the log sequence
pub(crate) fn is_log_entry(name: &str) -> bool {
    !name.starts_with('.')
}
