//! Advisory lock on a data directory.
//!
//! ```text
//! <data_dir>/
//! ├─ LOCK            # held by the running server
//! ├─ states.log
//! ├─ accounts.json
//! └─ accounts.lock   # held briefly around each accounts update
//! ```
//!
//! The state log is only ever replayed once, on open, so a second process
//! appending to it would diverge from the first. [`DirectoryLock`] makes the
//! process that owns the log exclusive.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";

pub(crate) fn open_lock_file(path: &Path) -> StoreResult<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Exclusive ownership of a data directory, released on drop.
#[derive(Debug)]
pub struct DirectoryLock {
    path: PathBuf,
    _file: File,
}

impl DirectoryLock {
    /// Locks `dir`, creating it if needed. Does not wait.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the lock.
    pub fn acquire(dir: &Path) -> StoreResult<Self> {
        let path = dir.join(LOCK_FILE);
        let file = open_lock_file(&path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked(dir.to_path_buf()));
        }
        Ok(Self { path, _file: file })
    }

    /// Returns the path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
