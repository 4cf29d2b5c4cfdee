// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Advisory, OS-level exclusive locking so at most one orchestrator process
//! is ever the writer for a given run (spec.md §4.A "one orchestrator per
//! run"). Grounded in the project's `fs2`-backed lock file idiom: a plain
//! `flock` on a dedicated `<run_id>.lock` file, held for the lifetime of an
//! `RunLock` guard and released on `Drop`.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunLockError {
    #[error("run is already locked by another orchestrator process")]
    Held,
    #[error("lock io error: {0}")]
    Io(#[from] std::io::Error),
}

/// RAII guard over an exclusive `flock` on a run's lock file. Dropping the
/// guard releases the lock; the file itself is left behind (cheap, and lets
/// [`FsRunStore::is_locked`] probe it without needing to create it first).
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Try to acquire the lock at `path`, creating the file if needed.
    /// Non-blocking: returns [`RunLockError::Held`] immediately rather than
    /// waiting, since a held lock means another live orchestrator owns the
    /// run right now.
    pub fn try_acquire(path: &Path) -> Result<Self, RunLockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self {
                file,
                path: path.to_path_buf(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(RunLockError::Held),
            Err(e) => Err(RunLockError::Io(e)),
        }
    }

    /// Whether `path` is currently held by some other process, without
    /// taking the lock ourselves. Used to power orphan-run reporting.
    pub fn is_locked(path: &Path) -> Result<bool, RunLockError> {
        if !path.exists() {
            return Ok(false);
        }
        let file = OpenOptions::new().write(true).open(path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                FileExt::unlock(&file)?;
                Ok(false)
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(true),
            Err(e) => Err(RunLockError::Io(e)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_is_held() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("run.lock");
        let first = RunLock::try_acquire(&path).expect("first acquire");
        let second = RunLock::try_acquire(&path);
        assert!(matches!(second, Err(RunLockError::Held)));
        drop(first);
        RunLock::try_acquire(&path).expect("released after drop");
    }

    #[test]
    fn is_locked_reflects_live_holder() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("run.lock");
        assert!(!RunLock::is_locked(&path).expect("probe"));
        let guard = RunLock::try_acquire(&path).expect("acquire");
        assert!(RunLock::is_locked(&path).expect("probe while held"));
        drop(guard);
        assert!(!RunLock::is_locked(&path).expect("probe after release"));
    }
}
