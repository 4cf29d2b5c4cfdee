// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `RunStore` trait and its filesystem-backed implementation, rooted at
//! `<project>/.meow/` (spec.md §4.A).

use crate::atomic::{load_yaml, save_yaml};
use crate::lock::{RunLock, RunLockError};
use meow_core::{Run, RunId, RunStatus};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("run '{0}' not found")]
    NotFound(RunId),
    #[error("run '{0}' already exists")]
    AlreadyExists(RunId),
    #[error(transparent)]
    Lock(#[from] RunLockError),
}

/// Optional predicate for [`RunStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<RunStatus>,
}

impl ListFilter {
    pub fn matches(&self, run: &Run) -> bool {
        self.status.map(|s| s == run.status).unwrap_or(true)
    }
}

/// Durable storage for runs: create/get/save/list, plus the per-run
/// exclusive lock that enforces "one orchestrator per run" (spec.md §4.A).
pub trait RunStore: Send + Sync {
    fn create(&self, run: &Run) -> Result<(), StorageError>;
    fn get(&self, id: &RunId) -> Result<Run, StorageError>;
    fn save(&self, run: &Run) -> Result<(), StorageError>;
    fn list(&self, filter: &ListFilter) -> Result<Vec<Run>, StorageError>;
    fn acquire_lock(&self, id: &RunId) -> Result<RunLock, StorageError>;
    fn is_locked(&self, id: &RunId) -> Result<bool, StorageError>;
}

/// Filesystem `RunStore`: one `<run_id>.yaml` + `<run_id>.lock` pair per run
/// under `<root>/.meow/runs/`.
#[derive(Debug, Clone)]
pub struct FsRunStore {
    root: PathBuf,
}

impl FsRunStore {
    /// `project_dir` is the directory containing the project's `.meow/`
    /// state directory (typically the workflow's working directory).
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: project_dir.into().join(".meow").join("runs"),
        }
    }

    fn run_path(&self, id: &RunId) -> PathBuf {
        self.root.join(format!("{}.yaml", id.as_str()))
    }

    fn lock_path(&self, id: &RunId) -> PathBuf {
        self.root.join(format!("{}.lock", id.as_str()))
    }
}

impl RunStore for FsRunStore {
    fn create(&self, run: &Run) -> Result<(), StorageError> {
        let path = self.run_path(&run.id);
        if path.exists() {
            return Err(StorageError::AlreadyExists(run.id.clone()));
        }
        save_yaml(&path, run)?;
        Ok(())
    }

    fn get(&self, id: &RunId) -> Result<Run, StorageError> {
        load_yaml(&self.run_path(id))?.ok_or_else(|| StorageError::NotFound(id.clone()))
    }

    fn save(&self, run: &Run) -> Result<(), StorageError> {
        save_yaml(&self.run_path(&run.id), run)?;
        Ok(())
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<Run>, StorageError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            if let Some(run) = load_yaml::<Run>(&path)? {
                if filter.matches(&run) {
                    runs.push(run);
                }
            }
        }
        runs.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        Ok(runs)
    }

    fn acquire_lock(&self, id: &RunId) -> Result<RunLock, StorageError> {
        Ok(RunLock::try_acquire(&self.lock_path(id))?)
    }

    fn is_locked(&self, id: &RunId) -> Result<bool, StorageError> {
        Ok(RunLock::is_locked(&self.lock_path(id))?)
    }
}

/// Runs whose lock file is unheld but whose status is still non-terminal —
/// the orchestrator that owned them died without reaching a terminal state
/// (supplemented feature, SPEC_FULL.md §10).
pub fn list_orphaned(store: &dyn RunStore, root: &Path) -> Result<Vec<Run>, StorageError> {
    let _ = root;
    let runs = store.list(&ListFilter::default())?;
    let mut orphaned = Vec::new();
    for run in runs {
        if run.status.is_terminal() {
            continue;
        }
        if !store.is_locked(&run.id)? {
            orphaned.push(run);
        }
    }
    Ok(orphaned)
}
