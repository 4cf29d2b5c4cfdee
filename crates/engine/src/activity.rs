// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run append-only activity log (SPEC_FULL.md §10 supplemented
//! feature), grounded in the corpus's `BreadcrumbWriter`: best-effort,
//! write-only during normal operation, failures are logged via `tracing`
//! but never break the scheduler.

use meow_core::{RunId, StepId, StepStatus};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new(logs_dir: impl AsRef<Path>, run_id: &RunId) -> Self {
        Self {
            path: logs_dir.as_ref().join(format!("{}.log", run_id.as_str())),
        }
    }

    /// Append one line recording a step's status transition.
    pub fn record_transition(&self, step_id: &StepId, from: StepStatus, to: StepStatus) {
        self.append(&format!(
            "{} step={} {:?} -> {:?}",
            now_rfc3339(),
            step_id.as_str(),
            from,
            to
        ));
    }

    /// Append a free-form line, for events that aren't a step transition
    /// (run started, run terminated, cancellation requested).
    pub fn record(&self, message: &str) {
        self.append(&format!("{} {}", now_rfc3339(), message));
    }

    fn append(&self, line: &str) {
        let result = self
            .path
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .and_then(|_| {
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)
            })
            .and_then(|mut file| writeln!(file, "{line}"));

        if let Err(e) = result {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write activity log");
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
