// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Tuning knobs for the scheduler's main loop (spec.md §4.F.1, §5).
///
/// Grounded in the corpus's small typed `RuntimeConfig` structs rather than
/// loose constants scattered through the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on steps dispatched at once.
    pub max_concurrent_steps: usize,
    /// How long a tick waits on its inbound channels before polling again.
    pub poll_interval: Duration,
    /// Grace period before a cancelled/timed-out executor is force-killed.
    pub grace_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_steps: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            poll_interval: Duration::from_millis(200),
            grace_period: Duration::from_secs(10),
        }
    }
}
