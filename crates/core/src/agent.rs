// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `AgentRecord` data model (spec.md §3.3).

use crate::{AgentId, StepId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-spawned-agent bookkeeping, stable across orchestrator resumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub adapter_name: String,
    /// Terminal-multiplexer session handle.
    pub session_name: String,
    pub current_step_id: Option<StepId>,
    pub last_ack_at: Option<Timestamp>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}
