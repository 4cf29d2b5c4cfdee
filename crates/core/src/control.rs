// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The unified inbound message the IPC server and executors send to the
//! scheduler's single-writer channel (spec.md §4.G, §5).
//!
//! These are plain data types; the actual channel plumbing (an
//! `mpsc::Sender<(ControlMessage, oneshot::Sender<Reply>)>` style request/
//! response pair) is assembled in `meow-engine` and `meow-ipc`, both of
//! which depend on `tokio` directly. Keeping this crate free of an async
//! runtime dependency lets `meow-baker` and `meow-storage` stay lean.

use crate::{AgentId, BusEvent, EventFilter, JsonValue, RunId, StepId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Payload of an IPC `step-done{...}` request (spec.md §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDoneRequest {
    pub workflow: RunId,
    pub agent: AgentId,
    pub step: StepId,
    pub outputs: std::collections::HashMap<String, JsonValue>,
    pub notes: Option<String>,
}

/// Result of validating and applying a `step-done` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepDoneOutcome {
    Accepted,
    /// The step does not exist, is not the agent's current step, or is
    /// already terminal — the message is acknowledged but ignored
    /// (idempotent re-delivery, spec.md §8 scenario 4).
    Ignored,
    SchemaMismatch(String),
}

/// Result of an `await-event` request.
#[derive(Debug, Clone)]
pub enum AwaitEventOutcome {
    Matched(BusEvent),
    Timeout,
}

/// Result of a `get-prompt` request.
#[derive(Debug, Clone, Default)]
pub struct GetPromptReply {
    pub prompt: Option<String>,
}

/// Every mutation the IPC server (or an internal executor completion) can
/// make to a run, funneled through the scheduler's single inbound channel
/// so all mutation is sequentially consistent (spec.md §5).
#[derive(Debug, Clone)]
pub enum ControlMessage {
    /// Agent acknowledges receipt of a prompt: `dispatched` -> `running`.
    StepStart { agent: AgentId, step: StepId },
    /// Agent signals completion: `running` -> `completing` -> `done`/`failed`.
    StepDone(StepDoneRequest),
    /// Query the current prompt for an agent's active step.
    GetPrompt { agent: AgentId },
    /// Approve or reject a gate, emitting `gate-approved`/`gate-rejected`.
    Approval {
        gate: String,
        approved: bool,
        notes: Option<String>,
        reason: Option<String>,
    },
    /// Emit an arbitrary custom event.
    Event(BusEvent),
    /// Block until a matching event or timeout.
    AwaitEvent {
        event_type: String,
        filter: EventFilter,
        timeout: Duration,
    },
    /// Cooperative cancellation of the whole run.
    Cancel,
}
