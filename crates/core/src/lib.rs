// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared types for the MEOW workflow orchestrator.
//!
//! This crate holds the data model (`Run`, `Step`, `AgentRecord`), id
//! newtypes, the clock abstraction, the JSON value helpers used by template
//! substitution, and the cross-cutting `ControlMessage`/event-bus shapes
//! that tie the IPC server to the scheduler without either depending on the
//! other's internals.

#[macro_use]
mod id;
mod agent;
mod bus;
mod clock;
mod control;
mod error;
mod run;
mod step;
#[cfg(feature = "test-support")]
pub mod test_support;
mod value;

pub use agent::AgentRecord;
pub use bus::{BusEvent, EventFilter, EVENT_GATE_APPROVED, EVENT_GATE_REJECTED};
pub use clock::{Clock, FixedClock, SystemClock};
pub use control::{
    AwaitEventOutcome, ControlMessage, GetPromptReply, StepDoneOutcome, StepDoneRequest,
};
pub use error::{Cancelled, StructuredError};
pub use id::{AgentId, IdGen, RunId, SequentialIdGen, ShortId, StepId, UuidIdGen};
pub use run::{validate_output_references, OutputReferenceError, Run, RunScope, RunStatus};
pub use step::{
    AgentSpec, BranchSpec, ErrorKind, ExecutorKind, ExpandSpec, FailurePolicy, ForeachSpec,
    KillSpec, ShellSpec, SpawnSpec, Step, StepError, StepSpec, StepStatus,
};
pub use value::{get_path, referenced_paths, render_template, set_path, TemplateError};

/// Alias for the JSON-value sum type used for step outputs and variables.
pub type JsonValue = serde_json::Value;
/// Alias for the timestamp type used throughout the data model.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
