// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Step` data model and the seven executor kinds (spec.md §3.2, §4.F.3).

use crate::{JsonValue, StepId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Tag for which executor a step dispatches to. Kept distinct from
/// [`StepSpec`] so protocol/DTO code can match on the kind without pulling
/// in the associated configuration (mirrors the project's tag-only DTO
/// convention, e.g. `StepStatusKind`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Shell,
    Spawn,
    Kill,
    Expand,
    Foreach,
    Branch,
    Agent,
}

/// Step status state machine (spec.md §4.F.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Dispatched,
    Running,
    Completing,
    Done,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepStatus::Done | StepStatus::Failed | StepStatus::Skipped)
    }

    /// Whether `next` is a legal transition from `self`, per the state
    /// machine diagram in spec.md §4.F.2 (cancellation may jump from any
    /// non-terminal status to `Skipped`).
    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        if next == Skipped {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Ready)
                | (Ready, Dispatched)
                | (Dispatched, Running)
                | (Running, Completing)
                | (Completing, Done)
                | (Completing, Failed)
                // a step may fail its dispatch before an executor ever acks
                | (Dispatched, Failed)
                | (Running, Failed)
        )
    }
}

/// Policy for how a `foreach` step reacts to a failing child (spec.md §9
/// Open Questions: made an explicit per-step field, default `Abort`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Continue,
}

/// A structured error recorded on a failed step (spec.md §3.2, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Storage,
    Executor,
    Timeout,
    Ipc,
    Cancelled,
    InvariantViolation,
}

/// `shell` executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellSpec {
    pub command: String,
    pub workdir: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub timeout_secs: Option<u64>,
}

impl ShellSpec {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// `spawn` executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnSpec {
    pub adapter: Option<String>,
    pub workdir: PathBuf,
    pub prompt: String,
}

/// `kill` executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KillSpec {
    pub agent_id: Option<String>,
    pub session_name: Option<String>,
    #[serde(default = "default_true")]
    pub graceful: bool,
}

fn default_true() -> bool {
    true
}

/// `expand` executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandSpec {
    pub template: Option<String>,
    pub workflow_name: String,
    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,
}

/// `foreach` executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeachSpec {
    /// Template expression evaluating to a JSON array, e.g. `{{var.items}}`.
    pub items: String,
    pub item_var: String,
    #[serde(default)]
    pub index_var: Option<String>,
    pub template: Option<String>,
    pub workflow_name: String,
    #[serde(default)]
    pub variables: HashMap<String, JsonValue>,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

/// `branch` executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchSpec {
    pub condition: String,
    pub on_true: Option<StepId>,
    pub on_false: Option<StepId>,
}

/// `agent` executor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSpec {
    pub agent_id: String,
    pub prompt: String,
    /// Output keys the agent is expected to report; used to validate
    /// `step-done` payloads.
    #[serde(default)]
    pub outputs_schema: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl AgentSpec {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Executor-specific configuration, tagged by [`ExecutorKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "executor", rename_all = "snake_case")]
pub enum StepSpec {
    Shell(ShellSpec),
    Spawn(SpawnSpec),
    Kill(KillSpec),
    Expand(ExpandSpec),
    Foreach(ForeachSpec),
    Branch(BranchSpec),
    Agent(AgentSpec),
}

impl StepSpec {
    pub fn kind(&self) -> ExecutorKind {
        match self {
            StepSpec::Shell(_) => ExecutorKind::Shell,
            StepSpec::Spawn(_) => ExecutorKind::Spawn,
            StepSpec::Kill(_) => ExecutorKind::Kill,
            StepSpec::Expand(_) => ExecutorKind::Expand,
            StepSpec::Foreach(_) => ExecutorKind::Foreach,
            StepSpec::Branch(_) => ExecutorKind::Branch,
            StepSpec::Agent(_) => ExecutorKind::Agent,
        }
    }

    /// Every `{{...}}`-bearing text field of this step's configuration, for
    /// bake-time reference validation (spec.md §4.E Responsibility 4).
    pub fn template_texts(&self) -> Vec<String> {
        let mut out = Vec::new();
        match self {
            StepSpec::Shell(s) => {
                out.push(s.command.clone());
                if let Some(workdir) = &s.workdir {
                    out.push(workdir.to_string_lossy().into_owned());
                }
                out.extend(s.env.values().cloned());
            }
            StepSpec::Spawn(s) => {
                if let Some(adapter) = &s.adapter {
                    out.push(adapter.clone());
                }
                out.push(s.workdir.to_string_lossy().into_owned());
                out.push(s.prompt.clone());
            }
            StepSpec::Kill(s) => {
                if let Some(agent_id) = &s.agent_id {
                    out.push(agent_id.clone());
                }
                if let Some(session_name) = &s.session_name {
                    out.push(session_name.clone());
                }
            }
            StepSpec::Expand(s) => {
                if let Some(template) = &s.template {
                    out.push(template.clone());
                }
                push_json_strings(&s.variables, &mut out);
            }
            StepSpec::Foreach(s) => {
                out.push(s.items.clone());
                if let Some(template) = &s.template {
                    out.push(template.clone());
                }
                push_json_strings(&s.variables, &mut out);
            }
            StepSpec::Branch(s) => out.push(s.condition.clone()),
            StepSpec::Agent(s) => {
                out.push(s.agent_id.clone());
                out.push(s.prompt.clone());
            }
        }
        out
    }
}

fn push_json_strings(vars: &HashMap<String, JsonValue>, out: &mut Vec<String>) {
    for value in vars.values() {
        push_json_value_strings(value, out);
    }
}

fn push_json_value_strings(value: &JsonValue, out: &mut Vec<String>) {
    match value {
        JsonValue::String(s) => out.push(s.clone()),
        JsonValue::Array(items) => items.iter().for_each(|v| push_json_value_strings(v, out)),
        JsonValue::Object(map) => map.values().for_each(|v| push_json_value_strings(v, out)),
        JsonValue::Null | JsonValue::Bool(_) | JsonValue::Number(_) => {}
    }
}

impl ExecutorKind {
    /// Whether a step of this kind ever populates `step.outputs`, i.e.
    /// whether `{{outputs.<step>.*}}` may legally target it (spec.md §4.E
    /// Responsibility 4). `branch`/`kill`/`expand`/`foreach` never do.
    pub fn produces_outputs(self) -> bool {
        matches!(self, ExecutorKind::Shell | ExecutorKind::Spawn | ExecutorKind::Agent)
    }
}

/// A node in the run's execution graph (spec.md §3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub executor: ExecutorKind,
    pub status: StepStatus,
    pub needs: HashSet<StepId>,
    pub spec: StepSpec,
    #[serde(default)]
    pub outputs: HashMap<String, JsonValue>,
    pub error: Option<StepError>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub parent_step_id: Option<StepId>,
    /// When `true`, this step failing does not fail the whole run
    /// (spec.md §7 propagation policy; field added per SPEC_FULL.md §10).
    #[serde(default)]
    pub allow_failure: bool,
}

impl Step {
    /// Whether `needs` are all satisfied: every dependency is `Done` (a
    /// `Failed`/`Skipped` dependency should route this step to `Skipped`
    /// rather than `Ready`, handled by the scheduler).
    pub fn needs_satisfied(&self, lookup: impl Fn(&StepId) -> Option<StepStatus>) -> bool {
        self.needs
            .iter()
            .all(|id| lookup(id) == Some(StepStatus::Done))
    }

    /// Whether any dependency is terminal-but-not-done (failed/skipped),
    /// meaning this step should be skipped rather than promoted.
    pub fn has_failed_dependency(&self, lookup: impl Fn(&StepId) -> Option<StepStatus>) -> bool {
        self.needs.iter().any(|id| {
            matches!(
                lookup(id),
                Some(StepStatus::Failed) | Some(StepStatus::Skipped)
            )
        })
    }
}
