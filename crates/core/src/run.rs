// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `Run` data model (spec.md §3.1).

use crate::{AgentId, AgentRecord, JsonValue, RunId, Step, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// A `{{outputs.STEP.KEY}}` reference that cannot resolve against the step
/// graph, caught at bake time rather than left for `TemplateError::Unresolved`
/// at dispatch time (spec.md §4.E Responsibility 4, §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputReferenceError {
    UnknownStep { step: String, target: String },
    NoOutputs { step: String, target: String },
}

impl fmt::Display for OutputReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputReferenceError::UnknownStep { step, target } => {
                write!(f, "step '{step}' references outputs of unknown step '{target}'")
            }
            OutputReferenceError::NoOutputs { step, target } => {
                write!(
                    f,
                    "step '{step}' references outputs of step '{target}', whose executor produces none"
                )
            }
        }
    }
}

impl std::error::Error for OutputReferenceError {}

/// Resolve every `{{outputs.STEP.KEY}}` placeholder in `steps` against the
/// step graph: `STEP` must exist and its executor must actually populate
/// `outputs` (spec.md §4.E Responsibility 4).
pub fn validate_output_references(steps: &[Step]) -> Result<(), OutputReferenceError> {
    let kinds: HashMap<&str, crate::ExecutorKind> =
        steps.iter().map(|s| (s.id.as_str(), s.executor)).collect();
    for step in steps {
        for text in step.spec.template_texts() {
            for path in crate::referenced_paths(&text) {
                let mut segments = path.splitn(3, '.');
                if segments.next() != Some("outputs") {
                    continue;
                }
                let Some(target) = segments.next() else {
                    continue;
                };
                match kinds.get(target) {
                    None => {
                        return Err(OutputReferenceError::UnknownStep {
                            step: step.id.as_str().to_string(),
                            target: target.to_string(),
                        })
                    }
                    Some(kind) if !kind.produces_outputs() => {
                        return Err(OutputReferenceError::NoOutputs {
                            step: step.id.as_str().to_string(),
                            target: target.to_string(),
                        })
                    }
                    Some(_) => {}
                }
            }
        }
    }
    Ok(())
}

/// Where a run's template came from, influencing child (expand/foreach)
/// resolution and adapter-registry precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunScope {
    Project,
    User,
    Embedded,
}

/// Terminal and non-terminal status of a run (spec.md §4.F.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Done,
    Failed,
    Stopped,
}

impl RunStatus {
    /// Whether this status is terminal (no further step may transition, per
    /// the invariant in spec.md §3.1).
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Done | RunStatus::Failed | RunStatus::Stopped)
    }
}

/// A shell fragment run as an external hook (`cleanup_on_success` etc.).
pub type CleanupHook = String;

/// The unit of durable state: a single execution of a baked workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub template_ref: String,
    pub workflow_name: String,
    pub scope: RunScope,
    pub collection_dir: Option<PathBuf>,
    pub default_adapter: String,
    pub variables: HashMap<String, JsonValue>,
    pub status: RunStatus,
    pub started_at: Option<Timestamp>,
    pub done_at: Option<Timestamp>,
    /// Zero when detached/unclaimed; informational, used by `stop`.
    pub orchestrator_pid: u32,
    pub steps: Vec<Step>,
    pub agents: HashMap<AgentId, AgentRecord>,
    pub cleanup_on_success: Option<CleanupHook>,
    pub cleanup_on_failure: Option<CleanupHook>,
    pub cleanup_on_stop: Option<CleanupHook>,
}

impl Run {
    /// Find a step by id.
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id.as_str() == id)
    }

    /// Find a step by id, mutably.
    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id.as_str() == id)
    }

    /// True once every step is in a terminal status (spec.md §4.F.1 step 4).
    pub fn all_steps_terminal(&self) -> bool {
        self.steps.iter().all(|s| s.status.is_terminal())
    }

    /// Whether any step in the run is marked `failed` and is not
    /// `allow_failure` (the run-failure condition from spec.md §4.F.1/§7).
    pub fn has_unallowed_failure(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.status == crate::StepStatus::Failed && !s.allow_failure)
    }

    /// Validate the invariants in spec.md §3.1: no duplicate step ids, and
    /// every cross-reference (`needs`, branch targets) resolves within the run.
    pub fn validate_references(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(format!("duplicate step id: {}", step.id));
            }
        }
        let ids: std::collections::HashSet<&str> =
            self.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &self.steps {
            for need in &step.needs {
                if !ids.contains(need.as_str()) {
                    return Err(format!(
                        "step '{}' needs unknown step '{}'",
                        step.id, need
                    ));
                }
            }
            if let crate::StepSpec::Branch(branch) = &step.spec {
                for target in [&branch.on_true, &branch.on_false] {
                    if let Some(target) = target {
                        if !ids.contains(target.as_str()) {
                            return Err(format!(
                                "branch step '{}' targets unknown step '{}'",
                                step.id, target
                            ));
                        }
                    }
                }
            }
        }
        validate_output_references(&self.steps).map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ShellSpec, StepSpec, StepStatus};

    fn make_step(id: &str, needs: &[&str]) -> Step {
        Step {
            id: id.into(),
            executor: crate::step::ExecutorKind::Shell,
            status: StepStatus::Pending,
            needs: needs.iter().map(|n| crate::StepId::new(*n)).collect(),
            spec: StepSpec::Shell(ShellSpec {
                command: "true".into(),
                workdir: None,
                env: Default::default(),
                timeout_secs: None,
            }),
            outputs: Default::default(),
            error: None,
            started_at: None,
            finished_at: None,
            parent_step_id: None,
            allow_failure: false,
        }
    }

    fn make_run(steps: Vec<Step>) -> Run {
        Run {
            id: "run-1".into(),
            template_ref: "t".into(),
            workflow_name: "w".into(),
            scope: RunScope::Project,
            collection_dir: None,
            default_adapter: "claude".into(),
            variables: Default::default(),
            status: RunStatus::Pending,
            started_at: None,
            done_at: None,
            orchestrator_pid: 0,
            steps,
            agents: Default::default(),
            cleanup_on_success: None,
            cleanup_on_failure: None,
            cleanup_on_stop: None,
        }
    }

    #[test]
    fn detects_duplicate_step_ids() {
        let run = make_run(vec![make_step("a", &[]), make_step("a", &[])]);
        assert!(run.validate_references().is_err());
    }

    #[test]
    fn detects_unknown_needs_target() {
        let run = make_run(vec![make_step("a", &["ghost"])]);
        assert!(run.validate_references().is_err());
    }

    #[test]
    fn accepts_well_formed_graph() {
        let run = make_run(vec![make_step("a", &[]), make_step("b", &["a"])]);
        assert!(run.validate_references().is_ok());
    }

    #[test]
    fn all_steps_terminal_false_when_pending() {
        let run = make_run(vec![make_step("a", &[])]);
        assert!(!run.all_steps_terminal());
    }

    #[test]
    fn accepts_valid_output_reference_to_shell_step() {
        let mut consumer = make_step("b", &["a"]);
        consumer.spec = StepSpec::Shell(ShellSpec {
            command: "cat {{outputs.a.path}}".into(),
            workdir: None,
            env: Default::default(),
            timeout_secs: None,
        });
        let run = make_run(vec![make_step("a", &[]), consumer]);
        assert!(run.validate_references().is_ok());
    }

    #[test]
    fn rejects_output_reference_to_unknown_step() {
        let mut consumer = make_step("b", &[]);
        consumer.spec = StepSpec::Shell(ShellSpec {
            command: "cat {{outputs.ghost.path}}".into(),
            workdir: None,
            env: Default::default(),
            timeout_secs: None,
        });
        let run = make_run(vec![consumer]);
        assert!(run.validate_references().is_err());
    }

    #[test]
    fn rejects_output_reference_to_a_non_output_producing_step() {
        let branch = Step {
            id: "cond".into(),
            executor: crate::step::ExecutorKind::Branch,
            status: StepStatus::Pending,
            needs: Vec::new(),
            spec: StepSpec::Branch(crate::BranchSpec {
                condition: "true".into(),
                on_true: None,
                on_false: None,
            }),
            outputs: Default::default(),
            error: None,
            started_at: None,
            finished_at: None,
            parent_step_id: None,
            allow_failure: false,
        };
        let mut consumer = make_step("b", &["cond"]);
        consumer.spec = StepSpec::Shell(ShellSpec {
            command: "cat {{outputs.cond.path}}".into(),
            workdir: None,
            env: Default::default(),
            timeout_secs: None,
        });
        let run = make_run(vec![branch, consumer]);
        assert!(run.validate_references().is_err());
    }

    #[test]
    fn run_status_terminal_classification() {
        assert!(RunStatus::Done.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Stopped.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
    }
}
