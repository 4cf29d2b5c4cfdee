// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Builders shared by other crates' test suites, gated behind the
//! `test-support` feature so they never ship in release builds.

use crate::{
    AgentRecord, Run, RunScope, RunStatus, ShellSpec, Step, StepSpec, StepStatus,
};

/// A single-step, otherwise-empty run good enough to round-trip through
/// storage, baking, and scheduling tests without every test hand-rolling one.
pub fn sample_run(id: impl Into<String>) -> Run {
    Run {
        id: id.into().into(),
        template_ref: "sample.yaml".into(),
        workflow_name: "sample".into(),
        scope: RunScope::Project,
        collection_dir: None,
        default_adapter: "claude".into(),
        variables: Default::default(),
        status: RunStatus::Pending,
        started_at: None,
        done_at: None,
        orchestrator_pid: 0,
        steps: vec![sample_step("step-1")],
        agents: Default::default(),
        cleanup_on_success: None,
        cleanup_on_failure: None,
        cleanup_on_stop: None,
    }
}

/// A single pending shell step with no dependencies.
pub fn sample_step(id: impl Into<String>) -> Step {
    Step {
        id: id.into().into(),
        executor: crate::ExecutorKind::Shell,
        status: StepStatus::Pending,
        needs: Default::default(),
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

/// A freshly-spawned agent record with no history.
pub fn sample_agent(id: impl Into<String>, adapter: impl Into<String>, session: impl Into<String>) -> AgentRecord {
    AgentRecord {
        agent_id: id.into().into(),
        adapter_name: adapter.into(),
        session_name: session.into(),
        current_step_id: None,
        last_ack_at: None,
        labels: Default::default(),
    }
}
