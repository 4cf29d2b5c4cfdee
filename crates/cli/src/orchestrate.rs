// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared plumbing for `run`/`resume`/`daemon`: bake or reload a run, wire up
//! the scheduler and its control socket, and drive it to completion.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use meow_adapters::{AdapterRegistry, InjectionSerializer, TmuxAdapter};
use meow_baker::WorkflowModule;
use meow_core::{IdGen, JsonValue, Run, RunId, RunScope, RunStatus, SystemClock, UuidIdGen};
use meow_engine::{Scheduler, SchedulerConfig};
use meow_ipc::IpcServer;
use meow_shell::ShellRunner;
use meow_storage::{FsRunStore, RunLock, RunStore};

/// Load a workflow template from disk. Templates are plain YAML documents
/// deserializing directly to [`WorkflowModule`] — no bespoke parser, per the
/// template file format being out of scope for the baker itself.
pub fn load_module(template_path: &Path) -> Result<WorkflowModule> {
    let contents = std::fs::read_to_string(template_path)
        .with_context(|| format!("reading template '{}'", template_path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("parsing template '{}'", template_path.display()))
}

/// Bake a fresh [`Run`] from a template and persist it, unstarted.
pub fn create_run(
    store: &FsRunStore,
    template_path: &Path,
    workflow_name: &str,
    module: &WorkflowModule,
    vars: HashMap<String, JsonValue>,
) -> Result<Run> {
    let baked = meow_baker::bake(module, workflow_name, &vars)
        .with_context(|| format!("baking workflow '{workflow_name}'"))?;

    // Stored absolute so a later `resume`/detached `daemon` child, which may
    // run with a different working directory, can still find the template.
    let template_ref = std::fs::canonicalize(template_path)
        .unwrap_or_else(|_| template_path.to_path_buf())
        .to_string_lossy()
        .into_owned();

    let run = Run {
        id: RunId::new(UuidIdGen.next()),
        template_ref,
        workflow_name: workflow_name.to_string(),
        scope: RunScope::Project,
        collection_dir: None,
        default_adapter: "claude".to_string(),
        variables: baked.variables,
        status: RunStatus::Pending,
        started_at: None,
        done_at: None,
        orchestrator_pid: 0,
        steps: baked.steps,
        agents: HashMap::new(),
        cleanup_on_success: baked.cleanup_on_success,
        cleanup_on_failure: baked.cleanup_on_failure,
        cleanup_on_stop: baked.cleanup_on_stop,
    };
    run.validate_references()
        .map_err(|e| anyhow::anyhow!("invalid workflow graph: {e}"))?;

    store.create(&run).context("persisting new run")?;
    Ok(run)
}

/// Build the scheduler for `run`, bind its control socket, and drive it to
/// completion. Used by `run` (freshly baked) and `resume` (reloaded) alike.
pub async fn drive_to_completion(
    project_root: &Path,
    run: Run,
    lock: RunLock,
    module: WorkflowModule,
    store: Arc<dyn RunStore>,
) -> Result<Run> {
    let run_id = run.id.clone();
    let registry = AdapterRegistry::new(Some(project_root.to_path_buf()));
    let sessions = InjectionSerializer::new(TmuxAdapter::new());
    let shell = ShellRunner::new();
    let logs_dir = project_root.join(".meow").join("logs");

    let (scheduler, handle) = Scheduler::new(
        run,
        lock,
        store,
        registry,
        sessions,
        shell,
        module,
        logs_dir,
        SchedulerConfig::default(),
        SystemClock,
        UuidIdGen,
    );

    let sock_path = meow_ipc::socket_path(project_root, &run_id);
    let ipc = IpcServer::bind(sock_path, run_id.clone(), handle)
        .with_context(|| format!("binding control socket for run '{run_id}'"))?;
    let ipc_task = tokio::spawn(ipc.run());

    let result = scheduler.run_to_completion().await;
    ipc_task.abort();

    result.with_context(|| format!("running workflow for run '{run_id}'"))
}

/// Resolve `<project>/.meow/sock/<run_id>.sock` for out-of-process clients
/// (`stop`, `approve`, `event`, `await`).
pub fn socket_path(project_root: &Path, run_id: &RunId) -> PathBuf {
    meow_ipc::socket_path(project_root, run_id)
}
