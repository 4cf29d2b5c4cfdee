// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The scheduler (spec.md §4.F): the single writer of a run's in-memory
//! state. Every mutation — a reconciled step transition, a background
//! effect's completion, an IPC-delivered control message — funnels through
//! one task's main loop, exactly the way the corpus's `Runtime`/`Executor`
//! pair serializes effect completions through one `mpsc` channel rather than
//! locking shared state from arbitrary tasks.

use crate::activity::ActivityLog;
use crate::bus::EventBus;
use crate::config::SchedulerConfig;
use crate::dispatch::{self, Completion, StepOutcome};
use crate::error::SchedulerError;
use crate::template;
use meow_adapters::{AdapterRegistry, InjectionSerializer, SessionAdapter};
use meow_baker::WorkflowModule;
use meow_core::{
    AgentId, AgentRecord, Clock, ControlMessage, ErrorKind, GetPromptReply, IdGen, Run, RunStatus,
    StepDoneOutcome, StepError, StepId, StepSpec, StepStatus,
};
use meow_shell::ShellRunner;
use meow_storage::{RunLock, RunStore};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Reply to a control message, carried back over the per-request oneshot.
#[derive(Debug, Clone)]
pub enum ControlReply {
    Ack,
    Error(String),
    Prompt(GetPromptReply),
    StepDone(StepDoneOutcome),
    Event(meow_core::AwaitEventOutcome),
}

/// Handle for submitting control messages to a running scheduler, cloned
/// into `meow-ipc` connection handlers.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<(ControlMessage, oneshot::Sender<ControlReply>)>,
}

impl SchedulerHandle {
    pub async fn send(&self, message: ControlMessage) -> Result<ControlReply, SchedulerError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send((message, tx))
            .await
            .map_err(|_| SchedulerError::ChannelClosed)?;
        rx.await.map_err(|_| SchedulerError::ChannelClosed)
    }
}

/// The run scheduler. Generic over the session adapter, clock, and id
/// generator because [`meow_core::Clock`] and [`meow_core::IdGen`] both
/// require `Clone`, which makes them non-object-safe — mirroring the
/// corpus's own `Executor<S, A, N, C: Clock>` shape rather than boxing them.
pub struct Scheduler<S: SessionAdapter, C: Clock, G: IdGen> {
    run: Run,
    _lock: RunLock,
    store: Arc<dyn RunStore>,
    registry: AdapterRegistry,
    sessions: InjectionSerializer<S>,
    shell: ShellRunner,
    module: WorkflowModule,
    bus: Arc<EventBus>,
    activity: ActivityLog,
    config: SchedulerConfig,
    clock: C,
    id_gen: G,
    inbound_rx: mpsc::Receiver<(ControlMessage, oneshot::Sender<ControlReply>)>,
    completions_tx: mpsc::Sender<Completion>,
    completions_rx: mpsc::Receiver<Completion>,
    inflight: HashSet<StepId>,
    cancelled: bool,
    cancel_token: CancellationToken,
}

impl<S: SessionAdapter, C: Clock, G: IdGen> Scheduler<S, C, G> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run: Run,
        lock: RunLock,
        store: Arc<dyn RunStore>,
        registry: AdapterRegistry,
        sessions: InjectionSerializer<S>,
        shell: ShellRunner,
        module: WorkflowModule,
        logs_dir: impl Into<PathBuf>,
        config: SchedulerConfig,
        clock: C,
        id_gen: G,
    ) -> (Self, SchedulerHandle) {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (completions_tx, completions_rx) = mpsc::channel(64);
        let activity = ActivityLog::new(logs_dir.into(), &run.id);
        let scheduler = Self {
            run,
            _lock: lock,
            store,
            registry,
            sessions,
            shell,
            module,
            bus: Arc::new(EventBus::new()),
            activity,
            config,
            clock,
            id_gen,
            inbound_rx,
            completions_tx,
            completions_rx,
            inflight: HashSet::new(),
            cancelled: false,
            cancel_token: CancellationToken::new(),
        };
        (scheduler, SchedulerHandle { tx: inbound_tx })
    }

    /// Drive the run to a terminal status, persisting after every tick.
    pub async fn run_to_completion(mut self) -> Result<Run, SchedulerError> {
        self.activity.record("run started");
        self.run.status = RunStatus::Running;
        self.run.started_at = Some(self.clock.now());
        self.persist()?;

        loop {
            self.check_timeouts();
            self.reconcile();
            self.dispatch_ready();

            if self.run.all_steps_terminal() {
                self.finalize().await;
                self.persist()?;
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                Some((message, reply)) = self.inbound_rx.recv() => {
                    self.handle_control(message, reply);
                }
                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion);
                }
            }
            self.persist()?;
        }

        Ok(self.run)
    }

    fn persist(&self) -> Result<(), SchedulerError> {
        self.store.save(&self.run).map_err(SchedulerError::from)
    }

    fn context(&self) -> serde_json::Value {
        template::build_context(&self.run, None, None)
    }

    /// Promote `pending` steps whose dependencies are satisfied to `ready`,
    /// and skip ones with a failed/skipped dependency (spec.md §4.F.1 step 1).
    fn reconcile(&mut self) {
        let statuses: HashMap<StepId, StepStatus> = self
            .run
            .steps
            .iter()
            .map(|s| (s.id.clone(), s.status))
            .collect();

        let mut to_skip = Vec::new();
        let mut to_ready = Vec::new();
        for step in &self.run.steps {
            if step.status != StepStatus::Pending {
                continue;
            }
            let lookup = |id: &StepId| statuses.get(id).copied();
            if step.has_failed_dependency(lookup) {
                to_skip.push(step.id.as_str().to_string());
            } else if step.needs_satisfied(lookup) {
                to_ready.push(step.id.as_str().to_string());
            }
        }
        for id in to_skip {
            self.transition_step(&id, StepStatus::Skipped);
        }
        for id in to_ready {
            self.transition_step(&id, StepStatus::Ready);
        }
    }

    /// Fail any `dispatched`/`running` step (agent or otherwise) whose
    /// timeout has elapsed. Approximated against dispatch time rather than
    /// the precise moment an agent's `step-start` arrived.
    fn check_timeouts(&mut self) {
        let now = self.clock.now();
        let mut timed_out = Vec::new();
        for step in &self.run.steps {
            if !matches!(step.status, StepStatus::Dispatched | StepStatus::Running) {
                continue;
            }
            let timeout_secs = match &step.spec {
                StepSpec::Agent(spec) => spec.timeout_secs,
                StepSpec::Shell(spec) => spec.timeout_secs,
                _ => None,
            };
            let (Some(secs), Some(started)) = (timeout_secs, step.started_at) else {
                continue;
            };
            if now.signed_duration_since(started) >= chrono::Duration::seconds(secs as i64) {
                timed_out.push(step.id.as_str().to_string());
            }
        }
        for id in timed_out {
            self.fail_step(
                &id,
                ErrorKind::Timeout,
                "step exceeded its configured timeout".to_string(),
            );
            if let Some(agent_id) = self.agent_for_step(&id) {
                if let Some(agent) = self.run.agents.get_mut(&agent_id) {
                    agent.current_step_id = None;
                }
            }
        }
    }

    fn agent_for_step(&self, step_id: &str) -> Option<AgentId> {
        self.run
            .agents
            .values()
            .find(|a| a.current_step_id.as_ref().map(|s| s.as_str()) == Some(step_id))
            .map(|a| a.agent_id.clone())
    }

    fn dispatch_ready(&mut self) {
        let capacity = self.config.max_concurrent_steps.saturating_sub(self.inflight.len());
        if capacity == 0 {
            return;
        }
        let ready_ids: Vec<String> = self
            .run
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Ready)
            .take(capacity)
            .map(|s| s.id.as_str().to_string())
            .collect();
        for id in ready_ids {
            self.dispatch_step(&id);
        }
    }

    fn dispatch_step(&mut self, id: &str) {
        let Some(step) = self.run.step(id) else {
            return;
        };
        let spec = step.spec.clone();
        let ctx = self.context();

        match spec {
            StepSpec::Shell(spec) => {
                let command = match template::render_string(&spec.command, &ctx) {
                    Ok(c) => c,
                    Err(e) => return self.dispatch_fail(id, e),
                };
                let workdir = match spec.workdir.as_ref() {
                    Some(dir) => match self.render_path(dir, &ctx) {
                        Ok(p) => p,
                        Err(e) => return self.dispatch_fail(id, e),
                    },
                    None => self.run.collection_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
                };
                let mut env = HashMap::new();
                for (k, v) in &spec.env {
                    match template::render_string(v, &ctx) {
                        Ok(v) => {
                            env.insert(k.clone(), v);
                        }
                        Err(e) => return self.dispatch_fail(id, e),
                    }
                }
                self.transition_step(id, StepStatus::Dispatched);
                self.transition_step(id, StepStatus::Running);
                self.inflight.insert(StepId::new(id));
                dispatch::spawn_shell(
                    self.shell.clone(),
                    StepId::new(id),
                    command,
                    env,
                    workdir,
                    spec.timeout(),
                    self.cancel_token.clone(),
                    self.config.grace_period,
                    self.completions_tx.clone(),
                );
            }
            StepSpec::Spawn(spec) => self.dispatch_spawn(id, spec, &ctx),
            StepSpec::Kill(spec) => self.dispatch_kill(id, spec, &ctx),
            StepSpec::Expand(spec) => self.dispatch_expand(id, spec, &ctx),
            StepSpec::Foreach(spec) => self.dispatch_foreach(id, spec, &ctx),
            StepSpec::Branch(spec) => self.dispatch_branch(id, spec, &ctx),
            StepSpec::Agent(spec) => self.dispatch_agent(id, spec, &ctx),
        }
    }

    fn render_path(
        &self,
        path: &std::path::Path,
        ctx: &serde_json::Value,
    ) -> Result<PathBuf, meow_core::TemplateError> {
        let rendered = template::render_string(&path.to_string_lossy(), ctx)?;
        Ok(PathBuf::from(rendered))
    }

    fn dispatch_fail(&mut self, id: &str, error: impl std::fmt::Display) {
        self.fail_step(id, ErrorKind::Validation, error.to_string());
    }

    /// Fail a step that never made it past dispatch (a render/resolve
    /// error), marching through `dispatched` first since `(ready, failed)`
    /// is not a legal transition.
    fn fail_step(&mut self, id: &str, kind: ErrorKind, message: String) {
        match self.run.step(id).map(|s| s.status) {
            Some(StepStatus::Ready) => self.transition_step(id, StepStatus::Dispatched),
            Some(StepStatus::Running) => self.transition_step(id, StepStatus::Completing),
            _ => {}
        }
        self.transition_step(id, StepStatus::Failed);
        if let Some(step) = self.run.step_mut(id) {
            step.error = Some(StepError { kind, message });
        }
    }

    fn dispatch_spawn(&mut self, id: &str, spec: meow_core::SpawnSpec, ctx: &serde_json::Value) {
        let adapter_name = spec.adapter.clone().unwrap_or_else(|| self.run.default_adapter.clone());
        let info = match self.registry.resolve(&adapter_name) {
            Ok(info) => info,
            Err(e) => return self.dispatch_fail(id, e),
        };
        let prompt = match template::render_string(&spec.prompt, ctx) {
            Ok(p) => p,
            Err(e) => return self.dispatch_fail(id, e),
        };
        let workdir = match self.render_path(&spec.workdir, ctx) {
            Ok(p) => p,
            Err(e) => return self.dispatch_fail(id, e),
        };
        let agent_id = AgentId::new(self.id_gen.next());
        let session_name = format!("meow-{}-{}", self.run.id.as_str(), agent_id.short(8));

        self.transition_step(id, StepStatus::Dispatched);
        self.transition_step(id, StepStatus::Running);
        self.inflight.insert(StepId::new(id));
        dispatch::spawn_spawn(
            self.sessions.clone(),
            info.manifest,
            adapter_name,
            StepId::new(id),
            agent_id,
            session_name,
            workdir,
            prompt,
            self.cancel_token.clone(),
            self.config.grace_period,
            self.completions_tx.clone(),
        );
    }

    fn dispatch_kill(&mut self, id: &str, spec: meow_core::KillSpec, ctx: &serde_json::Value) {
        let agent = match spec.agent_id.as_ref() {
            Some(raw) => match template::render_string(raw, ctx) {
                Ok(rendered) => self.run.agents.get(&AgentId::new(rendered)).cloned(),
                Err(e) => return self.dispatch_fail(id, e),
            },
            None => None,
        };
        let session_name = match spec.session_name.as_ref() {
            Some(raw) => match template::render_string(raw, ctx) {
                Ok(rendered) => rendered,
                Err(e) => return self.dispatch_fail(id, e),
            },
            None => match &agent {
                Some(agent) => agent.session_name.clone(),
                None => return self.dispatch_fail(id, "kill step has neither agent_id nor session_name"),
            },
        };
        let adapter_name = agent
            .as_ref()
            .map(|a| a.adapter_name.clone())
            .unwrap_or_else(|| self.run.default_adapter.clone());
        let manifest = match self.registry.resolve(&adapter_name) {
            Ok(info) => info.manifest,
            Err(e) => return self.dispatch_fail(id, e),
        };

        self.transition_step(id, StepStatus::Dispatched);
        self.transition_step(id, StepStatus::Running);
        self.inflight.insert(StepId::new(id));
        dispatch::spawn_kill(
            self.sessions.clone(),
            manifest,
            StepId::new(id),
            session_name,
            spec.graceful,
            self.cancel_token.clone(),
            self.config.grace_period,
            self.completions_tx.clone(),
        );
    }

    fn dispatch_expand(&mut self, id: &str, spec: meow_core::ExpandSpec, ctx: &serde_json::Value) {
        if spec.template.is_some() {
            tracing::warn!(step = id, "expand.template overrides are not supported; using the run's own template");
        }
        let mut variables = HashMap::new();
        for (k, v) in &spec.variables {
            match template::render_value(v, ctx) {
                Ok(v) => {
                    variables.insert(k.clone(), v);
                }
                Err(e) => return self.dispatch_fail(id, e),
            }
        }
        let baked = match meow_baker::bake_internal(&self.module, &spec.workflow_name, &variables) {
            Ok(b) => b,
            Err(e) => return self.dispatch_fail(id, e),
        };
        let children = meow_baker::prefix_child_ids(baked.steps, id);

        self.transition_step(id, StepStatus::Dispatched);
        self.transition_step(id, StepStatus::Running);
        self.run.steps.extend(children);
        self.transition_step(id, StepStatus::Completing);
        self.transition_step(id, StepStatus::Done);
    }

    fn dispatch_foreach(&mut self, id: &str, spec: meow_core::ForeachSpec, ctx: &serde_json::Value) {
        if spec.template.is_some() {
            tracing::warn!(step = id, "foreach.template overrides are not supported; using the run's own template");
        }
        let items = match template::render_value(&serde_json::Value::String(spec.items.clone()), ctx) {
            Ok(v) => v,
            Err(e) => return self.dispatch_fail(id, e),
        };
        let Some(items) = items.as_array().cloned() else {
            return self.dispatch_fail(id, "foreach.items did not resolve to a JSON array");
        };

        self.transition_step(id, StepStatus::Dispatched);
        self.transition_step(id, StepStatus::Running);

        for (index, item) in items.iter().enumerate() {
            let item_ctx = template::build_context(&self.run, Some(item), Some(index));
            let mut variables = HashMap::new();
            for (k, v) in &spec.variables {
                match template::render_value(v, &item_ctx) {
                    Ok(v) => {
                        variables.insert(k.clone(), v);
                    }
                    Err(e) => return self.dispatch_fail(id, e),
                }
            }
            variables.insert(spec.item_var.clone(), item.clone());
            if let Some(index_var) = &spec.index_var {
                variables.insert(index_var.clone(), json!(index));
            }

            let baked = match meow_baker::bake_internal(&self.module, &spec.workflow_name, &variables) {
                Ok(b) => b,
                Err(e) => return self.dispatch_fail(id, e),
            };
            let child_parent = format!("{id}/{index}");
            let allow_failure = matches!(spec.on_failure, meow_core::FailurePolicy::Continue);
            let mut children = meow_baker::prefix_child_ids(baked.steps, &child_parent);
            for child in &mut children {
                child.allow_failure = child.allow_failure || allow_failure;
            }
            self.run.steps.extend(children);
        }

        self.transition_step(id, StepStatus::Completing);
        self.transition_step(id, StepStatus::Done);
    }

    fn dispatch_branch(&mut self, id: &str, spec: meow_core::BranchSpec, ctx: &serde_json::Value) {
        let condition = match template::render_string(&spec.condition, ctx) {
            Ok(c) => c,
            Err(e) => return self.dispatch_fail(id, e),
        };
        let taken = is_truthy(&condition);
        let untaken_target = if taken { &spec.on_false } else { &spec.on_true };
        let untaken_target = untaken_target.as_ref().map(|t| t.as_str().to_string());

        self.transition_step(id, StepStatus::Dispatched);
        self.transition_step(id, StepStatus::Running);
        self.transition_step(id, StepStatus::Completing);
        self.transition_step(id, StepStatus::Done);

        if let Some(target) = untaken_target {
            if self.run.step(&target).map(|s| !s.status.is_terminal()).unwrap_or(false) {
                self.transition_step(&target, StepStatus::Skipped);
            }
        }
    }

    fn dispatch_agent(&mut self, id: &str, spec: meow_core::AgentSpec, ctx: &serde_json::Value) {
        let agent_id = match template::render_string(&spec.agent_id, ctx) {
            Ok(a) => AgentId::new(a),
            Err(e) => return self.dispatch_fail(id, e),
        };
        let Some(agent) = self.run.agents.get(&agent_id).cloned() else {
            return self.dispatch_fail(id, format!("unknown agent '{agent_id}'"));
        };
        let prompt = match template::render_string(&spec.prompt, ctx) {
            Ok(p) => p,
            Err(e) => return self.dispatch_fail(id, e),
        };
        let manifest = match self.registry.resolve(&agent.adapter_name) {
            Ok(info) => info.manifest,
            Err(e) => return self.dispatch_fail(id, e),
        };

        self.transition_step(id, StepStatus::Dispatched);
        self.inflight.insert(StepId::new(id));
        dispatch::spawn_inject(
            self.sessions.clone(),
            manifest,
            agent.session_name.clone(),
            StepId::new(id),
            agent_id,
            prompt,
            self.cancel_token.clone(),
            self.config.grace_period,
            self.completions_tx.clone(),
        );
    }

    fn handle_completion(&mut self, completion: Completion) {
        self.inflight.remove(&completion.step_id);
        let id = completion.step_id.as_str().to_string();
        match completion.result {
            Ok(StepOutcome::Injected(agent_id)) => {
                if let Some(agent) = self.run.agents.get_mut(&agent_id) {
                    agent.current_step_id = Some(StepId::new(id));
                    agent.last_ack_at = Some(self.clock.now());
                }
            }
            Ok(outcome) => {
                self.transition_step(&id, StepStatus::Completing);
                match outcome {
                    StepOutcome::Shell(outputs) => {
                        if let Some(step) = self.run.step_mut(&id) {
                            step.outputs = outputs;
                        }
                    }
                    StepOutcome::Spawn {
                        agent_id,
                        session_name,
                        adapter_name,
                    } => {
                        self.run.agents.insert(
                            agent_id.clone(),
                            AgentRecord {
                                agent_id: agent_id.clone(),
                                adapter_name,
                                session_name: session_name.clone(),
                                current_step_id: None,
                                last_ack_at: None,
                                labels: HashMap::new(),
                            },
                        );
                        if let Some(step) = self.run.step_mut(&id) {
                            step.outputs.insert("agent_id".into(), json!(agent_id.as_str()));
                            step.outputs.insert("session_name".into(), json!(session_name));
                        }
                    }
                    StepOutcome::Kill | StepOutcome::Injected(_) => {}
                }
                self.transition_step(&id, StepStatus::Done);
            }
            Err(error) => {
                let current = self.run.step(&id).map(|s| s.status);
                if current == Some(StepStatus::Running) {
                    self.transition_step(&id, StepStatus::Completing);
                }
                if let Some(step) = self.run.step_mut(&id) {
                    step.error = Some(error);
                }
                self.transition_step(&id, StepStatus::Failed);
            }
        }
    }

    fn handle_control(
        &mut self,
        message: ControlMessage,
        reply: oneshot::Sender<ControlReply>,
    ) {
        match message {
            ControlMessage::StepStart { agent, step } => {
                let matches = self
                    .run
                    .agents
                    .get(&agent)
                    .map(|a| a.current_step_id.as_ref() == Some(&step))
                    .unwrap_or(false);
                if matches && self.run.step(step.as_str()).map(|s| s.status) == Some(StepStatus::Dispatched) {
                    self.transition_step(step.as_str(), StepStatus::Running);
                }
                let _ = reply.send(ControlReply::Ack);
            }
            ControlMessage::StepDone(req) => {
                let outcome = self.apply_step_done(&req);
                let _ = reply.send(ControlReply::StepDone(outcome));
            }
            ControlMessage::GetPrompt { agent } => {
                let prompt = self.run.agents.get(&agent).and_then(|a| a.current_step_id.clone()).and_then(|step_id| {
                    let ctx = self.context();
                    match self.run.step(step_id.as_str()).map(|s| s.spec.clone()) {
                        Some(StepSpec::Agent(spec)) => template::render_string(&spec.prompt, &ctx).ok(),
                        _ => None,
                    }
                });
                let _ = reply.send(ControlReply::Prompt(GetPromptReply { prompt }));
            }
            ControlMessage::Approval {
                gate,
                approved,
                notes,
                reason,
            } => {
                let event_type = if approved {
                    meow_core::EVENT_GATE_APPROVED
                } else {
                    meow_core::EVENT_GATE_REJECTED
                };
                self.bus.emit(meow_core::BusEvent {
                    event_type: event_type.to_string(),
                    data: json!({"gate": gate, "approved": approved, "notes": notes, "reason": reason}),
                });
                let _ = reply.send(ControlReply::Ack);
            }
            ControlMessage::Event(event) => {
                self.bus.emit(event);
                let _ = reply.send(ControlReply::Ack);
            }
            ControlMessage::AwaitEvent {
                event_type,
                filter,
                timeout,
            } => {
                let bus = self.bus.clone();
                tokio::spawn(async move {
                    let outcome = bus.await_event(event_type, filter, timeout).await;
                    let _ = reply.send(ControlReply::Event(outcome));
                });
            }
            ControlMessage::Cancel => {
                self.cancel_run();
                let _ = reply.send(ControlReply::Ack);
            }
        }
    }

    fn apply_step_done(&mut self, req: &meow_core::StepDoneRequest) -> StepDoneOutcome {
        let step_status = self.run.step(req.step.as_str()).map(|s| s.status);
        let agent_matches = self
            .run
            .agents
            .get(&req.agent)
            .map(|a| a.current_step_id.as_ref() == Some(&req.step))
            .unwrap_or(false);

        if step_status.map(|s| s.is_terminal()).unwrap_or(true) {
            return StepDoneOutcome::Ignored;
        }
        if !agent_matches || step_status != Some(StepStatus::Running) {
            return StepDoneOutcome::Ignored;
        }

        let schema = match self.run.step(req.step.as_str()).map(|s| s.spec.clone()) {
            Some(StepSpec::Agent(spec)) => spec.outputs_schema,
            _ => return StepDoneOutcome::Ignored,
        };
        let missing: Vec<&String> = schema.iter().filter(|k| !req.outputs.contains_key(*k)).collect();
        if !missing.is_empty() {
            let message = format!("missing required output keys: {missing:?}");
            self.fail_step(req.step.as_str(), ErrorKind::Validation, message.clone());
            if let Some(agent) = self.run.agents.get_mut(&req.agent) {
                agent.current_step_id = None;
            }
            return StepDoneOutcome::SchemaMismatch(message);
        }

        self.transition_step(req.step.as_str(), StepStatus::Completing);
        if let Some(step) = self.run.step_mut(req.step.as_str()) {
            step.outputs = req.outputs.clone();
        }
        self.transition_step(req.step.as_str(), StepStatus::Done);
        if let Some(agent) = self.run.agents.get_mut(&req.agent) {
            agent.current_step_id = None;
            agent.last_ack_at = Some(self.clock.now());
        }
        StepDoneOutcome::Accepted
    }

    /// Mark every non-terminal step `skipped`, trip the run's cancellation
    /// token, and ask live agent sessions to stop gracefully (spec.md
    /// §4.F.5). The token reaches every in-flight `shell`/`spawn`/`kill`
    /// background task through [`dispatch`]'s spawn functions, which give
    /// the task `grace_period` to exit on its own before force-killing it —
    /// the same graceful-then-hard path a timeout takes. Their (possibly
    /// delayed) `Completion` is still a no-op against an already-`Skipped`
    /// step.
    fn cancel_run(&mut self) {
        self.cancelled = true;
        self.cancel_token.cancel();
        let ids: Vec<String> = self
            .run
            .steps
            .iter()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.id.as_str().to_string())
            .collect();
        for id in ids {
            self.transition_step(&id, StepStatus::Skipped);
        }
        for agent in self.run.agents.values() {
            let Ok(info) = self.registry.resolve(&agent.adapter_name) else {
                continue;
            };
            let sessions = self.sessions.clone();
            let session_name = agent.session_name.clone();
            let policy = info.manifest.graceful_stop.clone();
            tokio::spawn(async move {
                if let Err(e) = sessions.graceful_stop(&session_name, &policy).await {
                    tracing::warn!(session = %session_name, error = %e, "graceful stop failed during cancellation");
                }
            });
        }
        self.activity.record("cancellation requested");
    }

    async fn finalize(&mut self) {
        let status = if self.cancelled {
            RunStatus::Stopped
        } else if self.run.has_unallowed_failure() {
            RunStatus::Failed
        } else {
            RunStatus::Done
        };
        self.run.status = status;
        self.run.done_at = Some(self.clock.now());

        let hook = match status {
            RunStatus::Done => self.run.cleanup_on_success.clone(),
            RunStatus::Failed => self.run.cleanup_on_failure.clone(),
            RunStatus::Stopped => self.run.cleanup_on_stop.clone(),
            RunStatus::Pending | RunStatus::Running => None,
        };
        if let Some(hook) = hook {
            self.run_cleanup_hook(&hook).await;
        }
        self.activity.record(&format!("run finished: {status:?}"));
    }

    async fn run_cleanup_hook(&self, hook: &str) {
        let workdir = self.run.collection_dir.clone().unwrap_or_else(|| PathBuf::from("."));
        match self.shell.run(hook, &HashMap::new(), &workdir, None).await {
            Ok(outcome) if outcome.exit_code != 0 => {
                tracing::warn!(exit_code = outcome.exit_code, "cleanup hook exited non-zero");
            }
            Err(e) => tracing::warn!(error = %e, "cleanup hook failed"),
            _ => {}
        }
    }

    /// Apply a single legal status transition, logging and dropping
    /// anything the state machine forbids (spec.md §4.F.2).
    fn transition_step(&mut self, id: &str, to: StepStatus) {
        let now = self.clock.now();
        let from = {
            let Some(step) = self.run.step_mut(id) else {
                return;
            };
            let from = step.status;
            if !from.can_transition_to(to) {
                tracing::error!(step = id, ?from, ?to, "invalid step transition attempted");
                return;
            }
            step.status = to;
            if to == StepStatus::Dispatched && step.started_at.is_none() {
                step.started_at = Some(now);
            }
            if to.is_terminal() {
                step.finished_at = Some(now);
            }
            from
        };
        self.activity.record_transition(&StepId::new(id), from, to);
    }
}

fn is_truthy(condition: &str) -> bool {
    !matches!(
        condition.trim().to_ascii_lowercase().as_str(),
        "" | "false" | "0" | "no"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use meow_adapters::FakeSessionAdapter;
    use meow_baker::{RawShellSpec, RawStep, RawStepSpec, WorkflowDef};
    use meow_core::{test_support::sample_run, FixedClock, SequentialIdGen};
    use meow_storage::FsRunStore;
    use std::collections::HashSet;

    fn shell_spec(command: &str) -> StepSpec {
        StepSpec::Shell(meow_core::ShellSpec {
            command: command.to_string(),
            workdir: None,
            env: HashMap::new(),
            timeout_secs: None,
        })
    }

    fn make_scheduler(
        run: Run,
        module: WorkflowModule,
        tmp: &tempfile::TempDir,
    ) -> (Scheduler<FakeSessionAdapter, FixedClock, SequentialIdGen>, SchedulerHandle) {
        let store: Arc<dyn RunStore> = Arc::new(FsRunStore::new(tmp.path()));
        store.create(&run).expect("persist run before scheduling");
        let lock = store.acquire_lock(&run.id).expect("acquire lock");
        let registry = AdapterRegistry::new(None);
        let sessions = InjectionSerializer::new(FakeSessionAdapter::new());
        let shell = ShellRunner::new();
        let clock = FixedClock::new(chrono::Utc::now());
        let id_gen = SequentialIdGen::new("agent");

        Scheduler::new(
            run,
            lock,
            store,
            registry,
            sessions,
            shell,
            module,
            tmp.path().join("logs"),
            SchedulerConfig {
                max_concurrent_steps: 4,
                poll_interval: std::time::Duration::from_millis(20),
                grace_period: std::time::Duration::from_secs(1),
            },
            clock,
            id_gen,
        )
    }

    fn empty_module() -> WorkflowModule {
        WorkflowModule {
            workflows: Default::default(),
        }
    }

    #[tokio::test]
    async fn two_step_shell_chain_runs_to_done() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut run = sample_run("run-chain");
        run.steps = vec![
            Step {
                id: StepId::new("a"),
                executor: ExecutorKind::Shell,
                status: StepStatus::Pending,
                needs: HashSet::new(),
                spec: shell_spec("true"),
                outputs: Default::default(),
                error: None,
                started_at: None,
                finished_at: None,
                parent_step_id: None,
                allow_failure: false,
            },
            Step {
                id: StepId::new("b"),
                executor: ExecutorKind::Shell,
                status: StepStatus::Pending,
                needs: [StepId::new("a")].into_iter().collect(),
                spec: shell_spec("true"),
                outputs: Default::default(),
                error: None,
                started_at: None,
                finished_at: None,
                parent_step_id: None,
                allow_failure: false,
            },
        ];

        let (scheduler, _handle) = make_scheduler(run, empty_module(), &tmp);
        let finished = scheduler.run_to_completion().await.expect("run completes");

        assert_eq!(finished.status, RunStatus::Done);
        assert!(finished.steps.iter().all(|s| s.status == StepStatus::Done));
    }

    #[tokio::test]
    async fn failing_step_fails_the_run_and_skips_dependents() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut run = sample_run("run-fail");
        run.steps = vec![
            Step {
                id: StepId::new("a"),
                executor: ExecutorKind::Shell,
                status: StepStatus::Pending,
                needs: HashSet::new(),
                spec: shell_spec("exit 1"),
                outputs: Default::default(),
                error: None,
                started_at: None,
                finished_at: None,
                parent_step_id: None,
                allow_failure: false,
            },
            Step {
                id: StepId::new("b"),
                executor: ExecutorKind::Shell,
                status: StepStatus::Pending,
                needs: [StepId::new("a")].into_iter().collect(),
                spec: shell_spec("true"),
                outputs: Default::default(),
                error: None,
                started_at: None,
                finished_at: None,
                parent_step_id: None,
                allow_failure: false,
            },
        ];

        let (scheduler, _handle) = make_scheduler(run, empty_module(), &tmp);
        let finished = scheduler.run_to_completion().await.expect("run completes");

        assert_eq!(finished.status, RunStatus::Failed);
        assert_eq!(finished.step("a").unwrap().status, StepStatus::Failed);
        assert_eq!(finished.step("b").unwrap().status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn branch_skips_the_untaken_target() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut run = sample_run("run-branch");
        run.steps = vec![
            Step {
                id: StepId::new("branch"),
                executor: ExecutorKind::Branch,
                status: StepStatus::Pending,
                needs: HashSet::new(),
                spec: StepSpec::Branch(meow_core::BranchSpec {
                    condition: "true".to_string(),
                    on_true: Some(StepId::new("taken")),
                    on_false: Some(StepId::new("untaken")),
                }),
                outputs: Default::default(),
                error: None,
                started_at: None,
                finished_at: None,
                parent_step_id: None,
                allow_failure: false,
            },
            Step {
                id: StepId::new("taken"),
                executor: ExecutorKind::Shell,
                status: StepStatus::Pending,
                needs: [StepId::new("branch")].into_iter().collect(),
                spec: shell_spec("true"),
                outputs: Default::default(),
                error: None,
                started_at: None,
                finished_at: None,
                parent_step_id: None,
                allow_failure: false,
            },
            Step {
                id: StepId::new("untaken"),
                executor: ExecutorKind::Shell,
                status: StepStatus::Pending,
                needs: [StepId::new("branch")].into_iter().collect(),
                spec: shell_spec("true"),
                outputs: Default::default(),
                error: None,
                started_at: None,
                finished_at: None,
                parent_step_id: None,
                allow_failure: false,
            },
        ];

        let (scheduler, _handle) = make_scheduler(run, empty_module(), &tmp);
        let finished = scheduler.run_to_completion().await.expect("run completes");

        assert_eq!(finished.status, RunStatus::Done);
        assert_eq!(finished.step("taken").unwrap().status, StepStatus::Done);
        assert_eq!(finished.step("untaken").unwrap().status, StepStatus::Skipped);
    }

    #[tokio::test]
    async fn foreach_continue_policy_lets_siblings_finish_after_one_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut module = empty_module();
        module.workflows.insert(
            "child".to_string(),
            WorkflowDef {
                steps: vec![RawStep {
                    id: "work".to_string(),
                    needs: vec![],
                    allow_failure: false,
                    spec: RawStepSpec::Shell(RawShellSpec {
                        command: "{{var.item}}".to_string(),
                        workdir: None,
                        env: HashMap::new(),
                        timeout_secs: None,
                    }),
                }],
                variables: vec![],
                cleanup_on_success: None,
                cleanup_on_failure: None,
                cleanup_on_stop: None,
                internal: true,
            },
        );

        let mut run = sample_run("run-foreach");
        run.variables.insert(
            "items".to_string(),
            serde_json::json!(["true", "exit 1", "true"]),
        );
        run.steps = vec![Step {
            id: StepId::new("fan-out"),
            executor: ExecutorKind::Foreach,
            status: StepStatus::Pending,
            needs: HashSet::new(),
            spec: StepSpec::Foreach(meow_core::ForeachSpec {
                items: "{{var.items}}".to_string(),
                item_var: "item".to_string(),
                index_var: None,
                template: None,
                workflow_name: "child".to_string(),
                variables: HashMap::new(),
                on_failure: meow_core::FailurePolicy::Continue,
            }),
            outputs: Default::default(),
            error: None,
            started_at: None,
            finished_at: None,
            parent_step_id: None,
            allow_failure: false,
        }];

        let (scheduler, _handle) = make_scheduler(run, module, &tmp);
        let finished = scheduler.run_to_completion().await.expect("run completes");

        // One child's shell command fails, but `continue` means the other
        // two still reach `done` and the parent `foreach` step itself is
        // unaffected (it only ever fans the children out).
        let done_children = finished
            .steps
            .iter()
            .filter(|s| s.parent_step_id.as_ref().map(|p| p.as_str()) == Some("fan-out") && s.status == StepStatus::Done)
            .count();
        let failed_children = finished
            .steps
            .iter()
            .filter(|s| s.parent_step_id.as_ref().map(|p| p.as_str()) == Some("fan-out") && s.status == StepStatus::Failed)
            .count();
        assert_eq!(done_children, 2);
        assert_eq!(failed_children, 1);
        assert_eq!(finished.status, RunStatus::Done);
    }

    #[tokio::test]
    async fn cancel_marks_pending_steps_skipped_and_stops_the_run() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut run = sample_run("run-cancel");
        run.steps = vec![Step {
            id: StepId::new("a"),
            executor: ExecutorKind::Shell,
            status: StepStatus::Pending,
            needs: HashSet::new(),
            spec: shell_spec("sleep 5"),
            outputs: Default::default(),
            error: None,
            started_at: None,
            finished_at: None,
            parent_step_id: None,
            allow_failure: false,
        }];

        let (scheduler, handle) = make_scheduler(run, empty_module(), &tmp);
        let run_task = tokio::spawn(scheduler.run_to_completion());

        // Give the scheduler a tick to dispatch `a` before cancelling, so
        // this exercises cancellation racing an in-flight effect rather
        // than a still-pending one.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let reply = handle.send(ControlMessage::Cancel).await.expect("send cancel");
        assert!(matches!(reply, ControlReply::Ack));

        let finished = run_task.await.expect("join").expect("run completes");
        assert_eq!(finished.status, RunStatus::Stopped);
        assert_eq!(finished.step("a").unwrap().status, StepStatus::Skipped);
    }

}
