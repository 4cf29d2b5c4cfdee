// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Background executor tasks for the effects that do real I/O (`shell`,
//! `spawn`, `kill`). `expand`, `foreach`, `branch`, and `agent` are handled
//! synchronously (or via IPC) directly in [`crate::scheduler::Scheduler`].
//!
//! Grounded in the corpus's `Executor::execute_inner` idiom: one spawned
//! task per long-running effect, reporting back on a channel rather than
//! holding any lock on the run across an `.await`.

use meow_adapters::{AdapterManifest, InjectionSerializer, SessionAdapter};
use meow_core::{AgentId, ErrorKind, JsonValue, StepError, StepId};
use meow_shell::{ShellError, ShellRunner};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Race `fut` against `cancel`; once cancelled, `fut` still gets
/// `grace_period` to finish on its own before this gives up and returns
/// `None`, the same graceful-then-hard window `ShellRunner` applies to a
/// subprocess it force-kills.
async fn race_cancellable<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    grace_period: Duration,
) -> Option<F::Output> {
    tokio::pin!(fut);
    tokio::select! {
        result = &mut fut => return Some(result),
        _ = cancel.cancelled() => {}
    }
    tokio::time::timeout(grace_period, fut).await.ok()
}

fn cancelled_err() -> StepError {
    StepError {
        kind: ErrorKind::Cancelled,
        message: "force-terminated after exceeding the cancellation grace period".to_string(),
    }
}

/// What a completed background effect produced, keyed back to its step.
pub enum StepOutcome {
    Shell(HashMap<String, JsonValue>),
    Spawn {
        agent_id: AgentId,
        session_name: String,
        adapter_name: String,
    },
    Kill,
    /// Prompt injection into an already-spawned agent's session succeeded;
    /// the step itself stays `dispatched` until the agent's own `step-start`
    /// arrives over IPC.
    Injected(AgentId),
}

pub struct Completion {
    pub step_id: StepId,
    pub result: Result<StepOutcome, StepError>,
}

fn exec_err(message: impl Into<String>) -> StepError {
    StepError {
        kind: ErrorKind::Executor,
        message: message.into(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_shell(
    runner: ShellRunner,
    step_id: StepId,
    command: String,
    env: HashMap<String, String>,
    workdir: PathBuf,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    grace_period: Duration,
    tx: mpsc::Sender<Completion>,
) {
    tokio::spawn(async move {
        let result = runner
            .run_cancellable(&command, &env, &workdir, timeout, &cancel, grace_period)
            .await;
        let result = match result {
            Ok(outcome) if outcome.exit_code == 0 => Ok(StepOutcome::Shell(
                outcome
                    .captured_outputs
                    .into_iter()
                    .map(|(k, v)| (k, JsonValue::String(v)))
                    .collect(),
            )),
            Ok(outcome) => Err(StepError {
                kind: ErrorKind::Executor,
                message: format!(
                    "exit code {}: {}",
                    outcome.exit_code,
                    outcome.stderr.trim()
                ),
            }),
            Err(ShellError::Timeout(d)) => Err(StepError {
                kind: ErrorKind::Timeout,
                message: format!("shell fragment exceeded its {d:?} timeout"),
            }),
            Err(ShellError::Cancelled) => Err(cancelled_err()),
            Err(e) => Err(exec_err(e.to_string())),
        };
        let _ = tx.send(Completion { step_id, result }).await;
    });
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_spawn<S: SessionAdapter>(
    sessions: InjectionSerializer<S>,
    manifest: AdapterManifest,
    adapter_name: String,
    step_id: StepId,
    agent_id: AgentId,
    session_name: String,
    workdir: PathBuf,
    prompt: String,
    cancel: CancellationToken,
    grace_period: Duration,
    tx: mpsc::Sender<Completion>,
) {
    tokio::spawn(async move {
        let work = {
            let sessions = sessions.clone();
            let session_name = session_name.clone();
            async move {
                let env: Vec<(String, String)> = manifest
                    .environment
                    .vars
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                sessions
                    .create_session(&session_name, &manifest.spawn.command, &env, &workdir)
                    .await?;
                if manifest.spawn.startup_delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(manifest.spawn.startup_delay_ms)).await;
                }
                sessions
                    .inject_prompt(&session_name, &manifest.prompt_injection, &prompt)
                    .await?;
                Ok::<(), meow_adapters::SessionError>(())
            }
        };

        let result = match race_cancellable(work, &cancel, grace_period).await {
            Some(result) => result.map_err(|e| exec_err(e.to_string())),
            None => {
                let _ = sessions.kill(&session_name).await;
                Err(cancelled_err())
            }
        };

        let result = result.map(|()| StepOutcome::Spawn {
            agent_id,
            session_name,
            adapter_name,
        });
        let _ = tx.send(Completion { step_id, result }).await;
    });
}

/// Inject a prompt into an agent's already-running session. The step stays
/// `dispatched` on success (the `agent` executor only reaches `running` once
/// the agent's own `step-start` arrives over IPC); a failed injection fails
/// the step outright.
#[allow(clippy::too_many_arguments)]
pub fn spawn_inject<S: SessionAdapter>(
    sessions: InjectionSerializer<S>,
    manifest: AdapterManifest,
    session_name: String,
    step_id: StepId,
    agent_id: AgentId,
    prompt: String,
    cancel: CancellationToken,
    grace_period: Duration,
    tx: mpsc::Sender<Completion>,
) {
    tokio::spawn(async move {
        let work = sessions.inject_prompt(&session_name, &manifest.prompt_injection, &prompt);
        let result = match race_cancellable(work, &cancel, grace_period).await {
            Some(result) => result.map_err(|e| exec_err(e.to_string())),
            None => {
                let _ = sessions.kill(&session_name).await;
                Err(cancelled_err())
            }
        };
        let result = result.map(|()| StepOutcome::Injected(agent_id));
        let _ = tx.send(Completion { step_id, result }).await;
    });
}

#[allow(clippy::too_many_arguments)]
pub fn spawn_kill<S: SessionAdapter>(
    sessions: InjectionSerializer<S>,
    manifest: AdapterManifest,
    step_id: StepId,
    session_name: String,
    graceful: bool,
    cancel: CancellationToken,
    grace_period: Duration,
    tx: mpsc::Sender<Completion>,
) {
    tokio::spawn(async move {
        let work = {
            let sessions = sessions.clone();
            let session_name = session_name.clone();
            async move {
                if graceful {
                    sessions.graceful_stop(&session_name, &manifest.graceful_stop).await
                } else {
                    sessions.kill(&session_name).await
                }
            }
        };
        let result = match race_cancellable(work, &cancel, grace_period).await {
            Some(result) => result.map_err(|e| exec_err(e.to_string())),
            None => {
                let _ = sessions.kill(&session_name).await;
                Err(cancelled_err())
            }
        };
        let result = result.map(|()| StepOutcome::Kill);
        let _ = tx.send(Completion { step_id, result }).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelling_a_dispatched_shell_step_force_kills_it_quickly() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        spawn_shell(
            ShellRunner::new(),
            StepId::new("a"),
            "sleep 30".to_string(),
            HashMap::new(),
            std::env::temp_dir(),
            None,
            cancel.clone(),
            Duration::from_millis(50),
            tx,
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        let started = std::time::Instant::now();
        cancel.cancel();

        let completion = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("completion arrives well before the sleep would finish on its own")
            .expect("channel stays open");
        assert!(
            started.elapsed() < Duration::from_secs(5),
            "force-kill should land inside the grace period, took {:?}",
            started.elapsed()
        );
        let error = completion.result.expect_err("cancellation fails the step");
        assert_eq!(error.kind, ErrorKind::Cancelled);
    }
}
