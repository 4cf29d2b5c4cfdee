// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to spawn shell: {0}")]
    Spawn(std::io::Error),
    #[error("io error communicating with child: {0}")]
    Io(#[from] std::io::Error),
    #[error("fragment exceeded its {0:?} timeout and was killed")]
    Timeout(Duration),
    #[error("fragment was cancelled and force-killed after its grace period")]
    Cancelled,
}

/// Result of a completed (non-timed-out) fragment run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub captured_outputs: HashMap<String, String>,
}

/// Runs bash fragments as external hooks and `shell` executor steps
/// (spec.md §4.D).
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    /// Execute `fragment` under `bash -c`, in `workdir`, with `env` applied
    /// on top of the inherited environment. A fragment that writes
    /// `key=value` lines to fd 3 has those lines become `captured_outputs`.
    /// `timeout` of `None` means no enforced limit. Never cancellable;
    /// callers that need to force-terminate a fragment mid-flight (a
    /// dispatched `shell` step) use [`Self::run_cancellable`] instead.
    pub async fn run(
        &self,
        fragment: &str,
        env: &HashMap<String, String>,
        workdir: &Path,
        timeout: Option<Duration>,
    ) -> Result<RunOutcome, ShellError> {
        self.run_cancellable(fragment, env, workdir, timeout, &CancellationToken::new(), Duration::from_secs(0))
            .await
    }

    /// Like [`Self::run`], but also races the fragment against `cancel`. On
    /// cancellation the fragment is given `grace_period` to exit on its own
    /// before being force-killed the same way an exceeded `timeout` is.
    pub async fn run_cancellable(
        &self,
        fragment: &str,
        env: &HashMap<String, String>,
        workdir: &Path,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        grace_period: Duration,
    ) -> Result<RunOutcome, ShellError> {
        let outputs_file = tempfile::NamedTempFile::new()?;
        let outputs_path: PathBuf = outputs_file.path().to_path_buf();

        // fd 3 is redirected at the shell level into a plain file; the
        // runner never needs to touch raw file descriptors itself.
        let wrapped = format!(
            "set -uo pipefail\nexec 3>\"{}\"\n{}\n",
            outputs_path.display(),
            fragment
        );

        let mut command = Command::new("bash");
        command
            .arg("-c")
            .arg(&wrapped)
            .current_dir(workdir)
            .envs(env)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = command.spawn().map_err(ShellError::Spawn)?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let wait = async {
            let status = child.wait().await?;
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(mut pipe) = stdout_pipe.take() {
                pipe.read_to_string(&mut stdout).await?;
            }
            if let Some(mut pipe) = stderr_pipe.take() {
                pipe.read_to_string(&mut stderr).await?;
            }
            Ok::<_, std::io::Error>((status, stdout, stderr))
        };

        enum Interrupted {
            TimedOut,
            Cancelled,
        }

        let outcome = match timeout {
            Some(limit) => tokio::select! {
                result = wait => Ok(result),
                _ = tokio::time::sleep(limit) => Err(Interrupted::TimedOut),
                _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            },
            None => tokio::select! {
                result = wait => Ok(result),
                _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            },
        };

        let (status, stdout, stderr) = match outcome {
            Ok(result) => result?,
            Err(Interrupted::TimedOut) => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Err(ShellError::Timeout(timeout.unwrap_or_default()));
            }
            Err(Interrupted::Cancelled) => {
                // The fragment gets `grace_period` to exit on its own (it
                // may already be most of the way done) before being
                // force-killed the same way an exceeded timeout is.
                if tokio::time::timeout(grace_period, child.wait()).await.is_err() {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                }
                return Err(ShellError::Cancelled);
            }
        };

        let captured_outputs = parse_captured_outputs(&outputs_path).await;

        Ok(RunOutcome {
            exit_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
            captured_outputs,
        })
    }
}

async fn parse_captured_outputs(path: &Path) -> HashMap<String, String> {
    let Ok(contents) = tokio::fs::read_to_string(path).await else {
        return HashMap::new();
    };
    contents
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let runner = ShellRunner::new();
        let outcome = runner
            .run("echo hello", &HashMap::new(), Path::new("/tmp"), None)
            .await
            .expect("run");
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(outcome.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn captures_key_value_outputs_from_fd3() {
        let runner = ShellRunner::new();
        let outcome = runner
            .run(
                "echo greeting=hi >&3\necho count=2 >&3",
                &HashMap::new(),
                Path::new("/tmp"),
                None,
            )
            .await
            .expect("run");
        assert_eq!(outcome.captured_outputs.get("greeting"), Some(&"hi".to_string()));
        assert_eq!(outcome.captured_outputs.get("count"), Some(&"2".to_string()));
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_not_an_error() {
        let runner = ShellRunner::new();
        let outcome = runner
            .run("exit 7", &HashMap::new(), Path::new("/tmp"), None)
            .await
            .expect("run");
        assert_eq!(outcome.exit_code, 7);
    }

    #[tokio::test]
    async fn timeout_kills_and_returns_timeout_error() {
        let runner = ShellRunner::new();
        let result = runner
            .run(
                "sleep 5",
                &HashMap::new(),
                Path::new("/tmp"),
                Some(Duration::from_millis(50)),
            )
            .await;
        assert!(matches!(result, Err(ShellError::Timeout(_))));
    }

    #[tokio::test]
    async fn cancellation_force_kills_after_grace_period() {
        let runner = ShellRunner::new();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let result = runner
            .run_cancellable(
                "sleep 5",
                &HashMap::new(),
                Path::new("/tmp"),
                None,
                &cancel,
                Duration::from_millis(50),
            )
            .await;
        assert!(matches!(result, Err(ShellError::Cancelled)));
    }

    #[tokio::test]
    async fn cancellation_lets_an_almost_done_fragment_finish_within_grace() {
        let runner = ShellRunner::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = runner
            .run_cancellable(
                "echo hello",
                &HashMap::new(),
                Path::new("/tmp"),
                None,
                &cancel,
                Duration::from_secs(2),
            )
            .await
            .expect("fragment finishes inside its grace period");
        assert_eq!(outcome.exit_code, 0);
    }

    #[tokio::test]
    async fn env_vars_are_visible_to_fragment() {
        let runner = ShellRunner::new();
        let mut env = HashMap::new();
        env.insert("GREETING".to_string(), "howdy".to_string());
        let outcome = runner
            .run("echo $GREETING", &env, Path::new("/tmp"), None)
            .await
            .expect("run");
        assert_eq!(outcome.stdout.trim(), "howdy");
    }
}
