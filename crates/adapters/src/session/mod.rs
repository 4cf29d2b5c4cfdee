// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Terminal Session Manager (spec.md §4.C): a thin wrapper over a
//! terminal multiplexer, plus the higher-level `inject_prompt` and
//! `graceful_stop` policies built on top of a small set of primitives.

mod tmux;

pub use tmux::TmuxAdapter;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeSession, FakeSessionAdapter, SessionCall};

use crate::registry::{GracefulStopSpec, InjectionMethod, PromptInjectionSpec};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
}

/// Low-level primitives over a terminal multiplexer, and the policy-driven
/// operations (`inject_prompt`, `graceful_stop`) built from them.
#[async_trait]
pub trait SessionAdapter: Clone + Send + Sync + 'static {
    /// Start a detached session whose first window runs `cmd`.
    async fn spawn(
        &self,
        name: &str,
        cwd: &Path,
        cmd: &str,
        env: &[(String, String)],
    ) -> Result<String, SessionError>;

    /// Send a named key sequence (e.g. `"Enter"`, `"Escape"`, `"C-c"`).
    async fn send(&self, id: &str, keys: &str) -> Result<(), SessionError>;

    /// Type `text` directly, with no key-name interpretation.
    async fn send_literal(&self, id: &str, text: &str) -> Result<(), SessionError>;

    /// Stage `text` in a paste buffer and paste it — required when `text`
    /// contains control characters literal mode would misinterpret.
    async fn send_via_paste_buffer(&self, id: &str, text: &str) -> Result<(), SessionError>;

    async fn kill(&self, id: &str) -> Result<(), SessionError>;

    async fn is_alive(&self, id: &str) -> Result<bool, SessionError>;

    async fn capture_output(&self, id: &str, lines: u32) -> Result<String, SessionError>;

    /// Ids of live sessions whose name starts with `prefix`.
    async fn list_sessions(&self, prefix: &str) -> Result<Vec<String>, SessionError>;

    /// Start a detached session. Alias over [`Self::spawn`] matching the
    /// spec's naming for this operation.
    async fn create_session(
        &self,
        name: &str,
        cmd: &str,
        env: &[(String, String)],
        workdir: &Path,
    ) -> Result<String, SessionError> {
        self.spawn(name, workdir, cmd, env).await
    }

    async fn session_exists(&self, name: &str) -> Result<bool, SessionError> {
        self.is_alive(name).await
    }

    /// Execute a prompt-injection policy in order: pre-keys, the
    /// injection method with `prompt_text`, post-keys — honoring both
    /// delays (spec.md §4.C).
    async fn inject_prompt(
        &self,
        session: &str,
        policy: &PromptInjectionSpec,
        prompt_text: &str,
    ) -> Result<(), SessionError> {
        for key in &policy.pre_keys {
            self.send(session, key).await?;
        }
        if policy.pre_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(policy.pre_delay_ms)).await;
        }

        match policy.method {
            InjectionMethod::Literal => self.send_literal(session, prompt_text).await?,
            InjectionMethod::PasteBuffer => {
                self.send_via_paste_buffer(session, prompt_text).await?
            }
        }

        for key in &policy.post_keys {
            self.send(session, key).await?;
        }
        if policy.post_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(policy.post_delay_ms)).await;
        }
        Ok(())
    }

    /// Send the configured keys, wait, then kill the session if it is
    /// still alive (spec.md §4.C).
    async fn graceful_stop(
        &self,
        session: &str,
        policy: &GracefulStopSpec,
    ) -> Result<(), SessionError> {
        for key in &policy.keys {
            self.send(session, key).await?;
        }
        if policy.wait_ms > 0 {
            tokio::time::sleep(Duration::from_millis(policy.wait_ms)).await;
        }
        if self.is_alive(session).await? {
            self.kill(session).await?;
        }
        Ok(())
    }
}

/// Serializes concurrent `inject_prompt` calls against the same session id
/// while leaving distinct sessions free to run in parallel (spec.md §4.C
/// Concurrency), via a per-session mutex kept in an internal map.
#[derive(Clone)]
pub struct InjectionSerializer<S> {
    inner: S,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl<S: SessionAdapter> InjectionSerializer<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock_for(&self, session: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(session.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl<S: SessionAdapter> SessionAdapter for InjectionSerializer<S> {
    async fn spawn(
        &self,
        name: &str,
        cwd: &Path,
        cmd: &str,
        env: &[(String, String)],
    ) -> Result<String, SessionError> {
        self.inner.spawn(name, cwd, cmd, env).await
    }

    async fn send(&self, id: &str, keys: &str) -> Result<(), SessionError> {
        self.inner.send(id, keys).await
    }

    async fn send_literal(&self, id: &str, text: &str) -> Result<(), SessionError> {
        self.inner.send_literal(id, text).await
    }

    async fn send_via_paste_buffer(&self, id: &str, text: &str) -> Result<(), SessionError> {
        self.inner.send_via_paste_buffer(id, text).await
    }

    async fn kill(&self, id: &str) -> Result<(), SessionError> {
        self.inner.kill(id).await
    }

    async fn is_alive(&self, id: &str) -> Result<bool, SessionError> {
        self.inner.is_alive(id).await
    }

    async fn capture_output(&self, id: &str, lines: u32) -> Result<String, SessionError> {
        self.inner.capture_output(id, lines).await
    }

    async fn list_sessions(&self, prefix: &str) -> Result<Vec<String>, SessionError> {
        self.inner.list_sessions(prefix).await
    }

    async fn inject_prompt(
        &self,
        session: &str,
        policy: &PromptInjectionSpec,
        prompt_text: &str,
    ) -> Result<(), SessionError> {
        let lock = self.lock_for(session);
        let _guard = lock.lock().await;
        SessionAdapter::inject_prompt(&self.inner, session, policy, prompt_text).await
    }
}
