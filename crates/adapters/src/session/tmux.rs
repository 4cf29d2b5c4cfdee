// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tmux-backed session adapter.

use super::{SessionAdapter, SessionError};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// Shells out to the `tmux` CLI. Session names are namespaced by the caller
/// (`meow-<run_id>-<agent_id>`) so parallel runs never collide.
#[derive(Clone, Default)]
pub struct TmuxAdapter;

impl TmuxAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionAdapter for TmuxAdapter {
    async fn spawn(
        &self,
        name: &str,
        cwd: &Path,
        cmd: &str,
        env: &[(String, String)],
    ) -> Result<String, SessionError> {
        if !cwd.exists() {
            return Err(SessionError::SpawnFailed(format!(
                "working directory does not exist: {}",
                cwd.display()
            )));
        }

        let existing = Command::new("tmux")
            .args(["has-session", "-t", name])
            .output()
            .await;
        if existing.map(|o| o.status.success()).unwrap_or(false) {
            tracing::warn!(session = name, "session already exists, killing first");
            let _ = Command::new("tmux")
                .args(["kill-session", "-t", name])
                .output()
                .await;
        }

        let mut tmux_cmd = Command::new("tmux");
        tmux_cmd
            .arg("new-session")
            .arg("-d")
            .arg("-s")
            .arg(name)
            .arg("-c")
            .arg(cwd);
        for (key, value) in env {
            tmux_cmd.arg("-e").arg(format!("{key}={value}"));
        }
        tmux_cmd.arg(cmd);

        let output = tmux_cmd
            .output()
            .await
            .map_err(|e| SessionError::SpawnFailed(e.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(session = name, stderr = %stderr, "tmux spawn failed");
            return Err(SessionError::SpawnFailed(stderr.to_string()));
        }

        Ok(name.to_string())
    }

    async fn send(&self, id: &str, keys: &str) -> Result<(), SessionError> {
        let output = Command::new("tmux")
            .args(["send-keys", "-t", id, keys])
            .output()
            .await
            .map_err(|e| SessionError::CommandFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn send_literal(&self, id: &str, text: &str) -> Result<(), SessionError> {
        let output = Command::new("tmux")
            .args(["send-keys", "-t", id, "-l", "--", text])
            .output()
            .await
            .map_err(|e| SessionError::CommandFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn send_via_paste_buffer(&self, id: &str, text: &str) -> Result<(), SessionError> {
        let buffer_name = format!("meow-{id}");
        let set = Command::new("tmux")
            .args(["set-buffer", "-b", &buffer_name, text])
            .output()
            .await
            .map_err(|e| SessionError::CommandFailed(e.to_string()))?;
        if !set.status.success() {
            return Err(SessionError::CommandFailed(
                String::from_utf8_lossy(&set.stderr).to_string(),
            ));
        }

        let paste = Command::new("tmux")
            .args(["paste-buffer", "-b", &buffer_name, "-t", id])
            .output()
            .await
            .map_err(|e| SessionError::CommandFailed(e.to_string()))?;
        let _ = Command::new("tmux")
            .args(["delete-buffer", "-b", &buffer_name])
            .output()
            .await;
        if !paste.status.success() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn kill(&self, id: &str) -> Result<(), SessionError> {
        let _ = Command::new("tmux")
            .args(["kill-session", "-t", id])
            .output()
            .await
            .map_err(|e| SessionError::CommandFailed(e.to_string()))?;
        Ok(())
    }

    async fn is_alive(&self, id: &str) -> Result<bool, SessionError> {
        let output = Command::new("tmux")
            .args(["has-session", "-t", id])
            .output()
            .await
            .map_err(|e| SessionError::CommandFailed(e.to_string()))?;
        Ok(output.status.success())
    }

    async fn capture_output(&self, id: &str, lines: u32) -> Result<String, SessionError> {
        let output = Command::new("tmux")
            .args(["capture-pane", "-t", id, "-p", "-S", &format!("-{lines}")])
            .output()
            .await
            .map_err(|e| SessionError::CommandFailed(e.to_string()))?;
        if !output.status.success() {
            return Err(SessionError::NotFound(id.to_string()));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn list_sessions(&self, prefix: &str) -> Result<Vec<String>, SessionError> {
        let output = Command::new("tmux")
            .args(["list-sessions", "-F", "#{session_name}"])
            .output()
            .await
            .map_err(|e| SessionError::CommandFailed(e.to_string()))?;
        if !output.status.success() {
            // No server running means no sessions, not an error.
            return Ok(Vec::new());
        }
        let names = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|n| n.starts_with(prefix))
            .map(|n| n.to_string())
            .collect();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paste_buffer_name_is_derived_from_session_id() {
        assert_eq!(format!("meow-{}", "sess-1"), "meow-sess-1");
    }
}
