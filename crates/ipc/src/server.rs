// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Accept loop for a run's control socket (spec.md §4.G).
//!
//! Grounded in the corpus's `Listener`/`handle_connection` split: one
//! spawned task per connection, one request/response pair per connection,
//! errors classified and logged at the right level.

use std::path::{Path, PathBuf};
use std::time::Duration;

use meow_core::{ControlMessage, RunId};
use meow_engine::{ControlReply, SchedulerHandle};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, warn};

use crate::error::IpcError;
use crate::protocol::{self, Request, Response, StepDoneWire, DEFAULT_TIMEOUT};

/// Environment variables exported to spawned agent processes (spec.md §6).
pub const ENV_ORCH_SOCK: &str = "MEOW_ORCH_SOCK";
pub const ENV_WORKFLOW: &str = "MEOW_WORKFLOW";
pub const ENV_AGENT: &str = "MEOW_AGENT";
pub const ENV_STEP: &str = "MEOW_STEP";

/// Deterministic socket path for a run, under a well-known per-project
/// directory (spec.md §6).
pub fn socket_path(project_root: &Path, run_id: &RunId) -> PathBuf {
    project_root
        .join(".meow")
        .join("sock")
        .join(format!("{}.sock", run_id.as_str()))
}

/// The control socket for one run, bound to exactly one [`SchedulerHandle`].
pub struct IpcServer {
    socket: UnixListener,
    path: PathBuf,
    run_id: RunId,
    handle: SchedulerHandle,
}

impl IpcServer {
    /// Bind the run's control socket, removing a stale file left behind by a
    /// crashed prior orchestrator (the run store's advisory lock, not this
    /// socket, is the source of truth for "is a run active").
    pub fn bind(path: PathBuf, run_id: RunId, handle: SchedulerHandle) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if path.exists() {
            std::fs::remove_file(&path)?;
        }
        let socket = UnixListener::bind(&path)?;
        Ok(Self {
            socket,
            path,
            run_id,
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until the process exits; each connection is
    /// handled on its own spawned task and never blocks the accept loop.
    pub async fn run(self) {
        loop {
            match self.socket.accept().await {
                Ok((stream, _addr)) => {
                    let run_id = self.run_id.clone();
                    let handle = self.handle.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &run_id, &handle).await {
                            match e {
                                IpcError::Protocol(crate::error::ProtocolError::ConnectionClosed) => {
                                    debug!("client disconnected before sending a request")
                                }
                                IpcError::Protocol(crate::error::ProtocolError::Timeout) => {
                                    warn!("connection timed out")
                                }
                                other => error!(error = %other, "connection error"),
                            }
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_connection(
    stream: UnixStream,
    run_id: &RunId,
    handle: &SchedulerHandle,
) -> Result<(), IpcError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request = protocol::read_request(&mut reader, DEFAULT_TIMEOUT).await?;
    debug!(request = ?request, "received request");

    let response = match dispatch(request, run_id, handle).await {
        Ok(response) => response,
        Err(IpcError::WrongWorkflow { requested, owned }) => Response::Error {
            message: format!("request named workflow '{requested}' but this server handles '{owned}'"),
        },
        Err(IpcError::SchedulerUnavailable(message)) => Response::Error { message },
        Err(IpcError::Protocol(e)) => return Err(e.into()),
    };

    protocol::write_response(&mut write_half, &response, DEFAULT_TIMEOUT).await?;
    Ok(())
}

async fn dispatch(
    request: Request,
    run_id: &RunId,
    handle: &SchedulerHandle,
) -> Result<Response, IpcError> {
    let message = match request {
        Request::StepStart { workflow, agent, step } => {
            check_workflow(run_id, &workflow)?;
            ControlMessage::StepStart { agent, step }
        }
        Request::StepDone {
            workflow,
            agent,
            step,
            outputs,
            notes,
        } => {
            check_workflow(run_id, &workflow)?;
            ControlMessage::StepDone(meow_core::StepDoneRequest {
                workflow,
                agent,
                step,
                outputs,
                notes,
            })
        }
        Request::GetPrompt { agent } => ControlMessage::GetPrompt { agent },
        Request::Approval {
            workflow,
            gate,
            approved,
            notes,
            reason,
        } => {
            check_workflow(run_id, &workflow)?;
            ControlMessage::Approval {
                gate,
                approved,
                notes,
                reason,
            }
        }
        Request::Event { event_type, data } => {
            ControlMessage::Event(meow_core::BusEvent { event_type, data })
        }
        Request::AwaitEvent {
            event_type,
            filter,
            timeout_ms,
        } => ControlMessage::AwaitEvent {
            event_type,
            filter,
            timeout: Duration::from_millis(timeout_ms),
        },
        Request::Cancel { workflow } => {
            check_workflow(run_id, &workflow)?;
            ControlMessage::Cancel
        }
    };

    let reply = handle
        .send(message)
        .await
        .map_err(|e| IpcError::SchedulerUnavailable(e.to_string()))?;

    Ok(match reply {
        ControlReply::Ack => Response::Ack,
        ControlReply::Error(message) => Response::Error { message },
        ControlReply::Prompt(p) => Response::Prompt { prompt: p.prompt },
        ControlReply::StepDone(outcome) => Response::StepDone {
            outcome: StepDoneWire::from(outcome),
        },
        ControlReply::Event(outcome) => outcome.into(),
    })
}

fn check_workflow(owned: &RunId, requested: &RunId) -> Result<(), IpcError> {
    if owned == requested {
        Ok(())
    } else {
        Err(IpcError::WrongWorkflow {
            requested: requested.as_str().to_string(),
            owned: owned.as_str().to_string(),
        })
    }
}
