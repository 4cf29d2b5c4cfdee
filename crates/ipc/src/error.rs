// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! IPC-layer errors (spec.md §7: `IPCError` is reported to the caller; the
//! server stays up).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("timeout")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum IpcError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("request named workflow '{requested}' but this server handles '{owned}'")]
    WrongWorkflow { requested: String, owned: String },

    #[error("scheduler unavailable: {0}")]
    SchedulerUnavailable(String),
}
