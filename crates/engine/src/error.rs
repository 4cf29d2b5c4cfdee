// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Umbrella error for the scheduler's single top-level propagation point
//! (spec.md §7: every crate keeps its own `thiserror` enum; this wraps them
//! for the one place they all need to meet).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Storage(#[from] meow_storage::StorageError),
    #[error(transparent)]
    Bake(#[from] meow_baker::BakeError),
    #[error(transparent)]
    Adapter(#[from] meow_adapters::AdapterError),
    #[error(transparent)]
    Session(#[from] meow_adapters::SessionError),
    #[error(transparent)]
    Shell(#[from] meow_shell::ShellError),
    #[error("the scheduler's inbound channel closed")]
    ChannelClosed,
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}
