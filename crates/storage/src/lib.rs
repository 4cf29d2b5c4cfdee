// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The durable Run Store (spec.md §4.A): a keyed store from `run_id` to
//! `Run`, with an exclusive per-run lock and atomic on-disk writes.

mod atomic;
mod lock;
mod store;

pub use lock::{RunLock, RunLockError};
pub use store::{list_orphaned, FsRunStore, ListFilter, RunStore, StorageError};
