// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Unix-domain control socket for a single run (spec.md §4.G): accepts
//! newline-framed JSON requests from agent processes and the CLI, forwards
//! them to the owning run's scheduler, and relays the reply back.

mod client;
mod error;
mod protocol;
mod server;

pub use client::IpcClient;
pub use error::{IpcError, ProtocolError};
pub use protocol::{Request, Response, StepDoneWire, DEFAULT_TIMEOUT, MAX_MESSAGE_SIZE};
pub use server::{socket_path, IpcServer, ENV_AGENT, ENV_ORCH_SOCK, ENV_STEP, ENV_WORKFLOW};
