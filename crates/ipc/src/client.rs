// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A thin client for a run's control socket, used by `meow-cli`'s
//! out-of-process subcommands (`stop`, `approve`, `event`, `await`).
//!
//! Grounded in the corpus's `DaemonClient::send_with_timeout`: connect,
//! write one framed message, read one framed reply, all under a timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::UnixStream;

use crate::error::ProtocolError;
use crate::protocol::{self, Request, Response, DEFAULT_TIMEOUT};

/// Connects to one run's control socket for a single request/response.
pub struct IpcClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl IpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Send `request` and wait for exactly one `Response`.
    pub async fn send(&self, request: &Request) -> Result<Response, ProtocolError> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        protocol::write_request(&mut write_half, request, self.timeout).await?;
        protocol::read_response(&mut reader, self.timeout).await
    }
}
