// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire format for the IPC protocol (spec.md §4.G).
//!
//! Newline-framed JSON, not the length-prefixed framing the corpus uses for
//! its own daemon socket — a deliberate divergence, see DESIGN.md. Message
//! shapes otherwise follow the corpus's tagged `Request`/`Response` pattern.

use meow_core::{AgentId, AwaitEventOutcome, BusEvent, EventFilter, JsonValue, RunId, StepId};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::ProtocolError;

/// Maximum line length accepted from a connection.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default read/write timeout for a single request/response exchange.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Request from an agent (or the CLI) to the per-run orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Request {
    /// Agent acknowledges receipt of a prompt.
    StepStart {
        workflow: RunId,
        agent: AgentId,
        step: StepId,
    },
    /// Agent signals completion.
    StepDone {
        workflow: RunId,
        agent: AgentId,
        step: StepId,
        #[serde(default)]
        outputs: HashMap<String, JsonValue>,
        #[serde(default)]
        notes: Option<String>,
    },
    /// Query the current prompt for an agent's active step.
    GetPrompt { agent: AgentId },
    /// Approve or reject an approval gate.
    Approval {
        workflow: RunId,
        gate: String,
        approved: bool,
        #[serde(default)]
        notes: Option<String>,
        #[serde(default)]
        reason: Option<String>,
    },
    /// Emit an arbitrary custom event.
    Event { event_type: String, data: JsonValue },
    /// Block until a matching event or timeout.
    AwaitEvent {
        event_type: String,
        #[serde(default)]
        filter: EventFilter,
        timeout_ms: u64,
    },
    /// Cooperatively cancel the whole run.
    Cancel { workflow: RunId },
}

/// Response from the per-run orchestrator back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Response {
    Ack,
    Error { message: String },
    Prompt { prompt: Option<String> },
    StepDone { outcome: StepDoneWire },
    Event { event: BusEvent },
    Timeout,
}

/// Wire form of [`meow_core::StepDoneOutcome`] (that type isn't `Serialize`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum StepDoneWire {
    Accepted,
    Ignored,
    SchemaMismatch { message: String },
}

impl From<meow_core::StepDoneOutcome> for StepDoneWire {
    fn from(outcome: meow_core::StepDoneOutcome) -> Self {
        match outcome {
            meow_core::StepDoneOutcome::Accepted => StepDoneWire::Accepted,
            meow_core::StepDoneOutcome::Ignored => StepDoneWire::Ignored,
            meow_core::StepDoneOutcome::SchemaMismatch(message) => {
                StepDoneWire::SchemaMismatch { message }
            }
        }
    }
}

impl From<AwaitEventOutcome> for Response {
    fn from(outcome: AwaitEventOutcome) -> Self {
        match outcome {
            AwaitEventOutcome::Matched(event) => Response::Event { event },
            AwaitEventOutcome::Timeout => Response::Timeout,
        }
    }
}

fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut line = serde_json::to_vec(msg)?;
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: line.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    line.push(b'\n');
    Ok(line)
}

fn decode<T: DeserializeOwned>(line: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(line)?)
}

/// Read one newline-terminated JSON request, enforcing both the size guard
/// and an overall timeout.
pub async fn read_request<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    timeout: Duration,
) -> Result<Request, ProtocolError> {
    let mut line = String::new();
    let n = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: line.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    decode(line.trim_end())
}

#[cfg(test)]
mod request_response_tests {
    use super::*;

    fn sample_request() -> Request {
        Request::Cancel {
            workflow: RunId::new("run-1"),
        }
    }

    fn sample_response() -> Response {
        Response::Error {
            message: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn request_round_trips_over_a_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = client;
        let mut reader = BufReader::new(server);

        write_request(&mut writer, &sample_request(), Duration::from_secs(1))
            .await
            .expect("write");
        let got = read_request(&mut reader, Duration::from_secs(1))
            .await
            .expect("read");
        assert!(matches!(got, Request::Cancel { workflow } if workflow.as_str() == "run-1"));
    }

    #[tokio::test]
    async fn response_round_trips_over_a_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = client;
        let mut reader = BufReader::new(server);

        write_response(&mut writer, &sample_response(), Duration::from_secs(1))
            .await
            .expect("write");
        let got = read_response(&mut reader, Duration::from_secs(1))
            .await
            .expect("read");
        assert!(matches!(got, Response::Error { message } if message == "boom"));
    }

    #[tokio::test]
    async fn read_request_on_closed_pipe_is_connection_closed() {
        let (client, server) = tokio::io::duplex(4096);
        drop(client);
        let mut reader = BufReader::new(server);
        let err = read_request(&mut reader, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn read_response_times_out_with_no_writer() {
        let (_client, server) = tokio::io::duplex(4096);
        let mut reader = BufReader::new(server);
        let err = read_response(&mut reader, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout));
    }

    #[test]
    fn encode_rejects_an_oversized_message() {
        let huge = Request::Event {
            event_type: "x".repeat(MAX_MESSAGE_SIZE + 1),
            data: JsonValue::Null,
        };
        let err = encode(&huge).unwrap_err();
        assert!(matches!(err, ProtocolError::MessageTooLarge { .. }));
    }
}

/// Write one newline-terminated JSON response.
pub async fn write_response<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let bytes = encode(response)?;
    tokio::time::timeout(timeout, writer.write_all(&bytes))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    Ok(())
}

/// Write one newline-terminated JSON request. Client-side counterpart of
/// [`read_request`], used by callers connecting to a run's control socket.
pub async fn write_request<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    request: &Request,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let bytes = encode(request)?;
    tokio::time::timeout(timeout, writer.write_all(&bytes))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    Ok(())
}

/// Read one newline-terminated JSON response. Client-side counterpart of
/// [`write_response`].
pub async fn read_response<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    timeout: Duration,
) -> Result<Response, ProtocolError> {
    let mut line = String::new();
    let n = tokio::time::timeout(timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    if n == 0 {
        return Err(ProtocolError::ConnectionClosed);
    }
    if line.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: line.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    decode(line.trim_end())
}
