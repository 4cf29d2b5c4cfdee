// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cross-cutting error markers (spec.md §7 taxonomy).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Cooperative cancellation signal. Never "recovered" — once observed, an
/// executor must unwind toward `Skipped`/abort, not retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// A structured, serializable error for wire responses and durable state
/// (distinct from crate-internal `thiserror` enums, which carry more detail
/// but aren't meant to cross a process boundary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    pub kind: crate::ErrorKind,
    pub message: String,
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}
