// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! The Shell Runner (spec.md §4.D): executes a bash fragment with an
//! enforced timeout, capturing a dedicated `key=value` output stream
//! separately from stdout/stderr.
//!
//! This is deliberately not a shell-language parser: fragments are handed
//! to the OS shell verbatim, the same way the corpus's own shell-effect
//! handling does it, generalized into a standalone, directly testable
//! runner that adds timeout enforcement and captured-output parsing.

mod runner;

pub use runner::{RunOutcome, ShellError, ShellRunner};
