// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process exit-code discipline (spec.md §6): most commands exit `0` on
//! success and `1` on any error, but `await` uses a three-way code (`0`
//! matched, `1` timed out, `2` errored) so scripts can distinguish "didn't
//! happen" from "broke".

use std::fmt;

/// Carries a specific exit code through an `anyhow::Error` chain. Any error
/// that doesn't downcast to this exits `1`.
#[derive(Debug, Clone, Copy)]
pub struct ExitCode(pub i32);

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "exit code {}", self.0)
    }
}

impl std::error::Error for ExitCode {}

/// Format an anyhow error, deduplicating the chain when the top-level
/// Display already repeats the source text (common with `#[from]` variants).
pub fn format_error(err: &anyhow::Error) -> String {
    let top = err.to_string();
    let chain_redundant = err
        .chain()
        .skip(1)
        .all(|cause| top.contains(&cause.to_string()));

    if chain_redundant {
        return top;
    }

    let mut buf = top;
    for (i, cause) in err.chain().skip(1).enumerate() {
        buf.push_str(&format!("\n\nCaused by:\n    {}: {}", i, cause));
    }
    buf
}

/// The process exit code for a `main()` result: the `ExitCode` a caller
/// tagged onto the error, or `1` for anything else.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<ExitCode>().map_or(1, |c| c.0)
}
