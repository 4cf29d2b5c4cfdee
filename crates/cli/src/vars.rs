// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `--var key=value` / `--filter key=value` parsing shared by several
//! subcommands.

use meow_core::JsonValue;

/// Parse `key=value`, used as a clap `value_parser`. The value is kept as a
/// raw string; callers decide whether to coerce it to JSON.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid input '{s}': must be key=value"))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Coerce a raw CLI value to JSON: valid JSON (numbers, bools, quoted
/// strings, objects, arrays) parses as such; anything else is a bare string.
pub fn coerce_json(raw: &str) -> JsonValue {
    serde_json::from_str(raw).unwrap_or_else(|_| JsonValue::String(raw.to_string()))
}
