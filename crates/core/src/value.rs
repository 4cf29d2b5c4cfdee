// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON value path helpers and `{{...}}` template substitution.
//!
//! Both the baker (bake-time substitution) and the scheduler (dispatch-time
//! re-substitution against freshly populated outputs) need the same
//! placeholder syntax, so the regex and resolution logic live here rather
//! than being duplicated in both crates.

use crate::JsonValue;
use std::sync::LazyLock;
use thiserror::Error;

/// Matches `{{dotted.path}}` placeholders, e.g. `{{var.name}}`,
/// `{{outputs.check.stdout}}`, `{{item}}`, `{{index}}`.
#[allow(clippy::expect_used)]
static PLACEHOLDER: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z0-9_-]+)*)\s*\}\}")
        .expect("constant regex pattern is valid")
});

/// Error substituting a template string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unresolved reference: {0}")]
    Unresolved(String),
}

/// Look up a dot-separated path (`a.b.c`) inside a JSON object.
///
/// Array-valued intermediate segments are not traversed; only object keys.
pub fn get_path<'a>(root: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a dot-separated path inside a JSON object, creating intermediate
/// objects as needed. Returns an error message if an intermediate segment
/// is already a non-object value.
pub fn set_path(root: &mut JsonValue, path: &str, value: JsonValue) -> Result<(), String> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = root;
    for segment in &segments[..segments.len() - 1] {
        if !current.is_object() {
            *current = JsonValue::Object(Default::default());
        }
        let obj = current
            .as_object_mut()
            .ok_or_else(|| format!("path segment '{}' is not an object", segment))?;
        current = obj
            .entry(segment.to_string())
            .or_insert_with(|| JsonValue::Object(Default::default()));
    }
    if !current.is_object() {
        *current = JsonValue::Object(Default::default());
    }
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "path root is not an object".to_string())?;
    let last = segments[segments.len() - 1];
    obj.insert(last.to_string(), value);
    Ok(())
}

/// Render `{{...}}` placeholders in `template` using `resolve`.
///
/// `resolve` is called with the dotted path inside the braces and returns
/// the value to substitute, or `None` if the path is not yet known (the
/// caller decides whether that's an error or should be left for a later
/// pass). Scalars are interpolated as their display form; non-scalars are
/// rendered as compact JSON.
pub fn render_template(
    template: &str,
    mut resolve: impl FnMut(&str) -> Option<JsonValue>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last_end = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let m = caps.get(0).expect("group 0 always matches");
        let path = &caps[1];
        out.push_str(&template[last_end..m.start()]);
        let value = resolve(path).ok_or_else(|| TemplateError::Unresolved(path.to_string()))?;
        out.push_str(&scalar_to_string(&value));
        last_end = m.end();
    }
    out.push_str(&template[last_end..]);
    Ok(out)
}

/// Collect the dotted paths referenced by `{{...}}` placeholders in `template`.
pub fn referenced_paths(template: &str) -> Vec<String> {
    PLACEHOLDER
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

fn scalar_to_string(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        JsonValue::Bool(_) | JsonValue::Number(_) => value.to_string(),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            serde_json::to_string(value).unwrap_or_default()
        }
    }
}
