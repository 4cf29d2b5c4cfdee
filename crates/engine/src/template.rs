// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch-time template re-substitution: the baker eagerly resolves
//! `{{var.*}}` but deliberately leaves `{{outputs.*}}`, `{{item}}`, and
//! `{{index}}` in the baked step's string fields. This module resolves
//! those against the run's current state just before a step dispatches.

use meow_core::{get_path, render_template, JsonValue, Run, TemplateError};
use serde_json::json;

/// Build the resolution context a step sees at dispatch time: `var.*` (the
/// run's frozen variables), `outputs.<step>.*` (every step's outputs so
/// far), and `item`/`index` for `foreach` children.
pub fn build_context(run: &Run, item: Option<&JsonValue>, index: Option<usize>) -> JsonValue {
    let mut outputs = serde_json::Map::new();
    for step in &run.steps {
        outputs.insert(step.id.as_str().to_string(), json!(step.outputs));
    }
    json!({
        "var": run.variables,
        "outputs": JsonValue::Object(outputs),
        "item": item.cloned().unwrap_or(JsonValue::Null),
        "index": index.map(|i| json!(i)).unwrap_or(JsonValue::Null),
    })
}

/// Render every `{{...}}` placeholder in `text` against `ctx`, erroring if
/// any reference is still unresolved (by dispatch time every reference
/// should resolve: `needs` guarantees `outputs.*` of dependencies are
/// populated, and `item`/`index` are always present for foreach children).
pub fn render_string(text: &str, ctx: &JsonValue) -> Result<String, TemplateError> {
    render_template(text, |path| get_path(ctx, path).cloned())
}

/// Like [`render_string`] but type-preserving: a string that is *entirely*
/// one placeholder (modulo surrounding whitespace) resolves to the
/// referenced value's own JSON type rather than its stringified form, and
/// recurses into arrays/objects. Used for `foreach.items` and child
/// `variables` maps, where a number or array needs to survive the
/// round-trip, not just text interpolation.
pub fn render_value(value: &JsonValue, ctx: &JsonValue) -> Result<JsonValue, TemplateError> {
    match value {
        JsonValue::String(s) => render_value_string(s, ctx),
        JsonValue::Array(items) => items
            .iter()
            .map(|v| render_value(v, ctx))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array),
        JsonValue::Object(map) => map
            .iter()
            .map(|(k, v)| render_value(v, ctx).map(|rv| (k.clone(), rv)))
            .collect::<Result<serde_json::Map<_, _>, _>>()
            .map(JsonValue::Object),
        other => Ok(other.clone()),
    }
}

fn render_value_string(s: &str, ctx: &JsonValue) -> Result<JsonValue, TemplateError> {
    if let Some(path) = whole_placeholder(s) {
        return get_path(ctx, path)
            .cloned()
            .ok_or_else(|| TemplateError::Unresolved(path.to_string()));
    }
    render_string(s, ctx).map(JsonValue::String)
}

fn whole_placeholder(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    let inner = inner.trim();
    (!inner.is_empty() && !inner.contains("{{")).then_some(inner)
}
