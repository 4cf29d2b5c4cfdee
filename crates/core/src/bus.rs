// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event bus message shapes (spec.md §4.F.4).
//!
//! The bus itself (waiter registration, matching, delivery order) lives in
//! `meow-engine` alongside the scheduler it serves; only the message shapes
//! live here so `meow-ipc` can construct and inspect them without depending
//! on the scheduler's internals.

use crate::JsonValue;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known event type used by the approval-gate primitive.
pub const EVENT_GATE_APPROVED: &str = "gate-approved";
/// Well-known event type used by the approval-gate primitive.
pub const EVENT_GATE_REJECTED: &str = "gate-rejected";

/// A single published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_type: String,
    pub data: JsonValue,
}

/// An `await` filter: equality on every key against the event's `data`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub fields: HashMap<String, JsonValue>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Whether `event` matches this filter: every filter key must be present
    /// in the event's data object and equal by value.
    pub fn matches(&self, event: &BusEvent) -> bool {
        let Some(obj) = event.data.as_object() else {
            return self.fields.is_empty();
        };
        self.fields
            .iter()
            .all(|(k, v)| obj.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_anything() {
        let event = BusEvent {
            event_type: "custom".into(),
            data: json!({"a": 1}),
        };
        assert!(EventFilter::new().matches(&event));
    }

    #[test]
    fn filter_requires_all_fields_equal() {
        let event = BusEvent {
            event_type: "gate-approved".into(),
            data: json!({"gate": "g", "approved": true}),
        };
        let filter = EventFilter::new().with("gate", json!("g"));
        assert!(filter.matches(&event));

        let mismatched = EventFilter::new().with("gate", json!("other"));
        assert!(!mismatched.matches(&event));
    }

    #[test]
    fn filter_fails_when_field_absent() {
        let event = BusEvent {
            event_type: "custom".into(),
            data: json!({}),
        };
        let filter = EventFilter::new().with("gate", json!("g"));
        assert!(!filter.matches(&event));
    }
}
