//! Redaction of sensitive payload and metadata fields
//!
//! A key is sensitive when its lower-cased name contains any configured
//! field substring. Sensitive values are replaced by [`REDACTED`] whatever
//! their type. Nested objects and objects inside arrays are walked; every
//! other value passes through unchanged.
//!
//! The input is never mutated: each call builds a fresh tree.

use serde_json::{Map, Value};

use crate::event::TelemetryEvent;

/// Replacement written in place of a sensitive value
pub const REDACTED: &str = "[REDACTED]";

/// Field substrings masked when no list is configured
pub const DEFAULT_REDACT_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "authorization",
    "credentials",
    "private_key",
];

/// Redact a JSON tree with the given field list
pub fn redact(value: &Value, fields: &[String]) -> Value {
    Redactor::new(fields).redact_value(value)
}

/// Pre-normalized field list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redactor {
    needles: Vec<String>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(DEFAULT_REDACT_FIELDS)
    }
}

impl Redactor {
    /// Empty entries are ignored (they would match every key)
    pub fn new<S: AsRef<str>>(fields: &[S]) -> Self {
        let needles = fields
            .iter()
            .map(|f| f.as_ref().trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        Self { needles }
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let key = key.to_lowercase();
        self.needles.iter().any(|needle| key.contains(needle.as_str()))
    }

    pub fn redact_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.redact_map(map)),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| match item {
                        Value::Object(map) => Value::Object(self.redact_map(map)),
                        other => other.clone(),
                    })
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    pub fn redact_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive(key) {
                    Value::String(REDACTED.to_string())
                } else {
                    self.redact_value(value)
                };
                (key.clone(), value)
            })
            .collect()
    }

    /// Copy of the event with payload and metadata redacted
    pub fn redact_event(&self, event: &TelemetryEvent) -> TelemetryEvent {
        let mut redacted = event.clone();
        redacted.payload = event.payload.as_ref().map(|p| self.redact_map(p));
        redacted.metadata = event.metadata.as_ref().map(|m| self.redact_map(m));
        redacted
    }
}
