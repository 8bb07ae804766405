//! Redaction of sensitive values in structured context.

use serde_json::{Map, Value};

/// Replacement written in place of sensitive values.
pub const DEFAULT_REDACTION_MARKER: &str = "[REDACTED]";

/// Keys whose values are always redacted.
///
/// Matching ignores case and punctuation, and a key matches when it contains
/// any entry, so `api_key`, `X-Api-Key` and `accessToken` are all caught.
pub const DEFAULT_SENSITIVE_KEYS: &[&str] = &[
    "password",
    "passwd",
    "apiKey",
    "token",
    "secret",
    "authorization",
    "cookie",
    "credential",
    "privateKey",
];

/// Recursively redacts values stored under sensitive keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sanitizer {
    deny: Vec<String>,
    marker: String,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Sanitizer {
    pub fn new() -> Self {
        Self {
            deny: DEFAULT_SENSITIVE_KEYS
                .iter()
                .map(|k| normalize_key(k))
                .collect(),
            marker: DEFAULT_REDACTION_MARKER.to_string(),
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Adds keys on top of the defaults.
    pub fn with_extra_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            let normalized = normalize_key(key.as_ref());
            if !normalized.is_empty() && !self.deny.contains(&normalized) {
                self.deny.push(normalized);
            }
        }
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn is_sensitive(&self, key: &str) -> bool {
        let normalized = normalize_key(key);
        self.deny.iter().any(|term| normalized.contains(term.as_str()))
    }

    /// Returns a copy of `value` with sensitive entries replaced by the marker.
    pub fn sanitize(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.sanitize_map(map)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.sanitize(v)).collect()),
            other => other.clone(),
        }
    }

    fn sanitize_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(key, value)| {
                let value = if self.is_sensitive(key) {
                    Value::String(self.marker.clone())
                } else {
                    self.sanitize(value)
                };
                (key.clone(), value)
            })
            .collect()
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
