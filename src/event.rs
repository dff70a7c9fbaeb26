//! Operational events — the typed occurrences that feed the classifier,
//! the TODO generator, and the notification dispatcher.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ParseError;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    TestFailure,
    BuildFailure,
    SecurityAlert,
    CrisisError,
    BugReport,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::TestFailure,
        EventKind::BuildFailure,
        EventKind::SecurityAlert,
        EventKind::CrisisError,
        EventKind::BugReport,
    ];

    /// Wire form, e.g. `security-alert`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::TestFailure => "test-failure",
            EventKind::BuildFailure => "build-failure",
            EventKind::SecurityAlert => "security-alert",
            EventKind::CrisisError => "crisis-error",
            EventKind::BugReport => "bug-report",
        }
    }

    /// File-name form, e.g. `security_alert`.
    pub fn slug(&self) -> String {
        self.as_str().replace('-', "_")
    }

    /// Human-readable label used in subjects and titles.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::TestFailure => "Test failure",
            EventKind::BuildFailure => "Build failure",
            EventKind::SecurityAlert => "Security alert",
            EventKind::CrisisError => "Crisis system error",
            EventKind::BugReport => "Bug report",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParseError;

    /// Accepts both `security-alert` and `security_alert`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        EventKind::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| ParseError::UnknownKind(s.to_string()))
    }
}

/// An immutable operational event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub created: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, payload: Map<String, Value>) -> Self {
        Self {
            kind,
            payload,
            created: Utc::now(),
        }
    }

    /// Build an event from a JSON value that must be an object.
    pub fn from_json(kind: EventKind, payload: Value) -> Result<Self, ParseError> {
        match payload {
            Value::Object(map) => Ok(Self::new(kind, map)),
            Value::Null => Ok(Self::new(kind, Map::new())),
            other => Err(ParseError::InvalidPayload(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// String field from the payload, if present and a string.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Flattened, lowercase text of every scalar in the payload, in key order.
    ///
    /// Missing or null fields contribute nothing.
    pub fn text(&self) -> String {
        let mut parts = Vec::new();
        for value in self.payload.values() {
            collect_text(value, &mut parts);
        }
        parts.join(" ").to_lowercase()
    }
}

fn collect_text(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Null => {}
        Value::String(s) => {
            if !s.is_empty() {
                out.push(s.clone());
            }
        }
        Value::Bool(b) => out.push(b.to_string()),
        Value::Number(n) => out.push(n.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_text(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_text(v, out)),
    }
}
