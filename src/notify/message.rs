//! Outbound message model and event rendering.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::classifier::{Category, Classification, Priority};
use crate::event::{Event, EventKind};

/// Payload keys tried, in order, when picking a one-line summary for the subject.
const SUMMARY_KEYS: &[&str] = &[
    "title", "issue", "test_name", "test", "step", "error", "message", "subject", "summary",
];

/// Maximum subject summary length (chars) before truncation.
const MAX_SUMMARY_CHARS: usize = 80;

/// Priority header attached to an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityHeader {
    Normal,
    High,
    Urgent,
}

impl From<Priority> for PriorityHeader {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::Critical => PriorityHeader::Urgent,
            Priority::High => PriorityHeader::High,
            Priority::Medium | Priority::Low => PriorityHeader::Normal,
        }
    }
}

/// A rendered, immutable message waiting for delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub priority_header: PriorityHeader,
    pub event_kind: EventKind,
    /// The originating event's payload, carried so fallback files are complete.
    pub payload: Map<String, Value>,
    pub classification: Classification,
    pub created: DateTime<Utc>,
}

impl OutboundMessage {
    /// Render an event into a message for `recipient`.
    pub fn render(event: &Event, classification: Classification, recipient: &str) -> Self {
        let priority_header = PriorityHeader::from(classification.priority);
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.to_string(),
            subject: render_subject(event, classification, priority_header),
            body: render_body(event, classification),
            priority_header,
            event_kind: event.kind,
            payload: event.payload.clone(),
            classification,
            created: Utc::now(),
        }
    }
}

fn render_subject(event: &Event, classification: Classification, header: PriorityHeader) -> String {
    let mut subject = String::new();
    match header {
        PriorityHeader::Urgent => subject.push_str("[URGENT] "),
        PriorityHeader::High => subject.push_str("[HIGH] "),
        PriorityHeader::Normal => {}
    }
    let _ = write!(subject, "[{}] {}", classification.category, event.kind.label());
    if let Some(summary) = summary(event) {
        let _ = write!(subject, ": {summary}");
    }
    subject
}

fn summary(event: &Event) -> Option<String> {
    let raw = SUMMARY_KEYS
        .iter()
        .filter_map(|key| event.field(key))
        .map(str::trim)
        .find(|s| !s.is_empty())?;
    let line = raw.lines().next().unwrap_or(raw);
    if line.chars().count() > MAX_SUMMARY_CHARS {
        let truncated: String = line.chars().take(MAX_SUMMARY_CHARS).collect();
        Some(format!("{truncated}..."))
    } else {
        Some(line.to_string())
    }
}

fn render_body(event: &Event, classification: Classification) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "{}", event.kind.label());
    let _ = writeln!(
        body,
        "Priority: {} ({})",
        classification.priority, classification.category
    );
    let _ = writeln!(body, "Reported: {}", event.created.to_rfc3339());

    if !event.payload.is_empty() {
        body.push_str("\nDetails:\n");
        for (key, value) in &event.payload {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let _ = writeln!(body, "- {key}: {rendered}");
        }
    }

    if classification.category == Category::CrisisSystem {
        body.push_str(
            "\nThis affects crisis support features. Verify the hotline and \
             emergency contact flows before anything else.\n",
        );
    }

    body
}
