//! Builds TODO records from operational events and inbound bug-report emails.

use std::fmt::Write as _;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::classifier::{Category, Classifier};
use crate::event::{Event, EventKind};
use crate::monitor::InboundEmail;
use crate::todos::model::TodoRecord;

/// Payload keys that name the failing thing, per event kind.
fn subject_keys(kind: EventKind) -> &'static [&'static str] {
    match kind {
        EventKind::TestFailure => &["test_name", "test", "title"],
        EventKind::BuildFailure => &["step", "stage", "title"],
        EventKind::SecurityAlert => &["issue", "title"],
        EventKind::CrisisError => &["error", "component", "title"],
        EventKind::BugReport => &["title", "subject"],
    }
}

fn title_prefix(kind: EventKind) -> &'static str {
    match kind {
        EventKind::TestFailure => "Fix failing test",
        EventKind::BuildFailure => "Fix build failure",
        EventKind::SecurityAlert => "Security",
        EventKind::CrisisError => "Crisis system error",
        EventKind::BugReport => "Bug",
    }
}

fn next_steps(kind: EventKind) -> &'static str {
    match kind {
        EventKind::TestFailure => "Reproduce locally, fix the regression, and re-run the suite.",
        EventKind::BuildFailure => "Check the failing step's log and restore a green build.",
        EventKind::SecurityAlert => {
            "Assess exposure, patch, and rotate any credentials that may be affected."
        }
        EventKind::CrisisError => {
            "Verify hotline, emergency contact and safety-plan flows end to end before anything else."
        }
        EventKind::BugReport => "Triage, reproduce, and link a fix.",
    }
}

/// Turns events and emails into [`TodoRecord`]s.
#[derive(Clone)]
pub struct TodoGenerator {
    classifier: Arc<Classifier>,
}

impl TodoGenerator {
    pub fn new(classifier: Arc<Classifier>) -> Self {
        Self { classifier }
    }

    /// Build a record from an event.
    pub fn from_event(&self, event: &Event) -> TodoRecord {
        let classification = self.classifier.classify_event(event);

        let subject = subject_keys(event.kind)
            .iter()
            .filter_map(|key| event.field(key))
            .map(str::trim)
            .find(|s| !s.is_empty());
        let title = match subject {
            Some(s) => format!("{}: {}", title_prefix(event.kind), s),
            None => title_prefix(event.kind).to_string(),
        };

        let mut description = String::new();
        let _ = writeln!(description, "{} reported at {}.", event.kind.label(), event.created.to_rfc3339());
        if !event.payload.is_empty() {
            description.push('\n');
            for (key, value) in &event.payload {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let _ = writeln!(description, "- {key}: {rendered}");
            }
        }
        let _ = write!(description, "\nNext steps: {}", next_steps(event.kind));

        let record = TodoRecord::new(title, description, classification.priority, classification.category)
            .with_metadata(json!({
                "source": event.kind.as_str(),
                "event_created": event.created,
                "payload": Value::Object(event.payload.clone()),
                "generator": concat!("recovery-ops/", env!("CARGO_PKG_VERSION")),
            }))
            .with_label(event.kind.as_str())
            .with_label(classification.category.as_str())
            .with_label(classification.priority.as_str());

        finish_labels(record, event.kind)
    }

    /// Build a bug-report record from a parsed inbound email.
    pub fn from_email(&self, email: &InboundEmail) -> TodoRecord {
        let classification = self
            .classifier
            .classify_parts(Some(&email.subject), Some(&email.body));

        let subject = email.subject.trim();
        let title = if subject.is_empty() {
            format!("{}: report from {}", title_prefix(EventKind::BugReport), email.sender)
        } else {
            format!("{}: {}", title_prefix(EventKind::BugReport), subject)
        };

        let description = format!(
            "Reported by {} at {}.\n\n{}\n\nNext steps: {}",
            email.sender,
            email.received.to_rfc3339(),
            email.body.trim(),
            next_steps(EventKind::BugReport),
        );

        let record = TodoRecord::new(title, description, classification.priority, classification.category)
            .with_metadata(json!({
                "source": "email",
                "message_id": email.message_id,
                "sender": email.sender,
                "received": email.received,
                "generator": concat!("recovery-ops/", env!("CARGO_PKG_VERSION")),
            }))
            .with_label("email")
            .with_label(classification.category.as_str())
            .with_label(classification.priority.as_str());

        finish_labels(record, EventKind::BugReport)
    }
}

fn finish_labels(mut record: TodoRecord, kind: EventKind) -> TodoRecord {
    if record.category == Category::CrisisSystem {
        record = record.with_label("crisis-safety");
    }
    if kind == EventKind::BugReport {
        record = record.with_label("bug-report");
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Priority;
    use chrono::Utc;

    fn generator() -> TodoGenerator {
        TodoGenerator::new(Arc::new(Classifier::default_rules()))
    }

    fn event(kind: EventKind, payload: Value) -> Event {
        Event::from_json(kind, payload).unwrap()
    }

    #[test]
    fn test_failure_title_and_labels() {
        let record = generator().from_event(&event(
            EventKind::TestFailure,
            json!({ "test_name": "check-in streak", "error": "expected 3 got 2" }),
        ));
        assert_eq!(record.title, "Fix failing test: check-in streak");
        assert!(record.labels.contains(&"test-failure".to_string()));
        assert!(record.description.contains("- error: expected 3 got 2"));
        assert_eq!(record.metadata["source"], "test-failure");
    }

    #[test]
    fn security_alert_is_critical_with_deadline() {
        let record = generator().from_event(&event(
            EventKind::SecurityAlert,
            json!({ "severity": "critical", "issue": "SQL injection" }),
        ));
        assert_eq!(record.title, "Security: SQL injection");
        assert_eq!(record.priority, Priority::Critical);
        assert_eq!(record.category, Category::Security);
        assert!(record.deadline.is_some());
        assert_eq!(record.metadata["payload"]["issue"], "SQL injection");
    }

    #[test]
    fn crisis_events_get_safety_label() {
        let record = generator().from_event(&event(
            EventKind::CrisisError,
            json!({ "error": "crisis hotline link returns 500" }),
        ));
        assert_eq!(record.category, Category::CrisisSystem);
        assert!(record.labels.contains(&"crisis-safety".to_string()));
        assert!(record.description.contains("safety-plan"));
    }

    #[test]
    fn empty_payload_still_produces_a_record() {
        let record = generator().from_event(&event(EventKind::BuildFailure, json!({})));
        assert_eq!(record.title, "Fix build failure");
        assert_eq!(record.priority, Priority::Low);
        assert_eq!(record.category, Category::General);
        assert!(record.deadline.is_none());
    }

    #[test]
    fn email_becomes_bug_report() {
        let email = InboundEmail {
            message_id: "<abc@mail>".into(),
            sender: "tester@example.com".into(),
            subject: "App is slow on the meetings map".into(),
            body: "Takes ~10s to load.".into(),
            received: Utc::now(),
        };
        let record = generator().from_email(&email);
        assert_eq!(record.title, "Bug: App is slow on the meetings map");
        assert_eq!(record.category, Category::Performance);
        assert!(record.labels.contains(&"bug-report".to_string()));
        assert!(record.labels.contains(&"email".to_string()));
        assert_eq!(record.metadata["message_id"], "<abc@mail>");
        assert!(record.description.contains("tester@example.com"));
    }

    #[test]
    fn email_without_subject_uses_sender() {
        let email = InboundEmail {
            message_id: "<x@y>".into(),
            sender: "a@b.com".into(),
            subject: String::new(),
            body: String::new(),
            received: Utc::now(),
        };
        let record = generator().from_email(&email);
        assert_eq!(record.title, "Bug: report from a@b.com");
        assert_eq!(record.priority, Priority::Low);
    }
}
