//! TODO record model and Markdown rendering.

use std::fmt::Write as _;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::classifier::{Category, Priority};

/// Lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Open,
    InProgress,
    Done,
}

impl TodoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::Open => "open",
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Done => "done",
        }
    }
}

impl std::str::FromStr for TodoStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "open" => Ok(TodoStatus::Open),
            "in_progress" => Ok(TodoStatus::InProgress),
            "done" => Ok(TodoStatus::Done),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

/// A persisted TODO / bug-report item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub category: Category,
    pub status: TodoStatus,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Informational target date derived from priority. Not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
}

/// How long after creation a record of the given priority should be resolved.
pub fn deadline_offset(priority: Priority) -> Option<Duration> {
    match priority {
        Priority::Critical => Some(Duration::hours(4)),
        Priority::High => Some(Duration::hours(24)),
        Priority::Medium => Some(Duration::hours(72)),
        Priority::Low => None,
    }
}

impl TodoRecord {
    /// Create an open record; the deadline follows from `priority`.
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        priority: Priority,
        category: Category,
    ) -> Self {
        let created = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            priority,
            category,
            status: TodoStatus::Open,
            created,
            metadata: serde_json::json!({}),
            labels: Vec::new(),
            deadline: deadline_offset(priority).map(|d| created + d),
        }
    }

    /// Builder: set metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Builder: add a label (duplicates are ignored).
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        if !self.labels.contains(&label) {
            self.labels.push(label);
        }
        self
    }

    /// Render as a Markdown document.
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# {}", self.title);
        md.push('\n');
        let _ = writeln!(md, "- **ID:** `{}`", self.id);
        let _ = writeln!(md, "- **Priority:** {}", self.priority);
        let _ = writeln!(md, "- **Category:** {}", self.category);
        let _ = writeln!(md, "- **Status:** {}", self.status.as_str());
        let _ = writeln!(md, "- **Created:** {}", self.created.to_rfc3339());
        if let Some(deadline) = self.deadline {
            let _ = writeln!(md, "- **Deadline:** {}", deadline.to_rfc3339());
        }
        if !self.labels.is_empty() {
            let labels: Vec<String> = self.labels.iter().map(|l| format!("`{l}`")).collect();
            let _ = writeln!(md, "- **Labels:** {}", labels.join(", "));
        }

        md.push_str("\n## Description\n\n");
        md.push_str(self.description.trim_end());
        md.push('\n');

        if self.metadata.as_object().is_some_and(|m| !m.is_empty()) {
            md.push_str("\n## Metadata\n\n```json\n");
            md.push_str(
                &serde_json::to_string_pretty(&self.metadata).unwrap_or_else(|_| "{}".into()),
            );
            md.push_str("\n```\n");
        }
        md
    }
}
