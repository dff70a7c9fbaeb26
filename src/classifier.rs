//! Ordered pattern classifier — maps free text to a priority and category.
//!
//! Rules are evaluated in a fixed order and the first match wins:
//! - crisis terms → crisis-system / critical
//! - security terms → security / critical
//! - explicit severity or blocking flags → general / high
//! - performance terms → performance / medium
//! - build terms → build / medium
//!
//! Anything else is general / low. Crisis always outranks security, and
//! security always outranks the rest, so a safety signal is never masked by
//! a lower-severity match elsewhere in the same text.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::event::Event;

/// Urgency of a classified item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Routing category of a classified item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    CrisisSystem,
    Security,
    Performance,
    Build,
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::CrisisSystem => "crisis-system",
            Category::Security => "security",
            Category::Performance => "performance",
            Category::Build => "build",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of [`Classifier::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub priority: Priority,
    pub category: Category,
}

impl Default for Classification {
    fn default() -> Self {
        Self {
            priority: Priority::Low,
            category: Category::General,
        }
    }
}

/// A single classification rule with a compiled regex.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Short name, used in logs.
    pub name: String,
    pub regex: Regex,
    pub category: Category,
    pub priority: Priority,
}

/// First-match-wins classifier over an ordered rule list.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<Rule>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::default_rules()
    }
}

impl Classifier {
    /// The built-in rule set, in precedence order.
    pub fn default_rules() -> Self {
        let builtin: [(&str, &str, Category, Priority); 5] = [
            (
                "crisis",
                r"crisis|suicid|self[- ]?harm|emergency|hotline|\b988\b|overdose|relapse|safety plan",
                Category::CrisisSystem,
                Priority::Critical,
            ),
            (
                "security",
                r"security|vulnerab|injection|\bxss\b|csrf|exploit|auth(entication|orization)?\b|password|credential|token leak|\bcve-",
                Category::Security,
                Priority::Critical,
            ),
            (
                "severity",
                r"\b(critical|blocker|blocking|urgent|p0|sev[- ]?1|crash(es|ed|ing)?)\b",
                Category::General,
                Priority::High,
            ),
            (
                "performance",
                r"performance|\bslow\b|latency|timeout|timed out|memory leak|\bfps\b|\bjank\b",
                Category::Performance,
                Priority::Medium,
            ),
            (
                "build",
                r"\bbuild\b|compil|\bgradle\b|xcode|\bexpo\b|\bbundl|\blint\b|dependenc",
                Category::Build,
                Priority::Medium,
            ),
        ];

        let mut rules = Vec::with_capacity(builtin.len());
        for (name, pattern, category, priority) in builtin {
            match Rule::new(name, pattern, category, priority) {
                Ok(rule) => rules.push(rule),
                Err(e) => error!(rule = name, error = %e, "Built-in classification rule failed to compile"),
            }
        }

        Self { rules }
    }

    /// A classifier with no rules; everything is general / low.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule. It is evaluated after every existing rule.
    pub fn push_rule(
        &mut self,
        name: &str,
        pattern: &str,
        category: Category,
        priority: Priority,
    ) -> Result<(), regex::Error> {
        self.rules.push(Rule::new(name, pattern, category, priority)?);
        Ok(())
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Classify free text. The text is lowercased before matching.
    pub fn classify(&self, text: &str) -> Classification {
        let folded = text.to_lowercase();
        if folded.trim().is_empty() {
            return Classification::default();
        }

        for rule in &self.rules {
            if rule.regex.is_match(&folded) {
                debug!(
                    rule = %rule.name,
                    category = %rule.category,
                    priority = %rule.priority,
                    "Text matched classification rule"
                );
                return Classification {
                    priority: rule.priority,
                    category: rule.category,
                };
            }
        }

        Classification::default()
    }

    /// Classify an event by its payload text.
    pub fn classify_event(&self, event: &Event) -> Classification {
        self.classify(&event.text())
    }

    /// Classify a subject/body pair. Either side may be absent.
    pub fn classify_parts(&self, subject: Option<&str>, body: Option<&str>) -> Classification {
        let text = format!("{} {}", subject.unwrap_or_default(), body.unwrap_or_default());
        self.classify(&text)
    }
}

impl Rule {
    pub fn new(
        name: &str,
        pattern: &str,
        category: Category,
        priority: Priority,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
            category,
            priority,
        })
    }
}
