//! HTTP smoke checks against a deployed instance.
//!
//! Each check fetches one path and passes when the status matches and, if
//! set, the body contains the expected text. Request errors are failures,
//! never aborts. Failed results convert into `test-failure` events.

use std::time::{Duration, Instant};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::error::SmokeError;
use crate::event::{Event, EventKind};

fn default_status() -> u16 {
    200
}

/// One smoke check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeCheck {
    pub name: String,
    pub path: String,
    #[serde(default = "default_status")]
    pub expect_status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expect_text: Option<String>,
}

impl SmokeCheck {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            expect_status: default_status(),
            expect_text: None,
        }
    }

    /// Builder: require the body to contain `text`.
    pub fn expecting_text(mut self, text: &str) -> Self {
        self.expect_text = Some(text.to_string());
        self
    }

    /// Builder: require a specific status code.
    pub fn expecting_status(mut self, status: u16) -> Self {
        self.expect_status = status;
        self
    }

    /// Built-in checks for the recovery app's web surface.
    pub fn defaults() -> Vec<SmokeCheck> {
        vec![
            SmokeCheck::new("home", "/"),
            SmokeCheck::new("health", "/api/health"),
            SmokeCheck::new("crisis resources", "/crisis").expecting_text("988"),
        ]
    }
}

/// Result of one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmokeResult {
    pub name: String,
    pub url: String,
    pub passed: bool,
    pub detail: String,
    pub elapsed_ms: u64,
}

impl SmokeResult {
    /// A `test-failure` event for a failed check; `None` if it passed.
    pub fn to_event(&self) -> Option<Event> {
        if self.passed {
            return None;
        }
        let payload = json!({
            "suite": "smoke",
            "test_name": self.name,
            "url": self.url,
            "error": self.detail,
            "elapsed_ms": self.elapsed_ms,
        });
        Event::from_json(EventKind::TestFailure, payload).ok()
    }
}

pub struct SmokeRunner {
    client: reqwest::Client,
    base_url: Url,
}

impl SmokeRunner {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SmokeError> {
        let base_url = Url::parse(base_url).map_err(|e| SmokeError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SmokeError::Client(e.to_string()))?;
        Ok(Self { client, base_url })
    }

    /// Run every check in order.
    pub async fn run(&self, checks: &[SmokeCheck]) -> Vec<SmokeResult> {
        let mut results = Vec::with_capacity(checks.len());
        for check in checks {
            let result = self.run_check(check).await;
            if result.passed {
                info!(check = %result.name, elapsed_ms = result.elapsed_ms, "Smoke check passed");
            } else {
                warn!(check = %result.name, url = %result.url, detail = %result.detail, "Smoke check failed");
            }
            results.push(result);
        }
        results
    }

    async fn run_check(&self, check: &SmokeCheck) -> SmokeResult {
        let started = Instant::now();
        let (url, passed, detail) = match self.base_url.join(&check.path) {
            Err(e) => (
                format!("{}{}", self.base_url, check.path),
                false,
                format!("invalid path: {e}"),
            ),
            Ok(url) => {
                let (passed, detail) = self.fetch_and_compare(url.clone(), check).await;
                (url.to_string(), passed, detail)
            }
        };

        SmokeResult {
            name: check.name.clone(),
            url,
            passed,
            detail,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    async fn fetch_and_compare(&self, url: Url, check: &SmokeCheck) -> (bool, String) {
        let response = match self.client.get(url).send().await {
            Ok(r) => r,
            Err(e) => return (false, format!("request failed: {e}")),
        };

        let status = response.status().as_u16();
        if status != check.expect_status {
            return (
                false,
                format!("expected status {}, got {status}", check.expect_status),
            );
        }

        let Some(expected) = &check.expect_text else {
            return (true, format!("status {status}"));
        };

        match response.text().await {
            Ok(body) if body.contains(expected.as_str()) => (true, format!("status {status}, text found")),
            Ok(_) => (false, format!("body does not contain {expected:?}")),
            Err(e) => (false, format!("failed to read body: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_defaults_from_json() {
        let check: SmokeCheck = serde_json::from_str(r#"{"name":"home","path":"/"}"#).unwrap();
        assert_eq!(check.expect_status, 200);
        assert!(check.expect_text.is_none());
    }

    #[test]
    fn builtin_checks_include_crisis_page() {
        let checks = SmokeCheck::defaults();
        assert!(checks.iter().any(|c| c.expect_text.as_deref() == Some("988")));
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(matches!(
            SmokeRunner::new("not a url", Duration::from_secs(1)),
            Err(SmokeError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn passed_result_has_no_event() {
        let result = SmokeResult {
            name: "home".into(),
            url: "http://x/".into(),
            passed: true,
            detail: "status 200".into(),
            elapsed_ms: 5,
        };
        assert!(result.to_event().is_none());
    }

    #[test]
    fn failed_result_becomes_test_failure_event() {
        let result = SmokeResult {
            name: "crisis resources".into(),
            url: "http://x/crisis".into(),
            passed: false,
            detail: "expected status 200, got 500".into(),
            elapsed_ms: 12,
        };
        let event = result.to_event().unwrap();
        assert_eq!(event.kind, EventKind::TestFailure);
        assert_eq!(event.field("test_name"), Some("crisis resources"));
        assert_eq!(event.field("suite"), Some("smoke"));
    }
}
