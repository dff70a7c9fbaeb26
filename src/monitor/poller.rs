//! Mail monitor — polls IMAP and turns unseen emails into bug reports.
//!
//! Each poll:
//! 1. Fetches unseen messages (blocking IMAP on `spawn_blocking`)
//! 2. Parses each; a `ParseError` skips only that message
//! 3. Drops self-sent mail, non-allowlisted senders and duplicates
//! 4. Saves a bug-report record per remaining email
//! 5. Escalates critical reports through the dispatcher, when one is attached
//!
//! The server has already flagged fetched mail `\Seen`, so a message whose
//! record could not be saved is held in memory and retried on the next poll.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::classifier::Priority;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::event::{Event, EventKind};
use crate::monitor::allowlist::is_sender_allowed;
use crate::monitor::imap::{self, RawMessage};
use crate::monitor::parse::parse_email;
use crate::notify::Dispatcher;
use crate::todos::{TodoGenerator, TodoStore};

/// Characters of the email body copied into an escalation event.
const ESCALATION_EXCERPT_CHARS: usize = 500;

/// Outcome of one poll.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollReport {
    pub fetched: usize,
    pub unparseable: usize,
    pub skipped: usize,
    /// Saves that failed; those messages are retried on the next poll.
    pub failed: usize,
    pub created: Vec<Uuid>,
    pub escalated: usize,
}

pub struct MailMonitor {
    config: MonitorConfig,
    generator: TodoGenerator,
    store: TodoStore,
    dispatcher: Option<Dispatcher>,
    seen: Mutex<HashSet<String>>,
    retry: Mutex<Vec<RawMessage>>,
}

impl MailMonitor {
    pub fn new(
        config: MonitorConfig,
        generator: TodoGenerator,
        store: TodoStore,
        dispatcher: Option<Dispatcher>,
    ) -> Self {
        Self {
            config,
            generator,
            store,
            dispatcher,
            seen: Mutex::new(HashSet::new()),
            retry: Mutex::new(Vec::new()),
        }
    }

    /// Fetch and process one batch.
    pub async fn poll_once(&self) -> Result<PollReport> {
        let cfg = self.config.clone();
        let raw = tokio::task::spawn_blocking(move || imap::fetch_unseen(&cfg))
            .await
            .map_err(|e| MonitorError::Task(e.to_string()))??;

        if raw.is_empty() {
            debug!("No unseen emails");
        }
        let mut batch = self.take_retries();
        if !batch.is_empty() {
            info!(count = batch.len(), "Retrying emails whose reports were not saved");
        }
        batch.extend(raw);
        self.process(batch).await
    }

    /// Messages waiting to be retried after a failed save.
    pub fn pending_retries(&self) -> usize {
        self.retry.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn take_retries(&self) -> Vec<RawMessage> {
        std::mem::take(&mut *self.retry.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Process already-fetched messages.
    pub async fn process(&self, raw: Vec<RawMessage>) -> Result<PollReport> {
        let mut report = PollReport {
            fetched: raw.len(),
            ..PollReport::default()
        };

        for message in raw {
            let email = match parse_email(&message.bytes) {
                Ok(email) => email,
                Err(e) => {
                    warn!(seq = message.seq, error = %e, "Skipping unparseable email");
                    report.unparseable += 1;
                    continue;
                }
            };

            if email.sender.eq_ignore_ascii_case(&self.config.username) {
                debug!(sender = %email.sender, "Skipping self-sent email");
                report.skipped += 1;
                continue;
            }

            if !is_sender_allowed(&self.config.allowed_senders, &email.sender) {
                warn!(sender = %email.sender, "Blocked email from sender not on allowlist");
                report.skipped += 1;
                continue;
            }

            if self.is_seen(&email.message_id) {
                debug!(message_id = %email.message_id, "Skipping duplicate email");
                report.skipped += 1;
                continue;
            }

            let record = self.generator.from_email(&email);
            if let Err(e) = self.store.save(&record).await {
                error!(
                    seq = message.seq,
                    message_id = %email.message_id,
                    sender = %email.sender,
                    subject = %email.subject,
                    error = %e,
                    "Failed to save bug report, will retry next poll"
                );
                report.failed += 1;
                self.retry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(message);
                continue;
            }
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(email.message_id.clone());
            info!(
                id = %record.id,
                sender = %email.sender,
                priority = %record.priority,
                category = %record.category,
                "Bug report created from email"
            );
            report.created.push(record.id);

            if record.priority == Priority::Critical
                && let Some(dispatcher) = &self.dispatcher
            {
                let excerpt: String = email.body.chars().take(ESCALATION_EXCERPT_CHARS).collect();
                let event = Event::from_json(
                    EventKind::BugReport,
                    json!({
                        "title": record.title,
                        "sender": email.sender,
                        "subject": email.subject,
                        "body": excerpt,
                        "todo_id": record.id.to_string(),
                    }),
                )?;
                dispatcher.submit(event);
                report.escalated += 1;
            }
        }

        Ok(report)
    }

    fn is_seen(&self, message_id: &str) -> bool {
        self.seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(message_id)
    }
}

/// Spawn a background task that polls on the configured interval.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_mail_monitor(monitor: Arc<MailMonitor>) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        let interval = monitor.config.poll_interval_secs;
        info!(
            host = %monitor.config.imap_host,
            interval_secs = interval,
            "Mail monitor started"
        );

        let mut tick = tokio::time::interval(Duration::from_secs(interval));

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Mail monitor shutting down");
                return;
            }

            match monitor.poll_once().await {
                Ok(report) if report.fetched > 0 || report.failed > 0 => {
                    info!(
                        fetched = report.fetched,
                        created = report.created.len(),
                        unparseable = report.unparseable,
                        skipped = report.skipped,
                        failed = report.failed,
                        escalated = report.escalated,
                        "Mail poll finished"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Mail poll failed: {e}"),
            }
        }
    });

    (handle, shutdown_flag)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use crate::notify::{DispatcherConfig, FallbackStore};
    use secrecy::SecretString;
    use std::path::Path;

    fn config(allowed: &[&str], report_dir: &Path) -> MonitorConfig {
        MonitorConfig {
            imap_host: "imap.test.com".into(),
            imap_port: 993,
            username: "bugs@recovery.app".into(),
            password: SecretString::from("pw"),
            poll_interval_secs: 60,
            allowed_senders: allowed.iter().map(|s| s.to_string()).collect(),
            report_dir: report_dir.to_path_buf(),
        }
    }

    fn monitor(allowed: &[&str], dir: &Path, dispatcher: Option<Dispatcher>) -> MailMonitor {
        let classifier = Arc::new(Classifier::default_rules());
        MailMonitor::new(
            config(allowed, dir),
            TodoGenerator::new(classifier),
            TodoStore::new(dir),
            dispatcher,
        )
    }

    fn raw(seq: u32, from: &str, id: &str, subject: &str, body: &str) -> RawMessage {
        RawMessage {
            seq,
            bytes: format!(
                "From: {from}\r\nMessage-ID: <{id}>\r\nSubject: {subject}\r\n\r\n{body}\r\n"
            )
            .into_bytes(),
        }
    }

    #[tokio::test]
    async fn creates_one_report_per_valid_email() {
        let dir = tempfile::tempdir().unwrap();
        let m = monitor(&["*"], dir.path(), None);

        let report = m
            .process(vec![
                raw(1, "a@test.com", "1@x", "Button misaligned", "on settings"),
                raw(2, "b@test.com", "2@x", "Slow sync", "takes forever, very slow"),
            ])
            .await
            .unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.created.len(), 2);
        assert_eq!(TodoStore::new(dir.path()).list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unparseable_message_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let m = monitor(&["*"], dir.path(), None);

        let report = m
            .process(vec![
                RawMessage { seq: 1, bytes: Vec::new() },
                raw(2, "a@test.com", "2@x", "Real report", "details"),
            ])
            .await
            .unwrap();

        assert_eq!(report.unparseable, 1);
        assert_eq!(report.created.len(), 1);
    }

    #[tokio::test]
    async fn filters_self_blocked_and_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let m = monitor(&["@test.com", "bugs@recovery.app"], dir.path(), None);

        let report = m
            .process(vec![
                raw(1, "bugs@recovery.app", "1@x", "loop", "self"),
                raw(2, "stranger@else.org", "2@x", "spam", "spam"),
                raw(3, "qa@test.com", "3@x", "ok", "ok"),
                raw(4, "qa@test.com", "3@x", "ok again", "same id"),
            ])
            .await
            .unwrap();

        assert_eq!(report.skipped, 3);
        assert_eq!(report.created.len(), 1);
    }

    #[tokio::test]
    async fn failed_save_is_retried_not_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the report directory should be.
        let report_dir = dir.path().join("reports");
        std::fs::write(&report_dir, b"x").unwrap();
        let m = monitor(&["*"], &report_dir, None);

        let report = m
            .process(vec![
                raw(1, "a@test.com", "a@x", "First", "one"),
                raw(2, "b@test.com", "b@x", "Second", "two"),
            ])
            .await
            .unwrap();

        assert_eq!(report.failed, 2);
        assert!(report.created.is_empty());
        assert_eq!(m.pending_retries(), 2);

        std::fs::remove_file(&report_dir).unwrap();
        let retried = m.process(m.take_retries()).await.unwrap();

        assert_eq!(retried.created.len(), 2);
        assert_eq!(retried.skipped, 0);
        assert_eq!(m.pending_retries(), 0);
        assert_eq!(TodoStore::new(&report_dir).list().await.unwrap().len(), 2);

        // Saved now, so a re-delivery is a duplicate.
        let again = m
            .process(vec![raw(3, "a@test.com", "a@x", "First", "one")])
            .await
            .unwrap();
        assert_eq!(again.skipped, 1);
    }

    #[tokio::test]
    async fn critical_reports_are_escalated() {
        let dir = tempfile::tempdir().unwrap();
        let fallback_dir = dir.path().join("fallback");
        let dispatcher = Dispatcher::new(
            None,
            FallbackStore::new(&fallback_dir),
            Arc::new(Classifier::default_rules()),
            DispatcherConfig::default(),
        );
        let m = monitor(&["*"], &dir.path().join("reports"), Some(dispatcher.clone()));

        let report = m
            .process(vec![
                raw(1, "a@test.com", "1@x", "Crisis hotline button broken", "nothing happens"),
                raw(2, "b@test.com", "2@x", "Typo", "in footer"),
            ])
            .await
            .unwrap();
        dispatcher.wait_idle().await;

        assert_eq!(report.escalated, 1);
        let files = FallbackStore::new(&fallback_dir).list().await.unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].to_string_lossy().ends_with("_bug_report.json"));
    }
}
