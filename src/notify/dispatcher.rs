//! Notification dispatcher — FIFO delivery queue with file fallback.
//!
//! `submit()` renders an event, appends it to the queue and starts a drain
//! task if none is running. The drain pops messages one at a time and hands
//! them to the transport; any failure (no transport, send error, timeout)
//! sends that single message to the fallback store and the loop moves on.
//! Nothing is retried and nothing is re-queued.
//!
//! At most one drain runs at a time. The `draining` flag is claimed with a
//! compare-exchange; after releasing it the drainer re-checks the queue so a
//! message pushed in that window is not stranded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::classifier::Classifier;
use crate::error::TransportError;
use crate::event::Event;
use crate::notify::fallback::FallbackStore;
use crate::notify::message::OutboundMessage;
use crate::notify::transport::Transport;

/// Default per-send timeout.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub recipient: String,
    pub send_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            recipient: "ops@localhost".to_string(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub submitted: usize,
    pub delivered: usize,
    pub fallback: usize,
    /// Messages that neither sent nor persisted. Logged in full at `error`.
    pub lost: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    delivered: AtomicUsize,
    fallback: AtomicUsize,
    lost: AtomicUsize,
}

struct Inner {
    transport: Option<Arc<dyn Transport>>,
    fallback: FallbackStore,
    classifier: Arc<Classifier>,
    config: DispatcherConfig,
    queue: Mutex<VecDeque<OutboundMessage>>,
    draining: AtomicBool,
    /// Submitted but not yet delivered or persisted.
    outstanding: watch::Sender<usize>,
    counters: Counters,
}

/// Owns the delivery queue. Cheap to clone; clones share the queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher. `transport = None` routes everything to the fallback store.
    pub fn new(
        transport: Option<Arc<dyn Transport>>,
        fallback: FallbackStore,
        classifier: Arc<Classifier>,
        config: DispatcherConfig,
    ) -> Self {
        let (outstanding, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                transport,
                fallback,
                classifier,
                config,
                queue: Mutex::new(VecDeque::new()),
                draining: AtomicBool::new(false),
                outstanding,
                counters: Counters::default(),
            }),
        }
    }

    /// Render and enqueue an event, then make sure a drain is running.
    ///
    /// Returns immediately. Must be called from within a tokio runtime.
    pub fn submit(&self, event: Event) {
        let classification = self.inner.classifier.classify_event(&event);
        let message = OutboundMessage::render(&event, classification, &self.inner.config.recipient);

        debug!(
            message_id = %message.id,
            kind = %event.kind,
            priority = %classification.priority,
            category = %classification.category,
            "Notification queued"
        );

        self.inner.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.inner.outstanding.send_modify(|n| *n += 1);
        self.inner.lock_queue().push_back(message);

        if self.inner.try_claim_drain() {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.drain_claimed().await;
            });
        }
    }

    /// Drain the queue on the current task.
    ///
    /// Returns the number of messages processed, or 0 if another drain is
    /// already active (that drain will pick up everything queued).
    pub async fn drain(&self) -> usize {
        if self.inner.try_claim_drain() {
            self.inner.drain_claimed().await
        } else {
            0
        }
    }

    /// Wait until every submitted message is delivered or persisted.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Run `work`, then wait for every submitted message before returning
    /// its output. An early error inside `work` still lets queued messages
    /// reach the transport or the fallback store.
    pub async fn settle<F: Future>(&self, work: F) -> F::Output {
        let output = work.await;
        self.wait_idle().await;
        output
    }

    /// Messages still waiting in the queue (excludes one mid-delivery).
    pub fn queued(&self) -> usize {
        self.inner.lock_queue().len()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> DispatchStats {
        let c = &self.inner.counters;
        DispatchStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            fallback: c.fallback.load(Ordering::Relaxed),
            lost: c.lost.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<OutboundMessage>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_claim_drain(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn pop(&self) -> Option<OutboundMessage> {
        self.lock_queue().pop_front()
    }

    /// Caller must hold the drain claim.
    async fn drain_claimed(&self) -> usize {
        let mut processed = 0;
        loop {
            while let Some(message) = self.pop() {
                self.deliver(message).await;
                processed += 1;
                self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            }

            self.draining.store(false, Ordering::Release);

            // A submit may have pushed after the last pop but seen the flag
            // still set; reclaim and continue if so.
            if self.lock_queue().is_empty() || !self.try_claim_drain() {
                break;
            }
        }

        if processed > 0 {
            debug!(processed, "Drain pass finished");
        }
        processed
    }

    async fn deliver(&self, message: OutboundMessage) {
        let outcome = match &self.transport {
            None => Err(TransportError::Unavailable),
            Some(transport) => {
                match tokio::time::timeout(self.config.send_timeout, transport.send(&message)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(self.config.send_timeout)),
                }
            }
        };

        let reason = match outcome {
            Ok(delivery_id) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                info!(
                    message_id = %message.id,
                    delivery_id = %delivery_id,
                    kind = %message.event_kind,
                    "Notification delivered"
                );
                return;
            }
            Err(e) => e,
        };

        warn!(
            message_id = %message.id,
            kind = %message.event_kind,
            error = %reason,
            "Delivery failed, writing to fallback store"
        );

        match self.fallback.persist(&message, &reason.to_string()).await {
            Ok(path) => {
                self.counters.fallback.fetch_add(1, Ordering::Relaxed);
                info!(
                    message_id = %message.id,
                    path = %path.display(),
                    "Notification queued for manual send"
                );
            }
            Err(e) => {
                self.counters.lost.fetch_add(1, Ordering::Relaxed);
                error!(
                    message_id = %message.id,
                    kind = %message.event_kind,
                    recipient = %message.recipient,
                    subject = %message.subject,
                    body = %message.body,
                    error = %e,
                    "Fallback write failed, notification not persisted"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use async_trait::async_trait;
    use serde_json::json;

    /// Records every message it is given; fails when `fail` is set.
    struct RecordingTransport {
        sent: Mutex<Vec<OutboundMessage>>,
        fail: bool,
    }

    impl RecordingTransport {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                fail,
            })
        }

        fn subjects(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.subject.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, message: &OutboundMessage) -> Result<String, TransportError> {
            if self.fail {
                return Err(TransportError::SendFailed("connection refused".into()));
            }
            self.sent.lock().unwrap().push(message.clone());
            Ok(message.id.to_string())
        }
    }

    /// Blocks every send until the gate opens.
    struct GatedTransport {
        gate: watch::Receiver<bool>,
        inner: Arc<RecordingTransport>,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        fn name(&self) -> &str {
            "gated"
        }

        async fn send(&self, message: &OutboundMessage) -> Result<String, TransportError> {
            let mut gate = self.gate.clone();
            let _ = gate.wait_for(|open| *open).await;
            self.inner.send(message).await
        }
    }

    /// Never completes.
    struct HangingTransport;

    #[async_trait]
    impl Transport for HangingTransport {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn send(&self, _message: &OutboundMessage) -> Result<String, TransportError> {
            std::future::pending().await
        }
    }

    fn event(title: &str) -> Event {
        Event::from_json(EventKind::TestFailure, json!({ "title": title })).unwrap()
    }

    fn dispatcher(transport: Option<Arc<dyn Transport>>, dir: &std::path::Path) -> Dispatcher {
        Dispatcher::new(
            transport,
            FallbackStore::new(dir),
            Arc::new(Classifier::default_rules()),
            DispatcherConfig {
                recipient: "ops@example.com".into(),
                send_timeout: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn delivers_in_fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(false);
        let d = dispatcher(Some(transport.clone() as Arc<dyn Transport>), dir.path());

        for i in 0..5 {
            d.submit(event(&format!("event {i}")));
        }
        d.wait_idle().await;

        let subjects = transport.subjects();
        assert_eq!(subjects.len(), 5);
        for (i, subject) in subjects.iter().enumerate() {
            assert!(subject.ends_with(&format!("event {i}")), "{subject}");
        }
        assert_eq!(
            d.stats(),
            DispatchStats {
                submitted: 5,
                delivered: 5,
                fallback: 0,
                lost: 0
            }
        );
    }

    #[tokio::test]
    async fn no_transport_writes_one_fallback_file_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(None, dir.path());

        for i in 0..4 {
            d.submit(event(&format!("event {i}")));
        }
        d.wait_idle().await;

        let store = FallbackStore::new(dir.path());
        assert_eq!(store.list().await.unwrap().len(), 4);
        assert_eq!(d.stats().fallback, 4);
    }

    #[tokio::test]
    async fn failing_transport_does_not_stop_the_loop() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(Some(RecordingTransport::new(true) as Arc<dyn Transport>), dir.path());

        d.submit(event("one"));
        d.submit(event("two"));
        d.wait_idle().await;

        let stats = d.stats();
        assert_eq!(stats.delivered, 0);
        assert_eq!(stats.fallback, 2);
        assert!(!d.is_draining());
    }

    #[tokio::test]
    async fn hung_send_times_out_into_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let d = Dispatcher::new(
            Some(Arc::new(HangingTransport) as Arc<dyn Transport>),
            FallbackStore::new(dir.path()),
            Arc::new(Classifier::default_rules()),
            DispatcherConfig {
                recipient: "ops@example.com".into(),
                send_timeout: Duration::from_millis(50),
            },
        );

        d.submit(event("stuck"));
        d.wait_idle().await;

        let store = FallbackStore::new(dir.path());
        let files = store.list().await.unwrap();
        assert_eq!(files.len(), 1);
        let record = store.load(&files[0]).await.unwrap();
        assert!(record.failure_reason.contains("timed out"));
    }

    #[tokio::test]
    async fn submissions_during_drain_are_each_handled_once() {
        let dir = tempfile::tempdir().unwrap();
        let (open_tx, open_rx) = watch::channel(false);
        let recorder = RecordingTransport::new(false);
        let gated = Arc::new(GatedTransport {
            gate: open_rx,
            inner: recorder.clone(),
        });
        let d = dispatcher(Some(gated as Arc<dyn Transport>), dir.path());

        d.submit(event("first"));
        // Let the drain task start and block on the gate.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(d.is_draining());

        for i in 0..20 {
            d.submit(event(&format!("late {i}")));
        }
        // A second drain must not start while the first is active.
        assert_eq!(d.drain().await, 0);

        open_tx.send(true).unwrap();
        d.wait_idle().await;

        let subjects = recorder.subjects();
        assert_eq!(subjects.len(), 21);
        let mut ids: Vec<_> = recorder.sent.lock().unwrap().iter().map(|m| m.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 21);
        assert!(subjects[0].ends_with("first"));
        assert!(subjects[20].ends_with("late 19"));
    }

    #[tokio::test]
    async fn explicit_drain_processes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let transport = RecordingTransport::new(false);
        let d = dispatcher(Some(transport.clone() as Arc<dyn Transport>), dir.path());

        d.submit(event("a"));
        d.submit(event("b"));
        // Either the spawned task or this call does the work; never both.
        let processed_here = d.drain().await;
        d.wait_idle().await;

        assert!(processed_here <= 2);
        assert_eq!(transport.subjects().len(), 2);
        assert_eq!(d.queued(), 0);
    }

    #[tokio::test]
    async fn settle_flushes_queue_even_when_work_fails() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(None, dir.path());

        let result: Result<(), String> = d
            .settle(async {
                d.submit(event("queued before the error"));
                d.submit(event("also queued"));
                Err("later step failed".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(d.queued(), 0);
        assert_eq!(d.stats().fallback, 2);
        assert_eq!(FallbackStore::new(dir.path()).list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unwritable_fallback_counts_as_lost() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the fallback directory should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"x").unwrap();
        let d = dispatcher(None, &blocker);

        d.submit(event("nowhere to go"));
        d.wait_idle().await;

        assert_eq!(d.stats().lost, 1);
    }
}
