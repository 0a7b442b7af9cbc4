//! BufferedTransport - buffering and redaction around any [`EventSink`]
//!
//! Send path:
//! 1. reject when closed, validate the event
//! 2. redact once (payload + metadata)
//! 3. buffering off: write straight to the sink
//! 4. buffering on: queue, flush when the queue reaches `size`
//!
//! A background tokio task flushes every `flush_interval`. It holds only a
//! weak reference, so dropping the transport ends it; `close()` cancels it
//! explicitly before the final flush.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{EventSink, Transport};
use crate::error::{Result, TelemetryError};
use crate::event::TelemetryEvent;
use crate::redact::Redactor;

/// Queueing policy of one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferOptions {
    pub enabled: bool,
    /// Queue length that triggers an implicit flush
    pub size: usize,
    pub flush_interval: Duration,
}

impl BufferOptions {
    /// File destinations write through unless told otherwise
    pub fn file_default() -> Self {
        Self {
            enabled: false,
            size: 10,
            flush_interval: Duration::from_millis(5000),
        }
    }

    pub fn http_default() -> Self {
        Self {
            enabled: true,
            size: 50,
            flush_interval: Duration::from_millis(5000),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::file_default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub buffer: BufferOptions,
    pub redactor: Option<Redactor>,
}

impl TransportOptions {
    pub fn new(buffer: BufferOptions) -> Self {
        Self {
            buffer,
            redactor: Some(Redactor::default()),
        }
    }

    pub fn with_redactor(mut self, redactor: Option<Redactor>) -> Self {
        self.redactor = redactor;
        self
    }
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new(BufferOptions::disabled())
    }
}

struct Shared<S> {
    sink: S,
    options: TransportOptions,
    queue: Mutex<Vec<TelemetryEvent>>,
    /// Serializes flushes so batches reach the sink in queue order
    flush_lock: tokio::sync::Mutex<()>,
    closed: AtomicBool,
}

impl<S: EventSink> Shared<S> {
    async fn flush(&self) -> Result<()> {
        let _guard = self.flush_lock.lock().await;
        let batch = std::mem::take(&mut *self.queue.lock());
        if batch.is_empty() {
            return Ok(());
        }

        let count = batch.len();
        match self.sink.write_batch(&batch).await {
            Ok(()) => {
                tracing::trace!(sink = self.sink.name(), count, "Flushed buffered events");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    sink = self.sink.name(),
                    count,
                    error = %e,
                    "Flush failed, dropping batch"
                );
                Err(e)
            }
        }
    }
}

struct FlushTimer {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FlushTimer {
    fn spawn<S: EventSink>(shared: Weak<Shared<S>>, interval: Duration) -> Option<Self> {
        // Timer needs a runtime; without one, size-triggered and explicit flushes still work
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shared) = shared.upgrade() else { break };
                        if let Err(e) = shared.flush().await {
                            tracing::warn!(
                                sink = shared.sink.name(),
                                error = %e,
                                "Timed flush failed"
                            );
                        }
                    }
                }
            }
        });

        Some(Self { cancel, handle })
    }

    fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Transport built from a sink plus the shared buffering/redaction policy
pub struct BufferedTransport<S: EventSink> {
    shared: Arc<Shared<S>>,
    timer: Option<FlushTimer>,
}

impl<S: EventSink> BufferedTransport<S> {
    pub fn new(sink: S, options: TransportOptions) -> Self {
        let buffer = options.buffer;
        let shared = Arc::new(Shared {
            sink,
            options,
            queue: Mutex::new(Vec::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
        });

        let timer = if buffer.enabled && !buffer.flush_interval.is_zero() {
            FlushTimer::spawn(Arc::downgrade(&shared), buffer.flush_interval)
        } else {
            None
        };

        Self { shared, timer }
    }

    pub fn sink(&self) -> &S {
        &self.shared.sink
    }

    pub fn options(&self) -> &TransportOptions {
        &self.shared.options
    }

    /// Events waiting for the next flush
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TelemetryError::Closed {
                transport: self.shared.sink.name().to_string(),
            });
        }
        Ok(())
    }

    fn prepare(&self, event: TelemetryEvent) -> Result<TelemetryEvent> {
        event.validate()?;
        Ok(match &self.shared.options.redactor {
            Some(redactor) => redactor.redact_event(&event),
            None => event,
        })
    }

    /// Queue events; true when the queue reached the flush threshold
    fn enqueue(&self, events: Vec<TelemetryEvent>) -> bool {
        let mut queue = self.shared.queue.lock();
        queue.extend(events);
        queue.len() >= self.shared.options.buffer.size
    }
}

#[async_trait]
impl<S: EventSink> Transport for BufferedTransport<S> {
    fn name(&self) -> &str {
        self.shared.sink.name()
    }

    async fn send(&self, event: TelemetryEvent) -> Result<()> {
        self.send_batch(vec![event]).await
    }

    async fn send_batch(&self, events: Vec<TelemetryEvent>) -> Result<()> {
        self.ensure_open()?;
        let events = events
            .into_iter()
            .map(|event| self.prepare(event))
            .collect::<Result<Vec<_>>>()?;
        if events.is_empty() {
            return Ok(());
        }

        if !self.shared.options.buffer.enabled {
            return self.shared.sink.write_batch(&events).await;
        }

        if self.enqueue(events) {
            self.shared.flush().await
        } else {
            Ok(())
        }
    }

    async fn flush(&self) -> Result<()> {
        self.shared.flush().await
    }

    async fn query_by_execution(&self, execution_id: &str) -> Result<Vec<TelemetryEvent>> {
        self.shared.sink.query_by_execution(execution_id).await
    }

    async fn query_by_workflow(&self, workflow_id: &str) -> Result<Vec<TelemetryEvent>> {
        self.shared.sink.query_by_workflow(workflow_id).await
    }

    async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(timer) = &self.timer {
            timer.stop();
        }

        let flushed = self.shared.flush().await;
        let released = self.shared.sink.close().await;
        if let Err(e) = &flushed {
            tracing::warn!(
                sink = self.shared.sink.name(),
                dropped = self.pending(),
                error = %e,
                "Final flush failed on close"
            );
        }
        flushed.and(released)
    }
}

impl<S: EventSink> Drop for BufferedTransport<S> {
    fn drop(&mut self) {
        if let Some(timer) = &self.timer {
            timer.stop();
            timer.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventScope, EventType, NodeContext};
    use crate::transport::MemorySink;
    use serde_json::json;

    // ═══════════════════════════════════════════════════════════════
    // Test helpers
    // ═══════════════════════════════════════════════════════════════

    fn scope() -> EventScope {
        EventScope {
            run_id: "run".into(),
            workflow_id: "wf".into(),
            workflow_name: None,
            execution_id: "exec-1".into(),
            session_id: None,
        }
    }

    fn started() -> TelemetryEvent {
        TelemetryEvent::new(EventType::WorkflowStarted, &scope())
    }

    fn buffered(size: usize, interval: Duration) -> BufferedTransport<MemorySink> {
        BufferedTransport::new(
            MemorySink::new(),
            TransportOptions::new(BufferOptions {
                enabled: true,
                size,
                flush_interval: interval,
            }),
        )
    }

    /// Sink whose writes always fail, counting the events it was handed
    #[derive(Default)]
    struct BrokenSink {
        attempted: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl EventSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        async fn write_batch(&self, events: &[TelemetryEvent]) -> Result<()> {
            self.attempted.fetch_add(events.len(), Ordering::SeqCst);
            Err(TelemetryError::FileWrite {
                path: "/dev/broken".into(),
                reason: "read-only".into(),
            })
        }

        async fn query_by_execution(&self, _id: &str) -> Result<Vec<TelemetryEvent>> {
            Ok(Vec::new())
        }

        async fn query_by_workflow(&self, _id: &str) -> Result<Vec<TelemetryEvent>> {
            Ok(Vec::new())
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Buffering
    // ═══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unbuffered_send_writes_through() {
        let transport = BufferedTransport::new(MemorySink::new(), TransportOptions::default());
        transport.send(started()).await.unwrap();
        assert_eq!(transport.sink().events().len(), 1);
        assert_eq!(transport.pending(), 0);
    }

    #[tokio::test]
    async fn flush_triggers_at_threshold() {
        let transport = buffered(3, Duration::from_secs(3600));
        transport.send(started()).await.unwrap();
        transport.send(started()).await.unwrap();
        assert_eq!(transport.sink().events().len(), 0);
        assert_eq!(transport.pending(), 2);

        transport.send(started()).await.unwrap();
        assert_eq!(transport.sink().events().len(), 3);
        assert_eq!(transport.pending(), 0);
    }

    #[tokio::test]
    async fn timer_flushes_on_interval() {
        let transport = buffered(100, Duration::from_millis(50));
        transport.send(started()).await.unwrap();
        assert_eq!(transport.sink().events().len(), 0);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(transport.sink().events().len(), 1);
    }

    #[tokio::test]
    async fn close_flushes_remaining_and_rejects_sends() {
        let transport = buffered(100, Duration::from_secs(3600));
        transport.send(started()).await.unwrap();
        transport.close().await.unwrap();

        assert_eq!(transport.sink().events().len(), 1);
        assert!(transport.is_closed());
        let err = transport.send(started()).await.unwrap_err();
        assert!(matches!(err, TelemetryError::Closed { .. }));
        // second close is a no-op
        transport.close().await.unwrap();
    }

    fn broken(size: usize) -> BufferedTransport<BrokenSink> {
        BufferedTransport::new(
            BrokenSink::default(),
            TransportOptions::new(BufferOptions {
                enabled: true,
                size,
                flush_interval: Duration::from_secs(3600),
            }),
        )
    }

    #[tokio::test]
    async fn failed_flush_drops_batch_and_propagates() {
        let transport = broken(100);
        transport.send(started()).await.unwrap();
        transport.send(started()).await.unwrap();

        assert!(transport.flush().await.is_err());
        assert_eq!(transport.pending(), 0);
        assert_eq!(transport.sink().attempted.load(Ordering::SeqCst), 2);

        // close stops the timer and marks closed
        transport.close().await.unwrap();
        assert!(transport.is_closed());
        assert!(transport.timer.as_ref().unwrap().cancel.is_cancelled());
    }

    #[tokio::test]
    async fn failing_sink_never_grows_the_queue() {
        let transport = broken(5);
        let mut errors = 0;
        for _ in 0..200 {
            if transport.send(started()).await.is_err() {
                errors += 1;
            }
            assert!(transport.pending() < 5);
        }

        assert_eq!(errors, 40);
        // every event handed to the sink exactly once
        assert_eq!(transport.sink().attempted.load(Ordering::SeqCst), 200);
    }

    #[tokio::test]
    async fn close_surfaces_failed_final_flush() {
        let transport = broken(100);
        transport.send(started()).await.unwrap();
        assert!(transport.close().await.is_err());
        assert!(transport.is_closed());
        assert_eq!(transport.pending(), 0);
    }

    // ═══════════════════════════════════════════════════════════════
    // Validation & redaction
    // ═══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn invalid_event_is_rejected_before_queueing() {
        let transport = buffered(10, Duration::from_secs(3600));
        // node event without node_context
        let event = TelemetryEvent::new(EventType::NodeStarted, &scope());
        let err = transport.send(event).await.unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidEvent { .. }));
        assert_eq!(transport.pending(), 0);
    }

    #[tokio::test]
    async fn events_are_redacted_before_reaching_sink() {
        let transport = BufferedTransport::new(MemorySink::new(), TransportOptions::default());
        let event = TelemetryEvent::new(EventType::NodeStarted, &scope())
            .with_node(NodeContext::new("fetch", "http"))
            .with_payload(json!({"url": "https://x", "headers": {"Authorization": "Bearer abc"}}));
        transport.send(event).await.unwrap();

        let stored = &transport.sink().events()[0];
        let payload = stored.payload.as_ref().unwrap();
        assert_eq!(payload["url"], "https://x");
        assert_eq!(payload["headers"]["Authorization"], "[REDACTED]");
    }

    #[tokio::test]
    async fn redaction_can_be_disabled() {
        let transport = BufferedTransport::new(
            MemorySink::new(),
            TransportOptions::default().with_redactor(None),
        );
        let event = started().with_payload(json!({"token": "t"}));
        transport.send(event).await.unwrap();
        assert_eq!(transport.sink().events()[0].payload.as_ref().unwrap()["token"], "t");
    }
}
