//! Background request-log processor.
//!
//! Owns the channel connection lifecycle and the single consume task that
//! turns received events into persisted records.
//!
//! ```text
//! Stopped → Starting → Running → Stopping → Stopped
//!              │           │
//!              │           └─(subscription closed)→ Stopped
//!              └─(connect/subscribe failed)→ Stopped
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::audit::capture::CapturePolicy;
use crate::audit::event::{RequestLogEvent, RequestLogRecord};
use crate::audit::store::RequestLogStore;
use crate::channel::{DispatchEnd, EventHandler, LogChannel};
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Persists every consumed event as one record, after applying the capture
/// policy.
pub struct PersistingHandler {
    store: Arc<dyn RequestLogStore>,
    capture: Arc<CapturePolicy>,
}

impl PersistingHandler {
    pub fn new(store: Arc<dyn RequestLogStore>, capture: Arc<CapturePolicy>) -> Self {
        Self { store, capture }
    }
}

#[async_trait]
impl EventHandler for PersistingHandler {
    async fn handle(&self, event: RequestLogEvent) {
        let record = RequestLogRecord::from_event(self.capture.sanitize(event));
        let id = record.id;
        match self.store.insert(record).await {
            Ok(saved) => {
                tracing::debug!(
                    id = %saved.id,
                    method = %saved.method,
                    path = %saved.path,
                    status = saved.status_code,
                    "Persisted request log"
                );
                metrics::record_persist("persisted");
            }
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to persist request log");
                metrics::record_persist("failed");
            }
        }
    }
}

struct ConsumeTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

type TaskSlot = Arc<Mutex<Option<ConsumeTask>>>;

/// Subscribes to the log channel and persists each event.
pub struct RequestLogProcessor {
    channel: Arc<LogChannel>,
    store: Arc<dyn RequestLogStore>,
    capture: Arc<CapturePolicy>,
    shutdown_timeout: Duration,
    state: Arc<watch::Sender<ProcessorState>>,
    consuming: Arc<AtomicBool>,
    /// Serializes start/stop and holds the running task.
    task: TaskSlot,
}

impl RequestLogProcessor {
    pub fn new(
        channel: Arc<LogChannel>,
        store: Arc<dyn RequestLogStore>,
        capture: Arc<CapturePolicy>,
        shutdown_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ProcessorState::Stopped);
        Self {
            channel,
            store,
            capture,
            shutdown_timeout,
            state: Arc::new(state),
            consuming: Arc::new(AtomicBool::new(false)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.borrow()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ProcessorState> {
        self.state.subscribe()
    }

    /// Whether the consume task is alive and reading from the channel.
    pub fn is_consuming(&self) -> bool {
        self.consuming.load(Ordering::SeqCst)
    }

    /// Connect, subscribe and spawn the consume task.
    ///
    /// A no-op unless stopped. On connection or subscription failure the
    /// processor logs the error and stays stopped. If the transport later
    /// closes the subscription, the processor disconnects and returns to
    /// stopped so a new `start` can recover.
    pub async fn start(&self) {
        let mut task = self.task.lock().await;

        if self.state() != ProcessorState::Stopped {
            tracing::warn!(state = ?self.state(), "Request log processor already started");
            return;
        }
        self.state.send_replace(ProcessorState::Starting);

        self.channel.connect().await;
        if !self.channel.is_connected() {
            tracing::error!("Request log processor could not connect to the log channel");
            self.state.send_replace(ProcessorState::Stopped);
            return;
        }

        let subscription = match self.channel.subscribe().await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(error = %e, "Request log processor could not subscribe");
                self.channel.disconnect().await;
                self.state.send_replace(ProcessorState::Stopped);
                return;
            }
        };

        let cancel = CancellationToken::new();
        let handler = PersistingHandler::new(self.store.clone(), self.capture.clone());
        let consuming = self.consuming.clone();
        consuming.store(true, Ordering::SeqCst);

        let handle = tokio::spawn({
            let cancel = cancel.clone();
            let slot = self.task.clone();
            let channel = self.channel.clone();
            let state = self.state.clone();
            async move {
                let end = subscription.dispatch(&handler, &cancel).await;
                consuming.store(false, Ordering::SeqCst);
                if end == DispatchEnd::Closed {
                    stop_after_close(slot, channel, state, cancel).await;
                }
            }
        });

        *task = Some(ConsumeTask { cancel, handle });
        self.state.send_replace(ProcessorState::Running);
        tracing::info!(topic = %self.channel.topic(), "Request log processor started");
    }

    /// Cancel the consume task, wait for it, then disconnect.
    ///
    /// The task only observes cancellation while waiting for a message, so an
    /// insert already underway completes first. Past `shutdown_timeout` the
    /// task is aborted.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;

        let Some(ConsumeTask { cancel, mut handle }) = task.take() else {
            tracing::warn!("Request log processor is not running");
            return;
        };
        self.state.send_replace(ProcessorState::Stopping);

        cancel.cancel();
        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Request log consume task failed"),
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "Request log consume task did not stop in time, aborting"
                );
                handle.abort();
            }
        }
        self.consuming.store(false, Ordering::SeqCst);

        self.channel.disconnect().await;
        self.state.send_replace(ProcessorState::Stopped);
        tracing::info!("Request log processor stopped");
    }
}

/// Tear down after the transport ended the subscription.
///
/// Yields to a concurrent `stop`, which cancels the token before waiting on
/// the task.
async fn stop_after_close(
    slot: TaskSlot,
    channel: Arc<LogChannel>,
    state: Arc<watch::Sender<ProcessorState>>,
    cancel: CancellationToken,
) {
    let mut task = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        task = slot.lock() => task,
    };
    if cancel.is_cancelled() {
        return;
    }

    task.take();
    channel.disconnect().await;
    state.send_replace(ProcessorState::Stopped);
    tracing::warn!(
        topic = %channel.topic(),
        "Log channel subscription closed, request log processor stopped"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::memory::InMemoryRequestLogStore;
    use crate::channel::{ChannelError, MemoryTransport, MessageStream, PubSubTransport};
    use crate::config::RequestLogConfig;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn processor_over(
        transport: Arc<dyn PubSubTransport>,
        store: Arc<InMemoryRequestLogStore>,
    ) -> (Arc<LogChannel>, RequestLogProcessor) {
        let channel = Arc::new(LogChannel::new(transport, "request_logs"));
        let capture = Arc::new(CapturePolicy::from_config(&RequestLogConfig::default()));
        let processor =
            RequestLogProcessor::new(channel.clone(), store, capture, Duration::from_secs(5));
        (channel, processor)
    }

    fn setup() -> (Arc<MemoryTransport>, Arc<InMemoryRequestLogStore>, RequestLogProcessor) {
        let transport = Arc::new(MemoryTransport::new());
        let store = Arc::new(InMemoryRequestLogStore::new());
        let (_, processor) = processor_over(transport.clone(), store.clone());
        (transport, store, processor)
    }

    async fn wait_for_records(store: &InMemoryRequestLogStore, count: usize) {
        for _ in 0..50 {
            if store.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Transport whose subscriptions end immediately, like a dropped
    /// Redis pub/sub connection.
    #[derive(Default)]
    struct ClosingTransport {
        subscriptions: AtomicUsize,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl PubSubTransport for ClosingTransport {
        async fn connect(&self) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn publish(&self, _topic: &str, _payload: String) -> Result<(), ChannelError> {
            Ok(())
        }

        async fn subscribe(&self, _topic: &str) -> Result<MessageStream, ChannelError> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            Ok(futures_util::stream::empty().boxed())
        }

        async fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_start_and_stop_transitions() {
        let (transport, _store, processor) = setup();
        assert_eq!(processor.state(), ProcessorState::Stopped);

        processor.start().await;
        assert_eq!(processor.state(), ProcessorState::Running);
        assert!(processor.is_consuming());
        assert_eq!(transport.subscriber_count("request_logs"), 1);

        processor.stop().await;
        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert!(!processor.is_consuming());
        assert_eq!(transport.subscriber_count("request_logs"), 0);
    }

    #[tokio::test]
    async fn test_start_twice_keeps_one_subscription() {
        let (transport, _store, processor) = setup();
        processor.start().await;
        processor.start().await;
        assert_eq!(transport.subscriber_count("request_logs"), 1);
        processor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_noop() {
        let (_transport, _store, processor) = setup();
        processor.stop().await;
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }

    #[tokio::test]
    async fn test_start_with_unavailable_channel_stays_stopped() {
        let (transport, _store, processor) = setup();
        transport.set_available(false);

        processor.start().await;
        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert!(!processor.is_consuming());

        transport.set_available(true);
        processor.start().await;
        assert_eq!(processor.state(), ProcessorState::Running);
        processor.stop().await;
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let (transport, store, processor) = setup();
        processor.start().await;
        processor.stop().await;
        processor.start().await;

        transport
            .publish(
                "request_logs",
                r#"{"method":"GET","path":"/shelters","status_code":200}"#.into(),
            )
            .await
            .unwrap();

        wait_for_records(&store, 1).await;
        processor.stop().await;
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sensitive_fields_stripped_from_published_event() {
        let (transport, store, processor) = setup();
        processor.start().await;

        transport
            .publish(
                "request_logs",
                json!({
                    "method": "POST",
                    "path": "/supplies",
                    "status_code": 201,
                    "headers": {"authorization": "Bearer abc", "accept": "*/*"},
                    "request_body": {"name": "water", "password": "x"},
                })
                .to_string(),
            )
            .await
            .unwrap();

        wait_for_records(&store, 1).await;
        processor.stop().await;

        let records = store.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].request_body, Some(json!({"name": "water"})));
        assert_eq!(records[0].headers, json!({"accept": "*/*"}));
    }

    #[tokio::test]
    async fn test_closed_subscription_stops_processor() {
        let transport = Arc::new(ClosingTransport::default());
        let store = Arc::new(InMemoryRequestLogStore::new());
        let (channel, processor) = processor_over(transport.clone(), store);
        let mut state = processor.watch_state();

        processor.start().await;
        tokio::time::timeout(
            Duration::from_secs(1),
            state.wait_for(|s| *s == ProcessorState::Stopped),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(!processor.is_consuming());
        assert!(!channel.is_connected());
        assert_eq!(transport.closes.load(Ordering::SeqCst), 1);

        processor.start().await;
        assert_eq!(transport.subscriptions.load(Ordering::SeqCst), 2);
        processor.stop().await;
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }
}
