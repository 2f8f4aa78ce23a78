use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vstream_browser::{BridgeHandler, BrowserSession};
use vstream_core_types::util::epoch_millis;

use crate::options::{injection_script, RecorderOptions, BRIDGE_FUNCTION};

const DOM_READY_TIMEOUT: Duration = Duration::from_secs(10);
const DOM_READY_POLL: Duration = Duration::from_millis(100);
const REINJECT_BACKOFF: Duration = Duration::from_millis(250);
const PROGRESS_PING_AFTER: Duration = Duration::from_secs(2);

/// Keeps the in-page recorder alive across navigations.
///
/// Raw event payloads flow from the page through the bridge function into the
/// ingest channel untouched. Injection failures retry once; a second failure
/// marks the bridge degraded and streaming continues with whatever events
/// still arrive.
pub struct RecorderBridge {
    session: Arc<dyn BrowserSession>,
    ingest: mpsc::Sender<String>,
    options: RecorderOptions,
    degraded: AtomicBool,
    last_event_ms: Arc<AtomicU64>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RecorderBridge {
    pub fn new(
        session: Arc<dyn BrowserSession>,
        ingest: mpsc::Sender<String>,
        options: RecorderOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            ingest,
            options,
            degraded: AtomicBool::new(false),
            last_event_ms: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Bind the bridge function, run the initial injection, and start the
    /// navigation watcher. Fails only when the bridge itself cannot be bound;
    /// injection trouble degrades instead.
    pub async fn attach(self: &Arc<Self>) -> Result<(), vstream_browser::BrowserError> {
        let ingest = self.ingest.clone();
        let last_event = Arc::clone(&self.last_event_ms);
        let handler: BridgeHandler = Arc::new(move |payload: String| {
            last_event.store(epoch_millis(), Ordering::SeqCst);
            if let Err(err) = ingest.try_send(payload) {
                warn!(target: "recorder", %err, "ingest queue full; recorder event dropped");
            }
        });
        self.session.expose_bridge(BRIDGE_FUNCTION, handler).await?;

        self.inject_with_retry().await;
        self.arm_progress_ping();

        let bridge = Arc::clone(self);
        let mut navigations = self.session.navigations();
        let watcher = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = bridge.shutdown.cancelled() => break,
                    nav = navigations.recv() => {
                        match nav {
                            Ok(event) => {
                                debug!(target: "recorder", url = %event.url, "navigation observed; re-injecting recorder");
                                bridge.wait_for_dom_ready().await;
                                bridge.inject_with_retry().await;
                                bridge.arm_progress_ping();
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                                warn!(target: "recorder", skipped, "navigation events lagged");
                                continue;
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        });
        self.tasks.lock().await.push(watcher);
        Ok(())
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub async fn detach(&self) {
        self.shutdown.cancel();
        let mut tasks = self.tasks.lock().await;
        while let Some(task) = tasks.pop() {
            let _ = task.await;
        }
    }

    async fn inject(&self) -> Result<(), vstream_browser::BrowserError> {
        let script = injection_script(&self.options);
        self.session.evaluate(&script, Value::Null).await.map(|_| ())
    }

    async fn inject_with_retry(&self) {
        if let Err(first) = self.inject().await {
            warn!(target: "recorder", %first, "recorder injection failed; retrying once");
            sleep(REINJECT_BACKOFF).await;
            if let Err(second) = self.inject().await {
                self.degraded.store(true, Ordering::SeqCst);
                warn!(
                    target: "recorder",
                    %second,
                    "recorder injection failed twice; session degraded, events may be sparse"
                );
            }
        }
    }

    async fn wait_for_dom_ready(&self) {
        let deadline = Instant::now() + DOM_READY_TIMEOUT;
        loop {
            if Instant::now() >= deadline {
                warn!(target: "recorder", "dom-ready wait timed out; injecting anyway");
                return;
            }
            match self
                .session
                .evaluate("document.readyState", Value::Null)
                .await
            {
                Ok(value) => {
                    let ready = value
                        .as_str()
                        .map(|state| matches!(state, "interactive" | "complete"))
                        .unwrap_or(false);
                    if ready {
                        return;
                    }
                }
                Err(err) => {
                    debug!(target: "recorder", %err, "readyState probe failed");
                }
            }
            sleep(DOM_READY_POLL).await;
        }
    }

    /// If the recorder stays silent after an injection, push a synthetic
    /// progress event so viewers and health checks see a heartbeat.
    fn arm_progress_ping(self: &Arc<Self>) {
        let bridge = Arc::clone(self);
        let injected_at = epoch_millis();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = bridge.shutdown.cancelled() => {}
                _ = sleep(PROGRESS_PING_AFTER) => {
                    if bridge.last_event_ms.load(Ordering::SeqCst) < injected_at {
                        let ping = json!({
                            "type": 5,
                            "timestamp": epoch_millis(),
                            "data": {"tag": "vstream:progress", "payload": {"injectedAt": injected_at}},
                        });
                        if bridge.ingest.try_send(ping.to_string()).is_ok() {
                            debug!(target: "recorder", "synthetic progress ping emitted");
                        }
                    }
                }
            }
        });
        if let Ok(mut tasks) = self.tasks.try_lock() {
            tasks.push(task);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vstream_browser::StubBrowser;

    fn injection_count(commands: &[String]) -> usize {
        commands
            .iter()
            .filter(|c| c.contains("__vstreamRecorderActive"))
            .count()
    }

    #[tokio::test]
    async fn attach_binds_bridge_and_injects() {
        let stub = StubBrowser::new();
        let (tx, mut rx) = mpsc::channel(16);
        let bridge = RecorderBridge::new(
            stub.clone() as Arc<dyn BrowserSession>,
            tx,
            RecorderOptions::default(),
        );
        bridge.attach().await.unwrap();

        let commands = stub.commands();
        assert!(commands
            .iter()
            .any(|c| c == &format!("expose_bridge {BRIDGE_FUNCTION}")));
        assert_eq!(injection_count(&commands), 1);

        assert!(stub.emit_from_page(BRIDGE_FUNCTION, r#"{"type":2,"timestamp":1}"#));
        assert_eq!(rx.recv().await.unwrap(), r#"{"type":2,"timestamp":1}"#);
        assert!(!bridge.degraded());
        bridge.detach().await;
    }

    #[tokio::test]
    async fn reinjects_after_navigation() {
        let stub = StubBrowser::new();
        let (tx, _rx) = mpsc::channel(16);
        let bridge = RecorderBridge::new(
            stub.clone() as Arc<dyn BrowserSession>,
            tx,
            RecorderOptions::default(),
        );
        bridge.attach().await.unwrap();

        stub.trigger_navigation("https://example.com/next");
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(injection_count(&stub.commands()), 2);
        bridge.detach().await;
    }

    #[tokio::test]
    async fn double_injection_failure_degrades() {
        let stub = StubBrowser::new();
        let (tx, _rx) = mpsc::channel(16);
        stub.fail_next_evals(2);
        let bridge = RecorderBridge::new(
            stub.clone() as Arc<dyn BrowserSession>,
            tx,
            RecorderOptions::default(),
        );
        bridge.attach().await.unwrap();
        assert!(bridge.degraded());
        bridge.detach().await;
    }

    #[tokio::test(start_paused = true)]
    async fn silent_recorder_triggers_progress_ping() {
        let stub = StubBrowser::new();
        let (tx, mut rx) = mpsc::channel(16);
        let bridge = RecorderBridge::new(
            stub.clone() as Arc<dyn BrowserSession>,
            tx,
            RecorderOptions::default(),
        );
        bridge.attach().await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        let payload = rx.recv().await.unwrap();
        assert!(payload.contains("vstream:progress"));
        bridge.detach().await;
    }

    #[tokio::test]
    async fn page_events_suppress_progress_ping() {
        let stub = StubBrowser::new();
        let (tx, mut rx) = mpsc::channel(16);
        let bridge = RecorderBridge::new(
            stub.clone() as Arc<dyn BrowserSession>,
            tx,
            RecorderOptions::default(),
        );
        bridge.attach().await.unwrap();

        stub.emit_from_page(BRIDGE_FUNCTION, r#"{"type":2,"timestamp":1}"#);
        assert_eq!(rx.recv().await.unwrap(), r#"{"type":2,"timestamp":1}"#);

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(rx.try_recv().is_err());
        bridge.detach().await;
    }
}
