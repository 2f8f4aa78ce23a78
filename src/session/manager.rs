use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vstream_browser::{
    variant_from_env, BrowserError, BrowserSession, BrowserVariant, SerialSession, StubBrowser,
};
use vstream_core_types::{SessionId, StorageStateBlob};
use vstream_recorder::{RecorderBridge, RecorderOptions};
use vstream_registry::{SessionControls, SessionEntry, SessionRegistry};
use vstream_storage_state::{PriorityLoader, RecordMetadata, StorageStateStore};
use vstream_streamer::StreamerHandle;

use crate::config::Config;
use crate::metrics;
use crate::session::workflow::{run_workflow, WorkflowProgress, WorkflowStep};

const READY_POLL: Duration = Duration::from_millis(50);

/// Lifecycle phases of one visual streaming session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Init,
    LoadingState,
    BrowserStarting,
    RecorderAttaching,
    Streaming,
    WorkflowRunning,
    Finalizing,
    Ended,
    Failed,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::Init => "init",
            SessionPhase::LoadingState => "loading_state",
            SessionPhase::BrowserStarting => "browser_starting",
            SessionPhase::RecorderAttaching => "recorder_attaching",
            SessionPhase::Streaming => "streaming",
            SessionPhase::WorkflowRunning => "workflow_running",
            SessionPhase::Finalizing => "finalizing",
            SessionPhase::Ended => "ended",
            SessionPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Ended | SessionPhase::Failed)
    }
}

/// Seam for obtaining a browser; the concrete engine lives outside the core.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, variant: BrowserVariant) -> Result<Arc<dyn BrowserSession>, BrowserError>;
}

/// Launcher handing out scripted stub browsers. Backs tests and local
/// bring-up without a real engine.
#[derive(Default)]
pub struct StubLauncher {
    last: Mutex<Option<Arc<StubBrowser>>>,
}

impl StubLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The most recently launched stub, for test inspection.
    pub fn last(&self) -> Option<Arc<StubBrowser>> {
        self.last.lock().clone()
    }
}

#[async_trait]
impl BrowserLauncher for StubLauncher {
    async fn launch(
        &self,
        variant: BrowserVariant,
    ) -> Result<Arc<dyn BrowserSession>, BrowserError> {
        debug!(target: "session", variant = variant.as_str(), "launching stub browser");
        let stub = StubBrowser::new();
        *self.last.lock() = Some(Arc::clone(&stub));
        Ok(stub)
    }
}

pub struct SessionState {
    pub session_id: SessionId,
    pub owner_id: String,
    pub sites: Vec<String>,
    pub created_at: DateTime<Utc>,
    phase: RwLock<SessionPhase>,
    degraded: AtomicBool,
    progress: watch::Receiver<WorkflowProgress>,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        *self.phase.read()
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> WorkflowProgress {
        self.progress.borrow().clone()
    }

    fn set_phase(&self, phase: SessionPhase) {
        info!(
            target: "session",
            session = %self.session_id,
            phase = phase.as_str(),
            "session phase"
        );
        *self.phase.write() = phase;
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub degraded: bool,
    pub created_at: DateTime<Utc>,
    pub progress: WorkflowProgress,
}

/// Drives every session through its lifecycle:
/// load prior state, start the browser, attach the recorder, stream, run the
/// workflow, then finalize with an unconditional auto-save attempt.
pub struct SessionManager {
    config: Arc<Config>,
    registry: Arc<SessionRegistry>,
    store: Option<Arc<StorageStateStore>>,
    loader: Arc<PriorityLoader>,
    launcher: Arc<dyn BrowserLauncher>,
    sessions: DashMap<SessionId, Arc<SessionState>>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry>,
        store: Option<Arc<StorageStateStore>>,
        loader: Arc<PriorityLoader>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            store,
            loader,
            launcher,
            sessions: DashMap::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub async fn start_session(
        self: &Arc<Self>,
        owner_id: String,
        workflow: Vec<WorkflowStep>,
        sites: Vec<String>,
    ) -> SessionId {
        let session_id = SessionId::new();
        let (progress_tx, progress_rx) = watch::channel(WorkflowProgress::default());
        let state = Arc::new(SessionState {
            session_id: session_id.clone(),
            owner_id,
            sites,
            created_at: Utc::now(),
            phase: RwLock::new(SessionPhase::Init),
            degraded: AtomicBool::new(false),
            progress: progress_rx,
        });
        self.sessions.insert(session_id.clone(), Arc::clone(&state));
        metrics::record_session_started();

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_session(state, workflow, progress_tx).await;
        });
        session_id
    }

    pub fn session(&self, session_id: &SessionId) -> Option<Arc<SessionState>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn phase(&self, session_id: &SessionId) -> Option<SessionPhase> {
        self.session(session_id).map(|state| state.phase())
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = self
            .sessions
            .iter()
            .map(|entry| {
                let state = entry.value();
                SessionSummary {
                    session_id: state.session_id.clone(),
                    phase: state.phase(),
                    degraded: state.degraded(),
                    created_at: state.created_at,
                    progress: state.progress(),
                }
            })
            .collect();
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    /// Request cancellation of every running session; each one still passes
    /// through `FINALIZING` (auto-save included) on its way out.
    pub fn cancel_all(&self) {
        self.shutdown.cancel();
    }

    pub async fn wait_idle(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let active = self
                .sessions
                .iter()
                .any(|entry| !entry.value().phase().is_terminal());
            if !active {
                return;
            }
            if Instant::now() >= deadline {
                warn!(target: "session", "sessions still finalizing at shutdown deadline");
                return;
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn run_session(
        self: Arc<Self>,
        state: Arc<SessionState>,
        workflow: Vec<WorkflowStep>,
        progress_tx: watch::Sender<WorkflowProgress>,
    ) {
        let session_id = state.session_id.clone();

        state.set_phase(SessionPhase::LoadingState);
        let prior = if self.config.feature_use_cookies {
            self.loader.load(&state.owner_id, &state.sites).await
        } else {
            debug!(target: "session", session = %session_id, "storage-state loading disabled");
            None
        };

        state.set_phase(SessionPhase::BrowserStarting);
        let browser = match self.launcher.launch(variant_from_env()).await {
            Ok(browser) => browser,
            Err(err) => {
                warn!(target: "session", session = %session_id, %err, "browser launch failed");
                state.set_phase(SessionPhase::Failed);
                return;
            }
        };
        let serial = SerialSession::new(browser);

        if let Some((blob, source)) = prior {
            self.restore_state(&session_id, serial.as_ref(), &blob).await;
            info!(
                target: "session",
                session = %session_id,
                source = source.as_str(),
                cookies = blob.cookies.len(),
                origins = blob.origins.len(),
                "prior storage state restored"
            );
        }

        let streamer = StreamerHandle::spawn(session_id.clone(), self.config.streamer_config());
        let controls = Arc::new(SessionControls::default());
        let entry = SessionEntry {
            session_id: session_id.clone(),
            streamer: Arc::clone(&streamer),
            browser: Arc::clone(&serial) as Arc<dyn BrowserSession>,
            controls: Arc::clone(&controls),
            created_at: state.created_at,
        };
        if let Err(err) = self.registry.register(entry) {
            warn!(target: "session", session = %session_id, %err, "registry rejected session");
            streamer.shutdown().await;
            state.set_phase(SessionPhase::Failed);
            return;
        }
        metrics::set_sessions_active(self.registry.len() as i64);

        state.set_phase(SessionPhase::RecorderAttaching);
        let bridge = RecorderBridge::new(
            Arc::clone(&serial) as Arc<dyn BrowserSession>,
            streamer.ingest_sender(),
            RecorderOptions::default(),
        );
        if let Err(err) = bridge.attach().await {
            warn!(target: "session", session = %session_id, %err, "recorder bridge attach failed");
            self.teardown(&state, &streamer).await;
            state.set_phase(SessionPhase::Failed);
            return;
        }

        // mirror navigations into event metadata
        let origin_streamer = Arc::clone(&streamer);
        let mut navigations = serial.navigations();
        let origin_task = tokio::spawn(async move {
            while let Ok(event) = navigations.recv().await {
                origin_streamer.set_origin(event.url).await;
            }
        });

        self.wait_for_first_snapshot(&state, &streamer).await;
        if bridge.degraded() {
            state.degraded.store(true, Ordering::SeqCst);
        }
        state.set_phase(SessionPhase::Streaming);

        state.set_phase(SessionPhase::WorkflowRunning);
        let outcome = run_workflow(
            serial.as_ref(),
            &controls,
            &workflow,
            &self.shutdown,
            &progress_tx,
        )
        .await;

        state.set_phase(SessionPhase::Finalizing);
        if self.config.auto_save_session_state {
            self.auto_save(&state, serial.as_ref()).await;
        } else {
            debug!(target: "session", session = %session_id, "auto-save disabled");
        }
        bridge.detach().await;
        origin_task.abort();
        self.teardown(&state, &streamer).await;

        match &outcome.error {
            None => {
                info!(
                    target: "session",
                    session = %session_id,
                    steps = outcome.steps_completed,
                    "session ended"
                );
                state.set_phase(SessionPhase::Ended);
            }
            Some(error) => {
                warn!(
                    target: "session",
                    session = %session_id,
                    steps = outcome.steps_completed,
                    error = %error,
                    "session failed"
                );
                state.set_phase(SessionPhase::Failed);
            }
        }
    }

    async fn restore_state(
        &self,
        session_id: &SessionId,
        browser: &dyn BrowserSession,
        blob: &StorageStateBlob,
    ) {
        if let Err(err) = browser.set_cookies(&blob.cookies).await {
            warn!(target: "session", session = %session_id, %err, "cookie restore failed");
        }
        if !blob.origins.is_empty() {
            if let Err(err) = browser.restore_local_storage(&blob.origins).await {
                warn!(target: "session", session = %session_id, %err, "local storage restore failed");
            }
        }
    }

    /// Streaming starts once a full snapshot is buffered; if the recorder
    /// stays silent past the deadline the session continues degraded.
    async fn wait_for_first_snapshot(&self, state: &SessionState, streamer: &StreamerHandle) {
        let deadline = Instant::now() + self.config.recorder_ready_timeout;
        while !streamer.status().streaming_ready
            && Instant::now() < deadline
            && !self.shutdown.is_cancelled()
        {
            sleep(READY_POLL).await;
        }
        if !streamer.status().streaming_ready {
            warn!(
                target: "session",
                session = %state.session_id,
                "no full snapshot before deadline; continuing degraded"
            );
            state.degraded.store(true, Ordering::SeqCst);
        }
    }

    async fn auto_save(&self, state: &SessionState, browser: &dyn BrowserSession) {
        let Some(store) = &self.store else {
            debug!(target: "session", session = %state.session_id, "no storage-state store configured");
            return;
        };
        let cookies = match browser.cookies().await {
            Ok(cookies) => cookies,
            Err(err) => {
                warn!(target: "session", session = %state.session_id, %err, "cookie extraction failed; skipping auto-save");
                return;
            }
        };
        let origins = match browser.extract_local_storage().await {
            Ok(origins) => origins,
            Err(err) => {
                warn!(target: "session", session = %state.session_id, %err, "local storage extraction failed");
                Vec::new()
            }
        };
        let env_metadata = browser.env_metadata().await.ok();
        let blob = StorageStateBlob {
            cookies,
            origins,
            env_metadata,
        };
        let metadata = RecordMetadata {
            sites: state.sites.clone(),
            workflow_id: Some(state.session_id.to_string()),
            auto_saved: true,
            extra: Default::default(),
        };
        match store.save(&state.owner_id, blob, metadata).await {
            Ok(record_id) => {
                info!(target: "session", session = %state.session_id, record = %record_id, "session state auto-saved");
            }
            Err(err) => {
                warn!(target: "session", session = %state.session_id, %err, "session state auto-save failed");
            }
        }
    }

    async fn teardown(&self, state: &SessionState, streamer: &StreamerHandle) {
        streamer.shutdown().await;
        self.registry.remove(&state.session_id);
        metrics::set_sessions_active(self.registry.len() as i64);
    }
}
