//! Global session registry.
//!
//! Stream and control channels run on independent tasks and must resolve a
//! `SessionId` to the same streamer and browser handle; this registry is the
//! explicit service they share. Entries hold no back-pointers beyond the
//! session id, so dropping a session is a plain `remove`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::info;
use vstream_browser::BrowserSession;
use vstream_core_types::SessionId;
use vstream_streamer::StreamerHandle;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("session {0} already registered")]
    Duplicate(SessionId),
}

/// Cross-channel session flags. The control channel raises `pause` while a
/// viewer is interacting so workflow input steps wait their turn.
#[derive(Default)]
pub struct SessionControls {
    pause_holds: AtomicUsize,
}

impl SessionControls {
    pub fn raise_pause(&self) {
        self.pause_holds.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release_pause(&self) {
        let previous = self.pause_holds.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "pause released more times than raised");
    }

    pub fn is_paused(&self) -> bool {
        self.pause_holds.load(Ordering::SeqCst) > 0
    }
}

/// Everything a channel needs to serve one live session.
pub struct SessionEntry {
    pub session_id: SessionId,
    pub streamer: Arc<StreamerHandle>,
    pub browser: Arc<dyn BrowserSession>,
    pub controls: Arc<SessionControls>,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionRegistry {
    entries: DashMap<SessionId, Arc<SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: SessionEntry) -> Result<(), RegistryError> {
        let session_id = entry.session_id.clone();
        if self.entries.contains_key(&session_id) {
            return Err(RegistryError::Duplicate(session_id));
        }
        info!(target: "registry", session = %session_id, "session registered");
        self.entries.insert(session_id, Arc::new(entry));
        Ok(())
    }

    pub fn lookup(&self, session_id: &SessionId) -> Option<Arc<SessionEntry>> {
        self.entries
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove(&self, session_id: &SessionId) -> Option<Arc<SessionEntry>> {
        let removed = self.entries.remove(session_id).map(|(_, entry)| entry);
        if removed.is_some() {
            info!(target: "registry", session = %session_id, "session removed");
        }
        removed
    }

    pub fn list(&self) -> Vec<Arc<SessionEntry>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vstream_browser::StubBrowser;
    use vstream_streamer::StreamerConfig;

    fn entry(session_id: SessionId) -> SessionEntry {
        SessionEntry {
            session_id: session_id.clone(),
            streamer: StreamerHandle::spawn(session_id, StreamerConfig::default()),
            browser: StubBrowser::new(),
            controls: Arc::new(SessionControls::default()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_lookup_remove() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.register(entry(id.clone())).unwrap();

        let found = registry.lookup(&id).expect("entry present");
        assert_eq!(found.session_id, id);
        assert_eq!(registry.len(), 1);

        let removed = registry.remove(&id).expect("entry removed");
        removed.streamer.shutdown().await;
        assert!(registry.lookup(&id).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let registry = SessionRegistry::new();
        let id = SessionId::new();
        registry.register(entry(id.clone())).unwrap();
        let dup = registry.register(entry(id.clone()));
        assert!(matches!(dup, Err(RegistryError::Duplicate(_))));
        for entry in registry.list() {
            entry.streamer.shutdown().await;
        }
    }

    #[test]
    fn pause_holds_are_refcounted() {
        let controls = SessionControls::default();
        assert!(!controls.is_paused());
        controls.raise_pause();
        controls.raise_pause();
        controls.release_pause();
        assert!(controls.is_paused());
        controls.release_pause();
        assert!(!controls.is_paused());
    }
}
