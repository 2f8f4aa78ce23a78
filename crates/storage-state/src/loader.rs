use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};
use vstream_core_types::StorageStateBlob;

use crate::store::StorageStateStore;

/// Where a storage-state snapshot was sourced from, in priority order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StateSource {
    Database,
    UserFile,
    Environment,
    SharedFile,
}

impl StateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateSource::Database => "database",
            StateSource::UserFile => "user_file",
            StateSource::Environment => "environment",
            StateSource::SharedFile => "shared_file",
        }
    }
}

/// Resolves the storage state to start a workflow with, trying the encrypted
/// database first, then plaintext fallbacks for deployments that permit them.
///
/// Every retrieval error degrades to "no storage state" with a warning; the
/// workflow then simply proceeds unauthenticated.
pub struct PriorityLoader {
    store: Option<Arc<StorageStateStore>>,
    user_state_dir: Option<PathBuf>,
    env_var: String,
    shared_file: Option<PathBuf>,
    ttl_hours: u32,
}

impl PriorityLoader {
    pub fn new(
        store: Option<Arc<StorageStateStore>>,
        user_state_dir: Option<PathBuf>,
        shared_file: Option<PathBuf>,
        ttl_hours: u32,
    ) -> Self {
        Self {
            store,
            user_state_dir,
            env_var: "BROWSER_STORAGE_STATE".to_string(),
            shared_file,
            ttl_hours,
        }
    }

    pub fn with_env_var(mut self, name: impl Into<String>) -> Self {
        self.env_var = name.into();
        self
    }

    pub async fn load(
        &self,
        owner_id: &str,
        sites: &[String],
    ) -> Option<(StorageStateBlob, StateSource)> {
        if let Some(blob) = self.from_database(owner_id, sites).await {
            info!(target: "storage-state", owner = owner_id, source = StateSource::Database.as_str(), "storage state loaded");
            return Some((blob, StateSource::Database));
        }
        if let Some(blob) = self.from_user_file(owner_id).await {
            info!(target: "storage-state", owner = owner_id, source = StateSource::UserFile.as_str(), "storage state loaded");
            return Some((blob, StateSource::UserFile));
        }
        if let Some(blob) = self.from_environment() {
            info!(target: "storage-state", owner = owner_id, source = StateSource::Environment.as_str(), "storage state loaded");
            return Some((blob, StateSource::Environment));
        }
        if let Some(blob) = self.from_shared_file().await {
            info!(target: "storage-state", owner = owner_id, source = StateSource::SharedFile.as_str(), "storage state loaded");
            return Some((blob, StateSource::SharedFile));
        }
        info!(target: "storage-state", owner = owner_id, "no storage state available; continuing unauthenticated");
        None
    }

    async fn from_database(&self, owner_id: &str, sites: &[String]) -> Option<StorageStateBlob> {
        let store = self.store.as_ref()?;
        let record = match store.latest_verified(owner_id, sites, self.ttl_hours).await {
            Ok(record) => record?,
            Err(err) => {
                warn!(target: "storage-state", owner = owner_id, %err, "database storage-state lookup failed");
                return None;
            }
        };
        match store.load_plaintext(&record) {
            Ok(blob) => Some(blob),
            Err(err) => {
                warn!(target: "storage-state", record = %record.record_id, %err, "storage-state decrypt failed");
                None
            }
        }
    }

    async fn from_user_file(&self, owner_id: &str) -> Option<StorageStateBlob> {
        let dir = self.user_state_dir.as_ref()?;
        let path = dir.join(format!("{owner_id}.json"));
        read_blob_file(&path).await
    }

    fn from_environment(&self) -> Option<StorageStateBlob> {
        let raw = std::env::var(&self.env_var).ok()?;
        if raw.trim().is_empty() {
            return None;
        }
        match serde_json::from_str(&raw) {
            Ok(blob) => Some(blob),
            Err(err) => {
                warn!(target: "storage-state", var = %self.env_var, %err, "environment storage state is not valid JSON");
                None
            }
        }
    }

    async fn from_shared_file(&self) -> Option<StorageStateBlob> {
        let path = self.shared_file.as_ref()?;
        read_blob_file(path).await
    }
}

async fn read_blob_file(path: &std::path::Path) -> Option<StorageStateBlob> {
    if !path.exists() {
        return None;
    }
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(target: "storage-state", path = %path.display(), %err, "failed to read storage-state file");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(blob) => Some(blob),
        Err(err) => {
            warn!(target: "storage-state", path = %path.display(), %err, "storage-state file is not valid JSON");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordMetadata;
    use crate::repo::MemoryRepo;
    use std::io::Write;
    use vstream_core_types::Cookie;
    use vstream_crypto_envelope::EnvelopeKeyring;

    fn google_blob() -> StorageStateBlob {
        let cookie = |name: &str| Cookie {
            name: name.into(),
            value: "v".into(),
            domain: ".google.com".into(),
            path: "/".into(),
            expires: -1.0,
            http_only: true,
            secure: true,
            same_site: "Lax".into(),
        };
        StorageStateBlob {
            cookies: vec![cookie("SID"), cookie("SIDCC"), cookie("OSID")],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn database_wins_over_files() {
        let store = Arc::new(StorageStateStore::new(
            Arc::new(MemoryRepo::new()),
            Arc::new(EnvelopeKeyring::generate("kid-1").unwrap()),
        ));
        store
            .save("owner-a", google_blob(), RecordMetadata::default())
            .await
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("owner-a.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(
            file,
            "{}",
            serde_json::to_string(&StorageStateBlob::default()).unwrap()
        )
        .unwrap();

        let loader = PriorityLoader::new(Some(store), Some(dir.path().to_path_buf()), None, 24);
        let (blob, source) = loader.load("owner-a", &[]).await.expect("loaded");
        assert_eq!(source, StateSource::Database);
        assert_eq!(blob.cookies.len(), 3);
    }

    #[tokio::test]
    async fn falls_back_to_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("owner-b.json");
        std::fs::write(&path, serde_json::to_string(&google_blob()).unwrap()).unwrap();

        let loader = PriorityLoader::new(None, Some(dir.path().to_path_buf()), None, 24);
        let (blob, source) = loader.load("owner-b", &[]).await.expect("loaded");
        assert_eq!(source, StateSource::UserFile);
        assert_eq!(blob.cookies.len(), 3);
    }

    #[tokio::test]
    async fn corrupt_file_degrades_to_none() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("owner-c.json"), "{not json").unwrap();

        let loader = PriorityLoader::new(None, Some(dir.path().to_path_buf()), None, 24)
            .with_env_var("VSTREAM_TEST_STATE_UNSET");
        assert!(loader.load("owner-c", &[]).await.is_none());
    }

    #[tokio::test]
    async fn shared_file_is_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared.json");
        std::fs::write(&shared, serde_json::to_string(&google_blob()).unwrap()).unwrap();

        let loader = PriorityLoader::new(None, None, Some(shared), 24)
            .with_env_var("VSTREAM_TEST_STATE_UNSET_2");
        let (_, source) = loader.load("owner-d", &[]).await.expect("loaded");
        assert_eq!(source, StateSource::SharedFile);
    }
}
