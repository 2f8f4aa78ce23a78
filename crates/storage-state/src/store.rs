use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;
use vstream_core_types::util::epoch_secs;
use vstream_core_types::StorageStateBlob;
use vstream_crypto_envelope::{EnvelopeKeyring, SealedBlob};

use crate::errors::StoreError;
use crate::model::{RecordMetadata, RecordStatus, StorageStateRecord};
use crate::repo::StateRepo;
use crate::verify::{status_for, verify_sites};

/// Default freshness window for verified records.
pub const DEFAULT_TTL_HOURS: u32 = 24;

/// Encrypting store over a [`StateRepo`].
pub struct StorageStateStore {
    repo: Arc<dyn StateRepo>,
    keyring: Arc<EnvelopeKeyring>,
}

impl StorageStateStore {
    pub fn new(repo: Arc<dyn StateRepo>, keyring: Arc<EnvelopeKeyring>) -> Self {
        Self { repo, keyring }
    }

    /// Encrypt and persist a snapshot, dropping already-expired cookies and
    /// running site auto-verification. Returns the store-issued record id.
    pub async fn save(
        &self,
        owner_id: &str,
        mut blob: StorageStateBlob,
        metadata: RecordMetadata,
    ) -> Result<String, StoreError> {
        let now = epoch_secs();
        let before = blob.cookies.len();
        blob.cookies.retain(|cookie| !cookie.is_expired(now));
        if blob.cookies.len() < before {
            debug!(
                target: "storage-state",
                dropped = before - blob.cookies.len(),
                "filtered expired cookies before save"
            );
        }

        let verified = verify_sites(&blob, now);
        let status = status_for(&verified);
        let sealed = self.keyring.seal_json(&blob)?;

        let record = StorageStateRecord {
            record_id: format!("ss-{}", Uuid::new_v4()),
            owner_id: owner_id.to_string(),
            ciphertext: sealed.ciphertext,
            nonce: sealed.nonce,
            wrapped_key: sealed.wrapped_key,
            kid: sealed.kid,
            metadata,
            status,
            verified,
            created_at: Utc::now(),
        };
        let record_id = record.record_id.clone();
        info!(
            target: "storage-state",
            owner = owner_id,
            record = %record_id,
            status = status.as_str(),
            cookies = blob.cookies.len(),
            "storage state saved"
        );
        self.repo.insert(record).await?;
        Ok(record_id)
    }

    /// Most recent record that is verified, fresh within `ttl_hours`, and
    /// covers every requested site.
    pub async fn latest_verified(
        &self,
        owner_id: &str,
        sites: &[String],
        ttl_hours: u32,
    ) -> Result<Option<StorageStateRecord>, StoreError> {
        let now = Utc::now();
        let rows = self.repo.list_for_owner(owner_id).await?;
        Ok(rows.into_iter().find(|record| {
            record.status == RecordStatus::Verified
                && record.is_fresh(ttl_hours, now)
                && record.covers_sites(sites)
        }))
    }

    /// Ownership-checked rewrite of an existing record. The new ciphertext is
    /// decrypted so verification can re-run; a snapshot that no longer
    /// verifies any site is kept but marked rejected.
    pub async fn replace(
        &self,
        owner_id: &str,
        record_id: &str,
        sealed: SealedBlob,
        metadata: RecordMetadata,
    ) -> Result<StorageStateRecord, StoreError> {
        let mut record = self
            .repo
            .fetch(record_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                record_id: record_id.to_string(),
            })?;
        if record.owner_id != owner_id {
            return Err(StoreError::OwnershipDenied {
                record_id: record_id.to_string(),
            });
        }

        let blob: StorageStateBlob = self.keyring.open_json(&sealed)?;
        let verified = verify_sites(&blob, epoch_secs());
        let status = match status_for(&verified) {
            RecordStatus::Verified => RecordStatus::Verified,
            _ => RecordStatus::Rejected,
        };

        record.ciphertext = sealed.ciphertext;
        record.nonce = sealed.nonce;
        record.wrapped_key = sealed.wrapped_key;
        record.kid = sealed.kid;
        record.metadata = metadata;
        record.verified = verified;
        record.status = status;

        info!(
            target: "storage-state",
            owner = owner_id,
            record = record_id,
            status = status.as_str(),
            "storage state replaced"
        );
        self.repo.update(record.clone()).await?;
        Ok(record)
    }

    /// Decrypt a record back into its plaintext snapshot.
    pub fn load_plaintext(&self, record: &StorageStateRecord) -> Result<StorageStateBlob, StoreError> {
        Ok(self.keyring.open_json(&record.sealed())?)
    }
}
