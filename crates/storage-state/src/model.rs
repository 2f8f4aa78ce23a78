use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use vstream_crypto_envelope::SealedBlob;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Verified,
    Rejected,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Verified => "verified",
            RecordStatus::Rejected => "rejected",
        }
    }
}

/// Caller-supplied metadata persisted next to the ciphertext. Unknown fields
/// are preserved verbatim.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RecordMetadata {
    #[serde(default)]
    pub sites: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub auto_saved: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Persisted row: one encrypted storage-state snapshot for one owner.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageStateRecord {
    pub record_id: String,
    pub owner_id: String,
    pub ciphertext: String,
    pub nonce: String,
    pub wrapped_key: String,
    pub kid: String,
    pub metadata: RecordMetadata,
    pub status: RecordStatus,
    pub verified: BTreeMap<String, bool>,
    pub created_at: DateTime<Utc>,
}

impl StorageStateRecord {
    pub fn sealed(&self) -> SealedBlob {
        SealedBlob {
            ciphertext: self.ciphertext.clone(),
            nonce: self.nonce.clone(),
            wrapped_key: self.wrapped_key.clone(),
            kid: self.kid.clone(),
        }
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds() as f64 / 3600.0
    }

    pub fn is_fresh(&self, ttl_hours: u32, now: DateTime<Utc>) -> bool {
        self.age_hours(now) <= ttl_hours as f64
    }

    /// True when the record verifies every requested site. An empty request
    /// means "any verified site".
    pub fn covers_sites(&self, sites: &[String]) -> bool {
        if sites.is_empty() {
            return self.verified.values().any(|ok| *ok);
        }
        sites
            .iter()
            .all(|site| self.verified.get(site).copied().unwrap_or(false))
    }
}
