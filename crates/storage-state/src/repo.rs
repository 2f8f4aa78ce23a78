use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::StoreError;
use crate::model::StorageStateRecord;

/// Persistence seam for storage-state records. The production database driver
/// implements this trait outside the core; [`MemoryRepo`] backs tests and
/// single-process deployments.
#[async_trait]
pub trait StateRepo: Send + Sync {
    async fn insert(&self, record: StorageStateRecord) -> Result<(), StoreError>;
    async fn fetch(&self, record_id: &str) -> Result<Option<StorageStateRecord>, StoreError>;
    /// All records for an owner, newest first.
    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<StorageStateRecord>, StoreError>;
    async fn update(&self, record: StorageStateRecord) -> Result<(), StoreError>;
}

/// In-memory repo keyed by record id.
#[derive(Default)]
pub struct MemoryRepo {
    rows: DashMap<String, StorageStateRecord>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl StateRepo for MemoryRepo {
    async fn insert(&self, record: StorageStateRecord) -> Result<(), StoreError> {
        self.rows.insert(record.record_id.clone(), record);
        Ok(())
    }

    async fn fetch(&self, record_id: &str) -> Result<Option<StorageStateRecord>, StoreError> {
        Ok(self.rows.get(record_id).map(|entry| entry.value().clone()))
    }

    async fn list_for_owner(&self, owner_id: &str) -> Result<Vec<StorageStateRecord>, StoreError> {
        let mut rows: Vec<StorageStateRecord> = self
            .rows
            .iter()
            .filter(|entry| entry.value().owner_id == owner_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update(&self, record: StorageStateRecord) -> Result<(), StoreError> {
        match self.rows.get_mut(&record.record_id) {
            Some(mut entry) => {
                *entry.value_mut() = record;
                Ok(())
            }
            None => Err(StoreError::NotFound {
                record_id: record.record_id,
            }),
        }
    }
}
