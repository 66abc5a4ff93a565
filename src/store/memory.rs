//! In-process request store backed by a concurrent map

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use super::{RequestStore, UpdateOutcome};
use crate::error::StoreError;
use crate::request::{RequestRecord, RequestStatus};

/// Request store kept in memory
///
/// Used when no database is configured and throughout the tests. Updates
/// hold the map shard lock for the entry, which makes them atomic.
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    records: DashMap<Uuid, RequestRecord>,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous lookup
    pub fn get(&self, id: &Uuid) -> Option<RequestRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    /// Ids of every stored record, in no particular order
    pub fn ids(&self) -> Vec<Uuid> {
        self.records.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn create(&self, record: &RequestRecord) -> Result<Uuid, StoreError> {
        match self.records.entry(record.request_id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(record.request_id)),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record.request_id)
            }
        }
    }

    async fn find(&self, id: Uuid) -> Result<Option<RequestRecord>, StoreError> {
        Ok(self.get(&id))
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: RequestStatus,
        status: RequestStatus,
        image_url: Option<&str>,
    ) -> Result<UpdateOutcome, StoreError> {
        let Some(mut record) = self.records.get_mut(&id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        if record.status != expected {
            return Ok(UpdateOutcome::Conflict(record.status));
        }

        record.status = status;
        record.image_url = image_url.map(str::to_string);
        record.updated_at = Utc::now();
        Ok(UpdateOutcome::Applied(record.clone()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
