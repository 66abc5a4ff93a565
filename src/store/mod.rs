//! Store module - Persistence of request records

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::error::{self, StoreError};
use crate::request::{RequestRecord, RequestStatus};

pub use memory::InMemoryRequestStore;
pub use postgres::PgRequestStore;

/// Result of a guarded status update
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The record was in the expected state and now holds the new one
    Applied(RequestRecord),
    /// No record with that id
    NotFound,
    /// The record moved on; carries the status actually found
    Conflict(RequestStatus),
}

/// Storage for request records
///
/// Implementations must make `update_status` an atomic compare-and-set on
/// the current status, so that concurrent reports cannot both win.
#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Persist a freshly created record
    async fn create(&self, record: &RequestRecord) -> Result<Uuid, StoreError>;

    /// Look a record up by id
    async fn find(&self, id: Uuid) -> Result<Option<RequestRecord>, StoreError>;

    /// Move `id` from `expected` to `status`, setting `image_url`
    async fn update_status(
        &self,
        id: Uuid,
        expected: RequestStatus,
        status: RequestStatus,
        image_url: Option<&str>,
    ) -> Result<UpdateOutcome, StoreError>;

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Open the configured store
///
/// Postgres when a database URL is set, with the schema applied; otherwise
/// records live in memory for the life of the process.
pub async fn open(config: &DatabaseConfig) -> error::Result<Arc<dyn RequestStore>> {
    match &config.url {
        Some(url) => {
            let store = PgRequestStore::connect(url, config).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database configured, keeping request records in memory");
            Ok(Arc::new(InMemoryRequestStore::new()))
        }
    }
}
