//! PostgreSQL request store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use super::{RequestStore, UpdateOutcome};
use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::request::{GenerationParameters, RequestRecord, RequestStatus};

const SCHEMA: &str = include_str!("../../migrations/0001_generation_requests.sql");

const RECORD_COLUMNS: &str = "request_id, status, image_url, parameters, created_at, updated_at";

/// Request store over the `generation_requests` table
#[derive(Debug, Clone)]
pub struct PgRequestStore {
    pool: PgPool,
}

impl PgRequestStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .connect(url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to request database");
        Ok(Self::new(pool))
    }

    /// Create the table if it does not exist yet
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Request table schema ensured");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn record_from_row(row: &PgRow) -> Result<RequestRecord, StoreError> {
        let status: String = row.try_get("status")?;
        let status = status.parse::<RequestStatus>().map_err(StoreError::Corrupt)?;
        let Json(parameters): Json<GenerationParameters> = row.try_get("parameters")?;

        Ok(RequestRecord {
            request_id: row.try_get("request_id")?,
            status,
            image_url: row.try_get("image_url")?,
            parameters,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

#[async_trait]
impl RequestStore for PgRequestStore {
    async fn create(&self, record: &RequestRecord) -> Result<Uuid, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO generation_requests
                (request_id, status, image_url, parameters, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (request_id) DO NOTHING
            "#,
        )
        .bind(record.request_id)
        .bind(record.status.as_str())
        .bind(record.image_url.as_deref())
        .bind(Json(&record.parameters))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(record.request_id));
        }
        Ok(record.request_id)
    }

    async fn find(&self, id: Uuid) -> Result<Option<RequestRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM generation_requests WHERE request_id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn update_status(
        &self,
        id: Uuid,
        expected: RequestStatus,
        status: RequestStatus,
        image_url: Option<&str>,
    ) -> Result<UpdateOutcome, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE generation_requests
            SET status = $3, image_url = $4, updated_at = now()
            WHERE request_id = $1 AND status = $2
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected.as_str())
        .bind(status.as_str())
        .bind(image_url)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(UpdateOutcome::Applied(Self::record_from_row(&row)?));
        }

        // The guard missed: tell an unknown id apart from a lost race
        match self.find(id).await? {
            Some(current) => Ok(UpdateOutcome::Conflict(current.status)),
            None => Ok(UpdateOutcome::NotFound),
        }
    }

    fn name(&self) -> &str {
        "postgres"
    }
}
