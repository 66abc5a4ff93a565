//! Status queries and worker reports

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StatusError, TransitionError};
use crate::request::{next_status, RequestEvent, RequestStatus, StatusView};
use crate::store::{RequestStore, UpdateOutcome};

/// Status change reported by an image worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub status: RequestStatus,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl WorkerReport {
    pub fn processing() -> Self {
        Self {
            status: RequestStatus::Processing,
            image_url: None,
        }
    }

    pub fn completed(image_url: impl Into<String>) -> Self {
        Self {
            status: RequestStatus::Completed,
            image_url: Some(image_url.into()),
        }
    }

    pub fn failed() -> Self {
        Self {
            status: RequestStatus::Failed,
            image_url: None,
        }
    }
}

/// What happened to a worker report
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The record now reflects the report
    Applied(StatusView),
    /// The report was a duplicate or arrived too late; the record is unchanged
    Ignored {
        current: RequestStatus,
        reason: TransitionError,
    },
}

/// Read side of the request lifecycle plus guarded worker updates
#[derive(Clone)]
pub struct RequestTracker {
    store: Arc<dyn RequestStore>,
}

impl RequestTracker {
    pub fn new(store: Arc<dyn RequestStore>) -> Self {
        Self { store }
    }

    pub async fn status(&self, request_id: Uuid) -> Result<StatusView, StatusError> {
        debug!(%request_id, "Checking status");
        self.store
            .find(request_id)
            .await?
            .map(|record| record.view())
            .ok_or(StatusError::RecordNotFound(request_id))
    }

    /// Apply a worker report through the transition table
    ///
    /// Reports that would leave a terminal state, or that repeat the current
    /// one, are logged and ignored: under at-least-once delivery they are
    /// expected.
    pub async fn report(
        &self,
        request_id: Uuid,
        report: WorkerReport,
    ) -> Result<ReportOutcome, StatusError> {
        // Each conflict means the record advanced; there are only a few
        // non-terminal steps, so this settles quickly.
        loop {
            let record = self
                .store
                .find(request_id)
                .await?
                .ok_or(StatusError::RecordNotFound(request_id))?;

            let transition = RequestEvent::from_report(
                record.status,
                report.status,
                report.image_url.as_deref(),
            )
            .and_then(|event| next_status(record.status, &event).map(|next| (event, next)));

            let (event, next) = match transition {
                Ok(found) => found,
                Err(TransitionError::MissingImageUrl) => {
                    return Err(StatusError::InvalidReport(TransitionError::MissingImageUrl));
                }
                Err(reason) => {
                    warn!(
                        %request_id,
                        current = %record.status,
                        reported = %report.status,
                        %reason,
                        "Ignoring worker report"
                    );
                    return Ok(ReportOutcome::Ignored {
                        current: record.status,
                        reason,
                    });
                }
            };

            match self
                .store
                .update_status(request_id, record.status, next, event.image_url())
                .await?
            {
                UpdateOutcome::Applied(updated) => {
                    info!(%request_id, from = %record.status, to = %next, "Updated request status");
                    return Ok(ReportOutcome::Applied(updated.view()));
                }
                UpdateOutcome::NotFound => return Err(StatusError::RecordNotFound(request_id)),
                UpdateOutcome::Conflict(current) => {
                    debug!(%request_id, expected = %record.status, %current, "Status changed concurrently, re-evaluating report");
                }
            }
        }
    }
}

/// Parse a client-supplied request id
pub fn parse_request_id(raw: &str) -> Result<Uuid, StatusError> {
    Uuid::parse_str(raw.trim()).map_err(|_| StatusError::InvalidId(raw.to_string()))
}
