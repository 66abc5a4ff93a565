//! Service module - Submission, status queries and worker reports

pub mod status;
pub mod submission;

use std::sync::Arc;
use uuid::Uuid;

use crate::broker::{BrokerTransport, ConnectionManager, TaskPublisher};
use crate::config::Settings;
use crate::error::{StatusError, SubmissionError};
use crate::request::{GenerationParameters, InferenceRequest, StatusView};
use crate::store::RequestStore;

pub use status::{parse_request_id, ReportOutcome, RequestTracker, WorkerReport};
pub use submission::{SubmissionOrchestrator, SubmissionSnapshot};

/// The three interfaces exposed to outer transports, wired to one connection
#[derive(Clone)]
pub struct Gateway {
    connections: Arc<ConnectionManager>,
    submissions: SubmissionOrchestrator,
    tracker: RequestTracker,
}

impl Gateway {
    pub fn new(
        store: Arc<dyn RequestStore>,
        connections: Arc<ConnectionManager>,
        publisher: TaskPublisher,
        settings: &Settings,
    ) -> Self {
        let submissions = SubmissionOrchestrator::new(
            store.clone(),
            connections.clone(),
            publisher,
            settings.submission.clone(),
        );

        Self {
            connections,
            submissions,
            tracker: RequestTracker::new(store),
        }
    }

    /// Build the connection manager and publisher from settings
    pub fn from_settings(
        store: Arc<dyn RequestStore>,
        transport: Arc<dyn BrokerTransport>,
        settings: &Settings,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(
            transport,
            settings.broker.queue_name.clone(),
            settings.broker.connect_timeout(),
        ));
        let publisher = TaskPublisher::new(settings.broker.confirm_timeout());
        Self::new(store, connections, publisher, settings)
    }

    pub async fn submit(&self, parameters: GenerationParameters) -> Result<Uuid, SubmissionError> {
        self.submissions.submit(parameters).await
    }

    pub async fn submit_request(&self, request: InferenceRequest) -> Result<Uuid, SubmissionError> {
        self.submissions.submit_request(request).await
    }

    pub async fn status(&self, request_id: Uuid) -> Result<StatusView, StatusError> {
        self.tracker.status(request_id).await
    }

    pub async fn report(
        &self,
        request_id: Uuid,
        report: WorkerReport,
    ) -> Result<ReportOutcome, StatusError> {
        self.tracker.report(request_id, report).await
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn stats(&self) -> SubmissionSnapshot {
        self.submissions.stats()
    }

    /// Release the broker connection
    pub async fn shutdown(&self) {
        self.connections.release().await;
    }
}
