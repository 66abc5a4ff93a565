//! Submission flow: persist, publish, reconcile

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{BrokerHandle, ConnectionManager, TaskPublisher};
use crate::config::SubmissionConfig;
use crate::error::{ConnectionError, SubmissionError};
use crate::request::{
    next_status, GenerationParameters, GenerationTask, InferenceRequest, RequestEvent,
    RequestRecord, RequestStatus,
};
use crate::store::{RequestStore, UpdateOutcome};

/// Upper bound for a single acquire backoff
const MAX_BACKOFF_MS: u64 = 10_000;

/// Records submissions and hands them to the broker
///
/// The record is always written before the task is published, so a worker
/// that picks the task up immediately can find it. When the task cannot be
/// confirmed by the broker the record is moved to `Failed`.
#[derive(Clone)]
pub struct SubmissionOrchestrator {
    store: Arc<dyn RequestStore>,
    connections: Arc<ConnectionManager>,
    publisher: TaskPublisher,
    policy: SubmissionConfig,
    stats: Arc<SubmissionStats>,
}

impl SubmissionOrchestrator {
    pub fn new(
        store: Arc<dyn RequestStore>,
        connections: Arc<ConnectionManager>,
        publisher: TaskPublisher,
        policy: SubmissionConfig,
    ) -> Self {
        Self {
            store,
            connections,
            publisher,
            policy,
            stats: Arc::new(SubmissionStats::default()),
        }
    }

    /// Validate a typed request and submit it
    pub async fn submit_request(&self, request: InferenceRequest) -> Result<Uuid, SubmissionError> {
        let parameters = request.into_parameters()?;
        self.submit(parameters).await
    }

    /// Submit opaque parameters, returning the new request id
    ///
    /// The broker hand-off runs on its own task: if the caller stops waiting,
    /// the publish still completes and a failure is still recorded.
    pub async fn submit(&self, parameters: GenerationParameters) -> Result<Uuid, SubmissionError> {
        let record = RequestRecord::new_pending(parameters);
        let request_id = self.store.create(&record).await?;
        self.stats.submitted.fetch_add(1, Ordering::Relaxed);
        info!(%request_id, store = self.store.name(), "Saved request");

        let task = record.task();
        let this = self.clone();
        let dispatch = tokio::spawn(async move { this.dispatch(task).await });

        match dispatch.await {
            Ok(result) => result.map(|()| request_id),
            Err(e) => {
                error!(%request_id, error = %e, "Dispatch task did not complete");
                Err(SubmissionError::Aborted(e.to_string()))
            }
        }
    }

    pub fn stats(&self) -> SubmissionSnapshot {
        self.stats.snapshot()
    }

    async fn dispatch(&self, task: GenerationTask) -> Result<(), SubmissionError> {
        let request_id = task.request_id();

        let handle = match self.acquire().await {
            Ok(handle) => handle,
            Err(e) => {
                self.stats.queue_unavailable.fetch_add(1, Ordering::Relaxed);
                self.mark_failed(request_id).await;
                return Err(SubmissionError::QueueUnavailable(e));
            }
        };

        if let Err(e) = self.publisher.publish(&handle, &task).await {
            if e.is_transport_fault() {
                self.connections.report_fault(&handle).await;
            }
            self.stats.publish_failed.fetch_add(1, Ordering::Relaxed);
            self.mark_failed(request_id).await;
            return Err(SubmissionError::PublishFailed(e));
        }

        self.stats.published.fetch_add(1, Ordering::Relaxed);
        info!(%request_id, queue = %handle.queue(), "Request queued");
        Ok(())
    }

    /// Acquire a handle, retrying the connect per policy
    ///
    /// Safe to retry: nothing has been sent yet.
    async fn acquire(&self) -> Result<BrokerHandle, ConnectionError> {
        let mut attempt = 1;
        loop {
            match self.connections.acquire_handle().await {
                Ok(handle) => return Ok(handle),
                Err(e) if attempt >= self.policy.acquire_attempts => return Err(e),
                Err(e) => {
                    let delay = backoff_delay(self.policy.acquire_backoff_ms, attempt);
                    warn!(
                        attempt,
                        max_attempts = self.policy.acquire_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Broker unavailable, retrying connect"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn mark_failed(&self, request_id: Uuid) {
        let failed = match next_status(RequestStatus::Pending, &RequestEvent::PublishFailed) {
            Ok(status) => status,
            Err(e) => {
                error!(%request_id, error = %e, "Publish failure has no lifecycle transition");
                return;
            }
        };

        match self
            .store
            .update_status(request_id, RequestStatus::Pending, failed, None)
            .await
        {
            Ok(UpdateOutcome::Applied(_)) => {
                warn!(%request_id, "Marked request as Failed after queueing error");
            }
            Ok(UpdateOutcome::Conflict(current)) => {
                // A worker got the task despite the missing confirmation
                warn!(%request_id, status = %current, "Request moved on before it could be marked Failed");
            }
            Ok(UpdateOutcome::NotFound) => {
                error!(%request_id, "Request vanished before it could be marked Failed");
            }
            Err(e) => {
                error!(%request_id, error = %e, "Failed to mark request as Failed");
            }
        }
    }
}

fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
    let jitter = if base_ms > 0 {
        rand::thread_rng().gen_range(0..=base_ms / 2)
    } else {
        0
    };
    let delay = Duration::from_millis(exp.min(MAX_BACKOFF_MS) + jitter);
    debug!(attempt, delay_ms = delay.as_millis() as u64, "Computed connect backoff");
    delay
}

/// Submission counters
#[derive(Debug, Default)]
pub struct SubmissionStats {
    submitted: AtomicU64,
    published: AtomicU64,
    queue_unavailable: AtomicU64,
    publish_failed: AtomicU64,
}

impl SubmissionStats {
    pub fn snapshot(&self) -> SubmissionSnapshot {
        SubmissionSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            queue_unavailable: self.queue_unavailable.load(Ordering::Relaxed),
            publish_failed: self.publish_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SubmissionStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmissionSnapshot {
    pub submitted: u64,
    pub published: u64,
    pub queue_unavailable: u64,
    pub publish_failed: u64,
}
