//! Confirmed, persistent publishing of generation tasks

use std::time::Duration;
use tracing::{debug, warn};

use super::connection_manager::BrokerHandle;
use super::transport::Confirmation;
use crate::error::PublishError;
use crate::request::GenerationTask;

/// Publishes tasks and waits for the broker to confirm them
///
/// Only a broker ack counts as success. A nack, a missing confirmation or a
/// confirmation that does not arrive within `confirm_timeout` is a failure,
/// even though the message may in fact have been enqueued. Nothing is
/// retried here.
#[derive(Debug, Clone, Copy)]
pub struct TaskPublisher {
    confirm_timeout: Duration,
}

impl TaskPublisher {
    pub fn new(confirm_timeout: Duration) -> Self {
        Self { confirm_timeout }
    }

    pub fn confirm_timeout(&self) -> Duration {
        self.confirm_timeout
    }

    pub async fn publish(&self, handle: &BrokerHandle, task: &GenerationTask) -> Result<(), PublishError> {
        let payload = task
            .to_payload()
            .map_err(|e| PublishError::Serialization(e.to_string()))?;

        if !handle.is_live() {
            return Err(PublishError::ConnectionUnavailable(
                "broker handle is no longer open".to_string(),
            ));
        }

        let request_id = task.request_id();
        let send = handle.channel().publish_confirmed(handle.queue(), &payload);

        let confirmation = match tokio::time::timeout(self.confirm_timeout, send).await {
            Ok(Ok(confirmation)) => confirmation,
            Ok(Err(e)) => {
                warn!(%request_id, error = %e, "Publish failed on transport");
                return Err(PublishError::ConnectionUnavailable(e.to_string()));
            }
            Err(_) => {
                let timeout_ms = self.confirm_timeout.as_millis() as u64;
                warn!(%request_id, timeout_ms, "Publisher confirmation timed out");
                return Err(PublishError::Timeout { timeout_ms });
            }
        };

        match confirmation {
            Confirmation::Ack => {
                debug!(%request_id, queue = %handle.queue(), bytes = payload.len(), "Task confirmed by broker");
                Ok(())
            }
            Confirmation::Nack => {
                warn!(%request_id, "Broker nacked task");
                Err(PublishError::BrokerRejected(
                    "negative acknowledgement".to_string(),
                ))
            }
            Confirmation::NotRequested => {
                warn!(%request_id, "Channel returned no publisher confirmation");
                Err(PublishError::BrokerRejected(
                    "channel is not in confirm mode".to_string(),
                ))
            }
        }
    }
}
