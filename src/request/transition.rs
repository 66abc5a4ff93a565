//! Transition table for the request lifecycle
//!
//! Every status change, whether made by the submission flow or requested by
//! a worker report, goes through [`next_status`]. Terminal states never move.

use super::status::RequestStatus;
use crate::error::TransitionError;

/// Something that happened to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    /// The task could not be handed to the broker
    PublishFailed,
    /// A worker picked the task up
    WorkerStarted,
    /// A worker finished and stored the image
    WorkerSucceeded { image_url: String },
    /// A worker gave up on the task
    WorkerFailed,
}

impl RequestEvent {
    /// Interpret a worker report of `target` against a record in `current`
    ///
    /// No event moves a record back to `Pending`, so such a report is refused
    /// here with the reason `next_status` would give for it.
    pub fn from_report(
        current: RequestStatus,
        target: RequestStatus,
        image_url: Option<&str>,
    ) -> Result<Self, TransitionError> {
        match target {
            RequestStatus::Processing => Ok(Self::WorkerStarted),
            RequestStatus::Failed => Ok(Self::WorkerFailed),
            RequestStatus::Completed => match image_url.map(str::trim) {
                Some(url) if !url.is_empty() => Ok(Self::WorkerSucceeded {
                    image_url: url.to_string(),
                }),
                _ => Err(TransitionError::MissingImageUrl),
            },
            RequestStatus::Pending if current.is_terminal() => {
                Err(TransitionError::Terminal { from: current })
            }
            RequestStatus::Pending => Err(TransitionError::NotPermitted {
                from: current,
                to: RequestStatus::Pending,
            }),
        }
    }

    pub fn target(&self) -> RequestStatus {
        match self {
            Self::PublishFailed | Self::WorkerFailed => RequestStatus::Failed,
            Self::WorkerStarted => RequestStatus::Processing,
            Self::WorkerSucceeded { .. } => RequestStatus::Completed,
        }
    }

    /// URL to store alongside the new status
    pub fn image_url(&self) -> Option<&str> {
        match self {
            Self::WorkerSucceeded { image_url } => Some(image_url),
            _ => None,
        }
    }
}

/// Apply `event` to a request currently in `from`
pub fn next_status(from: RequestStatus, event: &RequestEvent) -> Result<RequestStatus, TransitionError> {
    use RequestEvent::*;
    use RequestStatus::*;

    if from.is_terminal() {
        return Err(TransitionError::Terminal { from });
    }

    match (from, event) {
        (Pending, PublishFailed) => Ok(Failed),
        (Pending, WorkerStarted) => Ok(Processing),
        (Pending | Processing, WorkerSucceeded { image_url }) if !image_url.trim().is_empty() => {
            Ok(Completed)
        }
        (Pending | Processing, WorkerSucceeded { .. }) => Err(TransitionError::MissingImageUrl),
        (Pending | Processing, WorkerFailed) => Ok(Failed),
        (from, event) => Err(TransitionError::NotPermitted {
            from,
            to: event.target(),
        }),
    }
}
