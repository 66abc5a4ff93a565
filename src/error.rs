//! Common error types for the submission gateway

use thiserror::Error;
use uuid::Uuid;

use crate::request::RequestStatus;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure reported by a broker transport primitive
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("queue declaration failed for '{queue}': {message}")]
    Declare { queue: String, message: String },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("close failed: {0}")]
    Close(String),
}

/// The connection manager could not produce a healthy handle.
///
/// Clone so that every caller waiting on the same connect attempt receives
/// the same error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("broker connection unavailable: {0}")]
    Unavailable(#[source] TransportError),

    #[error("broker connect timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Outcome of a failed confirmed publish
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("broker rejected message: {0}")]
    BrokerRejected(String),

    #[error("no publisher confirmation within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("task serialization failed: {0}")]
    Serialization(String),
}

impl PublishError {
    /// Whether the failure came from the transport rather than the broker's verdict
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::ConnectionUnavailable(_))
    }
}

/// Errors surfaced by the submission interface
#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("message queue unavailable: {0}")]
    QueueUnavailable(#[source] ConnectionError),

    #[error("failed to queue the request: {0}")]
    PublishFailed(#[source] PublishError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("submission task aborted: {0}")]
    Aborted(String),
}

impl SubmissionError {
    /// Whether the caller may retry the submission later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::QueueUnavailable(_) | Self::PublishFailed(_))
    }

    /// Short machine-readable code for outer transports
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::QueueUnavailable(_) => "queue_unavailable",
            Self::PublishFailed(_) => "publish_failed",
            Self::Storage(_) => "storage_error",
            Self::Aborted(_) => "internal_error",
        }
    }
}

/// Errors raised by a `RequestStore` implementation
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("request {0} already exists")]
    Duplicate(Uuid),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A status change that the lifecycle table does not permit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("request is in terminal state {from}")]
    Terminal { from: RequestStatus },

    #[error("transition {from} -> {to} is not permitted")]
    NotPermitted {
        from: RequestStatus,
        to: RequestStatus,
    },

    #[error("a completed request requires a non-empty image_url")]
    MissingImageUrl,
}

/// Errors from the status query and worker report interfaces
#[derive(Error, Debug)]
pub enum StatusError {
    #[error("request_id not found: {0}")]
    RecordNotFound(Uuid),

    #[error("invalid request_id format: {0}")]
    InvalidId(String),

    #[error("invalid status report: {0}")]
    InvalidReport(#[source] TransitionError),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

impl StatusError {
    /// Short machine-readable code for outer transports
    pub fn code(&self) -> &'static str {
        match self {
            Self::RecordNotFound(_) => "not_found",
            Self::InvalidId(_) => "invalid_request_id",
            Self::InvalidReport(_) => "invalid_report",
            Self::Storage(_) => "storage_error",
        }
    }
}
