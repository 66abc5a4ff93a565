//! Image Generation Submission Gateway
//!
//! Accepts image generation requests, records them, and queues them for a
//! worker pool over a durable, publisher-confirmed RabbitMQ queue. Clients
//! poll for completion; workers report progress back through a guarded
//! status lifecycle.

pub mod broker;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod request;
pub mod service;
pub mod store;

pub use error::{AppError, Result};
pub use service::Gateway;
