//! Monitor module - Broker health checking

pub mod health_check;

pub use health_check::{BrokerHealthMonitor, HealthStatus};
