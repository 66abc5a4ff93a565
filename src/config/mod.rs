//! Configuration module

pub mod settings;

pub use settings::{
    BrokerConfig, DatabaseConfig, HealthCheckConfig, LoggingConfig, Settings, SubmissionConfig,
};
