//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Message broker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_broker_user")]
    pub username: String,
    #[serde(default = "default_broker_password")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
    #[serde(default = "default_broker_timeout")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_broker_timeout")]
    pub confirm_timeout_ms: u64,
}

fn default_broker_host() -> String {
    "localhost".to_string()
}

fn default_broker_port() -> u16 {
    5672
}

fn default_broker_user() -> String {
    "user".to_string()
}

fn default_broker_password() -> String {
    "password".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

fn default_queue_name() -> String {
    "image_generation_queue".to_string()
}

fn default_broker_timeout() -> u64 {
    5000
}

/// Everything outside the RFC 3986 unreserved set
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

impl BrokerConfig {
    /// AMQP URI for this broker; credentials and vhost are percent-encoded
    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            utf8_percent_encode(&self.username, URI_COMPONENT),
            utf8_percent_encode(&self.password, URI_COMPONENT),
            self.host,
            self.port,
            utf8_percent_encode(&self.vhost, URI_COMPONENT)
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            username: default_broker_user(),
            password: default_broker_password(),
            vhost: default_vhost(),
            queue_name: default_queue_name(),
            connect_timeout_ms: default_broker_timeout(),
            confirm_timeout_ms: default_broker_timeout(),
        }
    }
}

/// Request database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Postgres URL; records are kept in memory when absent
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout() -> u64 {
    3000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout(),
        }
    }
}

/// Submission retry policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubmissionConfig {
    /// Connect attempts per submission before giving up
    #[serde(default = "default_acquire_attempts")]
    pub acquire_attempts: u32,
    #[serde(default = "default_acquire_backoff")]
    pub acquire_backoff_ms: u64,
}

fn default_acquire_attempts() -> u32 {
    1
}

fn default_acquire_backoff() -> u64 {
    200
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            acquire_attempts: default_acquire_attempts(),
            acquire_backoff_ms: default_acquire_backoff(),
        }
    }
}

/// Broker health monitor configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_health_check_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_recovery_threshold")]
    pub recovery_threshold: u32,
}

fn default_true() -> bool {
    true
}

fn default_health_check_interval() -> u64 {
    15
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_threshold() -> u32 {
    2
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_health_check_interval(),
            failure_threshold: default_failure_threshold(),
            recovery_threshold: default_recovery_threshold(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Environment variables used by existing deployments, mapped onto keys
const LEGACY_ENV: [(&str, &str); 4] = [
    ("RABBITMQ_HOST", "broker.host"),
    ("RABBITMQ_DEFAULT_USER", "broker.username"),
    ("RABBITMQ_DEFAULT_PASS", "broker.password"),
    ("DATABASE_URL", "database.url"),
];

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_str().ok_or_else(|| {
            AppError::Internal("configuration path is not valid UTF-8".to_string())
        })?;

        let mut builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            // Override with environment variables (prefixed with IMAGEGEN_)
            .add_source(
                Environment::with_prefix("IMAGEGEN")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV {
            if let Ok(value) = std::env::var(var) {
                if !value.is_empty() {
                    builder = builder.set_override(key, value)?;
                }
            }
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(AppError::Config(config::ConfigError::Message(msg)));

        if self.broker.host.is_empty() {
            return invalid("Broker host cannot be empty".to_string());
        }
        if self.broker.port == 0 {
            return invalid("Broker port cannot be 0".to_string());
        }
        if self.broker.queue_name.is_empty() {
            return invalid("Queue name cannot be empty".to_string());
        }
        if self.broker.connect_timeout_ms == 0 || self.broker.confirm_timeout_ms == 0 {
            return invalid("Broker timeouts must be positive".to_string());
        }
        if self.submission.acquire_attempts == 0 {
            return invalid("submission.acquire_attempts must be at least 1".to_string());
        }
        if self.health_check.enabled && self.health_check.interval_secs == 0 {
            return invalid("health_check.interval_secs must be positive".to_string());
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return invalid(format!(
                "Invalid log format '{}'. Must be 'json' or 'pretty'",
                self.logging.format
            ));
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            database: DatabaseConfig::default(),
            submission: SubmissionConfig::default(),
            health_check: HealthCheckConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
