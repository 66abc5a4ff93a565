//! Background health checking of the broker connection
//!
//! The connection manager never retries on its own; this monitor is the
//! supervisor that keeps trying on a fixed cadence so that a broker outage
//! heals between submissions.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::broker::ConnectionManager;
use crate::config::HealthCheckConfig;

/// Health status of the broker connection
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Option<Instant>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true, // Assume healthy until proven otherwise
            last_check: None,
            last_error: None,
            consecutive_failures: 0,
            consecutive_successes: 0,
        }
    }
}

impl HealthStatus {
    fn record(&mut self, result: Result<(), String>, failure_threshold: u32, recovery_threshold: u32) {
        self.last_check = Some(Instant::now());

        match result {
            Ok(()) => {
                self.consecutive_failures = 0;
                self.consecutive_successes += 1;
                self.last_error = None;

                if !self.healthy && self.consecutive_successes >= recovery_threshold {
                    self.healthy = true;
                    info!("Broker recovered and marked healthy");
                }
            }
            Err(e) => {
                self.consecutive_successes = 0;
                self.consecutive_failures += 1;

                if self.healthy && self.consecutive_failures >= failure_threshold {
                    self.healthy = false;
                    warn!(
                        failures = self.consecutive_failures,
                        error = %e,
                        "Broker marked unhealthy after consecutive failures"
                    );
                }
                self.last_error = Some(e);
            }
        }
    }
}

/// Periodic broker probe
pub struct BrokerHealthMonitor {
    connections: Arc<ConnectionManager>,
    status: Arc<RwLock<HealthStatus>>,
    check_task: Mutex<Option<JoinHandle<()>>>,
    /// Number of consecutive failures before marking unhealthy
    failure_threshold: u32,
    /// Number of consecutive successes before marking healthy again
    recovery_threshold: u32,
}

impl BrokerHealthMonitor {
    pub fn new(connections: Arc<ConnectionManager>, config: &HealthCheckConfig) -> Self {
        Self {
            connections,
            status: Arc::new(RwLock::new(HealthStatus::default())),
            check_task: Mutex::new(None),
            failure_threshold: config.failure_threshold.max(1),
            recovery_threshold: config.recovery_threshold.max(1),
        }
    }

    /// Start the health check background task
    pub async fn start(&self, interval: Duration) {
        let connections = self.connections.clone();
        let status = self.status.clone();
        let failure_threshold = self.failure_threshold;
        let recovery_threshold = self.recovery_threshold;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let result = probe(&connections).await;
                let mut current = status.write();
                current.record(result, failure_threshold, recovery_threshold);

                debug!(
                    healthy = current.healthy,
                    consecutive_failures = current.consecutive_failures,
                    consecutive_successes = current.consecutive_successes,
                    "Broker health check completed"
                );
            }
        });

        if let Some(previous) = self.check_task.lock().await.replace(handle) {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "Started broker health check task");
    }

    /// Stop the health check background task
    pub async fn stop(&self) {
        if let Some(handle) = self.check_task.lock().await.take() {
            handle.abort();
            info!("Stopped broker health check task");
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status.read().healthy
    }

    pub fn status(&self) -> HealthStatus {
        self.status.read().clone()
    }

    /// Probe immediately and record the result
    ///
    /// Unlike the background loop this sets `healthy` directly from the
    /// outcome, for readiness checks.
    pub async fn check_now(&self) -> bool {
        let result = probe(&self.connections).await;
        let healthy = result.is_ok();

        let mut status = self.status.write();
        status.record(result, u32::MAX, u32::MAX);
        status.healthy = healthy;
        healthy
    }
}

async fn probe(connections: &ConnectionManager) -> Result<(), String> {
    connections
        .acquire_handle()
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
}
