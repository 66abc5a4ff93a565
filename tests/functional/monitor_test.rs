//! Broker health monitor against the scripted transport

use std::time::Duration;

use imagegen_gateway::config::HealthCheckConfig;
use imagegen_gateway::monitor::BrokerHealthMonitor;

use crate::common::{manager, ScriptedTransport};

fn config(failure_threshold: u32, recovery_threshold: u32) -> HealthCheckConfig {
    HealthCheckConfig {
        enabled: true,
        interval_secs: 1,
        failure_threshold,
        recovery_threshold,
    }
}

#[tokio::test]
async fn test_check_now_reflects_broker_reachability() {
    let transport = ScriptedTransport::unreachable();
    let monitor = BrokerHealthMonitor::new(manager(&transport), &config(3, 2));

    assert!(!monitor.check_now().await);
    assert!(!monitor.is_healthy());
    assert!(monitor.status().last_error.is_some());

    transport.set_reachable(true);
    assert!(monitor.check_now().await);
    assert!(monitor.is_healthy());
    assert_eq!(transport.connects(), 2);
}

#[tokio::test]
async fn test_background_checks_reconnect_after_outage() {
    let transport = ScriptedTransport::new();
    let connections = manager(&transport);
    connections.acquire_handle().await.unwrap();

    let monitor = BrokerHealthMonitor::new(connections.clone(), &config(1, 1));
    transport.drop_connection();
    transport.set_reachable(false);

    monitor.start(Duration::from_millis(10)).await;
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(!monitor.is_healthy());

    transport.set_reachable(true);
    tokio::time::sleep(Duration::from_millis(60)).await;
    monitor.stop().await;

    assert!(monitor.is_healthy());
    let handle = connections.acquire_handle().await.unwrap();
    assert!(handle.is_live());
}
