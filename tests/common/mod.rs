//! Scripted in-process broker used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use imagegen_gateway::broker::{
    BrokerChannel, BrokerConnection, BrokerTransport, Confirmation, ConnectionManager,
    TaskPublisher,
};
use imagegen_gateway::config::Settings;
use imagegen_gateway::error::TransportError;
use imagegen_gateway::store::InMemoryRequestStore;
use imagegen_gateway::Gateway;

/// How the scripted broker answers a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmMode {
    Ack,
    Nack,
    NotRequested,
    /// Never answer
    Hang,
    /// Drop the connection mid-publish
    Reset,
}

type PublishObserver = Arc<dyn Fn(&[u8]) + Send + Sync>;

struct Shared {
    reachable: AtomicBool,
    fail_declare: AtomicBool,
    connect_delay: Mutex<Duration>,
    declare_delay: Mutex<Duration>,
    confirm: Mutex<ConfirmMode>,
    connects: AtomicUsize,
    closes: AtomicUsize,
    declared: Mutex<Vec<String>>,
    delivered: Mutex<Vec<Vec<u8>>>,
    current: Mutex<Option<Arc<AtomicBool>>>,
    observer: Mutex<Option<PublishObserver>>,
}

/// Broker double with knobs for every failure the gateway must survive
#[derive(Clone)]
pub struct ScriptedTransport {
    shared: Arc<Shared>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                reachable: AtomicBool::new(true),
                fail_declare: AtomicBool::new(false),
                connect_delay: Mutex::new(Duration::ZERO),
                declare_delay: Mutex::new(Duration::ZERO),
                confirm: Mutex::new(ConfirmMode::Ack),
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                declared: Mutex::new(Vec::new()),
                delivered: Mutex::new(Vec::new()),
                current: Mutex::new(None),
                observer: Mutex::new(None),
            }),
        }
    }

    pub fn unreachable() -> Self {
        let transport = Self::new();
        transport.set_reachable(false);
        transport
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_fail_declare(&self, fail: bool) {
        self.shared.fail_declare.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.shared.connect_delay.lock() = delay;
    }

    /// Stall queue declaration, after the connection is already open
    pub fn set_declare_delay(&self, delay: Duration) {
        *self.shared.declare_delay.lock() = delay;
    }

    pub fn set_confirm(&self, mode: ConfirmMode) {
        *self.shared.confirm.lock() = mode;
    }

    pub fn on_publish(&self, observer: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.shared.observer.lock() = Some(Arc::new(observer));
    }

    /// Simulate the broker closing the live connection
    pub fn drop_connection(&self) {
        if let Some(open) = self.shared.current.lock().as_ref() {
            open.store(false, Ordering::SeqCst);
        }
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Connection and channel closes requested by the gateway
    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn declared(&self) -> Vec<String> {
        self.shared.declared.lock().clone()
    }

    /// Messages the broker acknowledged into the durable queue
    pub fn delivered(&self) -> Vec<serde_json::Value> {
        self.shared
            .delivered
            .lock()
            .iter()
            .map(|payload| serde_json::from_slice(payload).expect("payload is JSON"))
            .collect()
    }
}

#[async_trait]
impl BrokerTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, TransportError> {
        self.shared.connects.fetch_add(1, Ordering::SeqCst);

        let delay = *self.shared.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let open = Arc::new(AtomicBool::new(true));
        *self.shared.current.lock() = Some(open.clone());
        Ok(Arc::new(ScriptedConnection {
            shared: self.shared.clone(),
            open,
        }))
    }

    fn endpoint(&self) -> String {
        "scripted:5672".to_string()
    }
}

struct ScriptedConnection {
    shared: Arc<Shared>,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl BrokerConnection for ScriptedConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        if !self.is_open() {
            return Err(TransportError::Channel("connection closed".to_string()));
        }
        Ok(Arc::new(ScriptedChannel {
            shared: self.shared.clone(),
            connection_open: self.open.clone(),
            open: AtomicBool::new(true),
            confirms: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedChannel {
    shared: Arc<Shared>,
    connection_open: Arc<AtomicBool>,
    open: AtomicBool,
    confirms: AtomicBool,
}

#[async_trait]
impl BrokerChannel for ScriptedChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.connection_open.load(Ordering::SeqCst)
    }

    async fn declare_durable_queue(&self, queue: &str) -> Result<(), TransportError> {
        let delay = *self.shared.declare_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.shared.fail_declare.load(Ordering::SeqCst) {
            return Err(TransportError::Declare {
                queue: queue.to_string(),
                message: "PRECONDITION_FAILED".to_string(),
            });
        }
        let mut declared = self.shared.declared.lock();
        if !declared.iter().any(|q| q == queue) {
            declared.push(queue.to_string());
        }
        Ok(())
    }

    async fn enable_confirms(&self) -> Result<(), TransportError> {
        self.confirms.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn publish_confirmed(
        &self,
        _queue: &str,
        payload: &[u8],
    ) -> Result<Confirmation, TransportError> {
        let observer = self.shared.observer.lock().clone();
        if let Some(observer) = observer {
            observer(payload);
        }

        if !self.confirms.load(Ordering::SeqCst) {
            return Ok(Confirmation::NotRequested);
        }

        let mode = *self.shared.confirm.lock();
        match mode {
            ConfirmMode::Ack => {
                self.shared.delivered.lock().push(payload.to_vec());
                Ok(Confirmation::Ack)
            }
            ConfirmMode::Nack => Ok(Confirmation::Nack),
            ConfirmMode::NotRequested => Ok(Confirmation::NotRequested),
            ConfirmMode::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            ConfirmMode::Reset => {
                self.connection_open.store(false, Ordering::SeqCst);
                Err(TransportError::Publish("connection reset by peer".to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Settings with short timeouts for tests
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.broker.connect_timeout_ms = 500;
    settings.broker.confirm_timeout_ms = 100;
    settings.submission.acquire_backoff_ms = 5;
    settings
}

pub fn manager(transport: &ScriptedTransport) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        Arc::new(transport.clone()),
        "image_generation_queue",
        Duration::from_millis(500),
    ))
}

pub fn publisher() -> TaskPublisher {
    TaskPublisher::new(Duration::from_millis(100))
}

/// Gateway over an in-memory store and the given scripted broker
pub fn gateway(transport: &ScriptedTransport) -> (Gateway, Arc<InMemoryRequestStore>) {
    gateway_with(transport, test_settings())
}

pub fn gateway_with(
    transport: &ScriptedTransport,
    settings: Settings,
) -> (Gateway, Arc<InMemoryRequestStore>) {
    let store = Arc::new(InMemoryRequestStore::new());
    let gateway = Gateway::from_settings(store.clone(), Arc::new(transport.clone()), &settings);
    (gateway, store)
}

pub fn params(prompt: &str) -> serde_json::Map<String, serde_json::Value> {
    let mut params = serde_json::Map::new();
    params.insert("prompt".to_string(), serde_json::json!(prompt));
    params
}
