//! Lifecycle of the shared broker connection
//!
//! One [`ConnectionManager`] owns the process-wide connection and its
//! confirm-enabled publish channel. Callers get cheap clones of a
//! [`BrokerHandle`]; only the manager opens or closes the underlying
//! transport. Reconnection is lazy and single-attempt: a caller that finds
//! no live handle triggers exactly one connect, and every caller that queued
//! behind that attempt shares its outcome.

use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::transport::{BrokerChannel, BrokerConnection, BrokerTransport};
use crate::error::{ConnectionError, TransportError};

/// Connection state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A publish-capable view of the live connection
///
/// Cloning is cheap. A handle can go stale when the broker drops the
/// connection; [`BrokerHandle::is_live`] reports that without I/O.
#[derive(Clone)]
pub struct BrokerHandle {
    connection: Arc<dyn BrokerConnection>,
    channel: Arc<dyn BrokerChannel>,
    queue: Arc<str>,
    generation: u64,
}

impl BrokerHandle {
    /// Both the connection and the channel still report open
    pub fn is_live(&self) -> bool {
        self.connection.is_open() && self.channel.is_open()
    }

    /// Durable queue declared on this channel
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Identifies the physical connection this handle belongs to
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn channel(&self) -> &Arc<dyn BrokerChannel> {
        &self.channel
    }

    async fn close(&self) {
        if let Err(e) = self.channel.close().await {
            debug!(generation = self.generation, error = %e, "Channel close failed");
        }
        if let Err(e) = self.connection.close().await {
            warn!(generation = self.generation, error = %e, "Connection close failed");
        }
    }
}

impl fmt::Debug for BrokerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerHandle")
            .field("queue", &self.queue)
            .field("generation", &self.generation)
            .field("live", &self.is_live())
            .finish()
    }
}

struct Slot {
    state: ConnectionState,
    handle: Option<BrokerHandle>,
    last_error: Option<ConnectionError>,
}

/// Owner of the single broker connection
pub struct ConnectionManager {
    transport: Arc<dyn BrokerTransport>,
    queue: Arc<str>,
    connect_timeout: Duration,
    /// Never held across an await
    slot: RwLock<Slot>,
    /// Serializes physical connects and release
    connect_lock: Mutex<()>,
    /// Completed connect attempts; doubles as the handle generation
    attempts: AtomicU64,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        queue: impl Into<String>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            queue: Arc::from(queue.into()),
            connect_timeout,
            slot: RwLock::new(Slot {
                state: ConnectionState::Disconnected,
                handle: None,
                last_error: None,
            }),
            connect_lock: Mutex::new(()),
            attempts: AtomicU64::new(0),
        }
    }

    /// Return a live handle, connecting once if there is none
    ///
    /// A caller that waited while another caller's connect attempt failed
    /// receives that attempt's error instead of starting a new one.
    pub async fn acquire_handle(&self) -> Result<BrokerHandle, ConnectionError> {
        let seen = self.attempts.load(Ordering::Acquire);
        if let Some(handle) = self.live_handle() {
            return Ok(handle);
        }

        let _guard = self.connect_lock.lock().await;

        if let Some(handle) = self.live_handle() {
            return Ok(handle);
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            if let Some(err) = self.slot.read().last_error.clone() {
                debug!(error = %err, "Sharing result of concurrent connect attempt");
                return Err(err);
            }
        }

        self.connect_locked().await
    }

    /// Close the connection if one is open
    ///
    /// Idempotent, and safe to call when nothing was ever connected.
    pub async fn release(&self) {
        let _guard = self.connect_lock.lock().await;
        let handle = {
            let mut slot = self.slot.write();
            slot.state = ConnectionState::Disconnected;
            slot.handle.take()
        };

        match handle {
            Some(handle) => {
                handle.close().await;
                info!(generation = handle.generation, "Broker connection released");
            }
            None => debug!("No broker connection to release"),
        }
    }

    /// Drop `handle` after a transport failure was observed on it
    ///
    /// Has no effect if the manager has already moved to a newer connection.
    pub async fn report_fault(&self, handle: &BrokerHandle) {
        let stale = {
            let mut slot = self.slot.write();
            let is_current = slot
                .handle
                .as_ref()
                .is_some_and(|current| current.generation == handle.generation);
            if is_current {
                slot.state = ConnectionState::Disconnected;
                slot.handle.take()
            } else {
                None
            }
        };

        if let Some(stale) = stale {
            warn!(
                generation = stale.generation,
                "Broker connection faulted, will reconnect on next acquire"
            );
            stale.close().await;
        }
    }

    /// Current state; a connected slot whose handle went stale reads as disconnected
    pub fn state(&self) -> ConnectionState {
        let slot = self.slot.read();
        match (slot.state, &slot.handle) {
            (ConnectionState::Connected, Some(handle)) if !handle.is_live() => {
                ConnectionState::Disconnected
            }
            (state, _) => state,
        }
    }

    /// Number of physical connect attempts made so far
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    fn live_handle(&self) -> Option<BrokerHandle> {
        let slot = self.slot.read();
        match (slot.state, &slot.handle) {
            (ConnectionState::Connected, Some(handle)) if handle.is_live() => Some(handle.clone()),
            _ => None,
        }
    }

    /// Caller must hold `connect_lock`
    async fn connect_locked(&self) -> Result<BrokerHandle, ConnectionError> {
        let generation = self.attempts.load(Ordering::Acquire) + 1;
        let stale = {
            let mut slot = self.slot.write();
            slot.state = ConnectionState::Connecting;
            slot.handle.take()
        };
        if let Some(stale) = stale {
            debug!(generation = stale.generation, "Discarding stale broker connection");
            stale.close().await;
        }

        debug!(endpoint = %self.transport.endpoint(), generation, "Connecting to broker");
        let result = self.establish(generation).await;

        {
            let mut slot = self.slot.write();
            match &result {
                Ok(handle) => {
                    slot.state = ConnectionState::Connected;
                    slot.handle = Some(handle.clone());
                    slot.last_error = None;
                }
                Err(err) => {
                    slot.state = ConnectionState::Disconnected;
                    slot.last_error = Some(err.clone());
                }
            }
        }
        self.attempts.store(generation, Ordering::Release);

        match &result {
            Ok(_) => info!(
                endpoint = %self.transport.endpoint(),
                queue = %self.queue,
                generation,
                "Connected to broker"
            ),
            Err(e) => warn!(
                endpoint = %self.transport.endpoint(),
                error = %e,
                "Broker connect attempt failed"
            ),
        }
        result
    }

    /// Connect and prepare the channel, all within `connect_timeout`
    async fn establish(&self, generation: u64) -> Result<BrokerHandle, ConnectionError> {
        let deadline = Instant::now() + self.connect_timeout;

        let connection = match timeout_at(deadline, self.transport.connect()).await {
            Ok(connected) => connected.map_err(ConnectionError::Unavailable)?,
            Err(_) => return Err(self.timed_out()),
        };

        let failure = match timeout_at(deadline, self.prepare_channel(connection.as_ref())).await {
            Ok(Ok(channel)) => {
                return Ok(BrokerHandle {
                    connection,
                    channel,
                    queue: self.queue.clone(),
                    generation,
                })
            }
            Ok(Err(e)) => ConnectionError::Unavailable(e),
            Err(_) => self.timed_out(),
        };

        match timeout(self.connect_timeout, connection.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "Closing half-open connection failed"),
            Err(_) => debug!("Closing half-open connection timed out"),
        }
        Err(failure)
    }

    fn timed_out(&self) -> ConnectionError {
        ConnectionError::Timeout {
            timeout_ms: self.connect_timeout.as_millis() as u64,
        }
    }

    async fn prepare_channel(
        &self,
        connection: &dyn BrokerConnection,
    ) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let channel = connection.open_channel().await?;
        channel.declare_durable_queue(&self.queue).await?;
        channel.enable_confirms().await?;
        Ok(channel)
    }
}
