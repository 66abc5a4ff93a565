//! Broker transport primitives
//!
//! The connection manager and the publisher only talk to the broker through
//! these traits. [`crate::broker::amqp`] implements them for RabbitMQ; tests
//! drive the same code with scripted in-process transports.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::TransportError;

/// Broker verdict on a single published message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// The broker took responsibility for the message
    Ack,
    /// The broker refused the message
    Nack,
    /// The channel is not in confirm mode, so no verdict exists
    NotRequested,
}

/// Factory for physical broker connections
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Open and authenticate a new connection
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, TransportError>;

    /// Broker address for logs, without credentials
    fn endpoint(&self) -> String;
}

/// An open, authenticated transport session
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Cached open flag; must not touch the network
    fn is_open(&self) -> bool;

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}

/// A channel on an open connection
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Cached open flag; must not touch the network
    fn is_open(&self) -> bool;

    /// Declare a durable queue; a no-op when it already exists with the same properties
    async fn declare_durable_queue(&self, queue: &str) -> Result<(), TransportError>;

    /// Put the channel into publisher-confirm mode
    async fn enable_confirms(&self) -> Result<(), TransportError>;

    /// Publish a persistent message to `queue` and wait for the broker's verdict
    async fn publish_confirmed(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Result<Confirmation, TransportError>;

    async fn close(&self) -> Result<(), TransportError>;
}
