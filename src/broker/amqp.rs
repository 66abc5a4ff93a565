//! RabbitMQ transport built on lapin

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation as AmqpConfirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::debug;

use super::transport::{BrokerChannel, BrokerConnection, BrokerTransport, Confirmation};
use crate::config::BrokerConfig;
use crate::error::TransportError;

/// AMQP delivery mode that survives a broker restart
const PERSISTENT_DELIVERY_MODE: u8 = 2;

const REPLY_SUCCESS: u16 = 200;

/// Connects to RabbitMQ over AMQP 0-9-1
pub struct AmqpTransport {
    uri: String,
    endpoint: String,
}

impl AmqpTransport {
    pub fn new(config: &BrokerConfig) -> Self {
        Self {
            uri: config.amqp_uri(),
            endpoint: format!("{}:{}", config.host, config.port),
        }
    }
}

#[async_trait]
impl BrokerTransport for AmqpTransport {
    async fn connect(&self) -> Result<Arc<dyn BrokerConnection>, TransportError> {
        let connection = Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        debug!(endpoint = %self.endpoint, "AMQP connection opened");
        Ok(Arc::new(AmqpConnection { connection }))
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

struct AmqpConnection {
    connection: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    fn is_open(&self) -> bool {
        self.connection.status().connected()
    }

    async fn open_channel(&self) -> Result<Arc<dyn BrokerChannel>, TransportError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))?;
        Ok(Arc::new(AmqpChannel { channel }))
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Ok(());
        }
        self.connection
            .close(REPLY_SUCCESS, "gateway shutdown")
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}

struct AmqpChannel {
    channel: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }

    async fn declare_durable_queue(&self, queue: &str) -> Result<(), TransportError> {
        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        self.channel
            .queue_declare(queue, options, FieldTable::default())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Declare {
                queue: queue.to_string(),
                message: e.to_string(),
            })
    }

    async fn enable_confirms(&self) -> Result<(), TransportError> {
        self.channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| TransportError::Channel(e.to_string()))
    }

    async fn publish_confirmed(
        &self,
        queue: &str,
        payload: &[u8],
    ) -> Result<Confirmation, TransportError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
            .with_content_type("application/json".into());

        // Default exchange routes by queue name
        let confirm = self
            .channel
            .basic_publish("", queue, BasicPublishOptions::default(), payload, properties)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        let confirmation = confirm
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;

        Ok(match confirmation {
            AmqpConfirmation::Ack(_) => Confirmation::Ack,
            AmqpConfirmation::Nack(_) => Confirmation::Nack,
            AmqpConfirmation::NotRequested => Confirmation::NotRequested,
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.is_open() {
            return Ok(());
        }
        self.channel
            .close(REPLY_SUCCESS, "gateway shutdown")
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}
