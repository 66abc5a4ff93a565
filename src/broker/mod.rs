//! Broker module - Transport traits, RabbitMQ client, connection lifecycle and publishing

pub mod amqp;
pub mod connection_manager;
pub mod publisher;
pub mod transport;

pub use amqp::AmqpTransport;
pub use connection_manager::{BrokerHandle, ConnectionManager, ConnectionState};
pub use publisher::TaskPublisher;
pub use transport::{BrokerChannel, BrokerConnection, BrokerTransport, Confirmation};
