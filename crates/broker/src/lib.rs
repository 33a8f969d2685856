//! Event Publisher: the routing-key catalogue, the envelope every consumer
//! receives, and the broker transports behind [`EventPublisher`].

#[cfg(feature = "amqp")]
pub mod amqp;
pub mod broker;
pub mod envelope;
pub mod error;
pub mod events;
pub mod memory;
pub mod publisher;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;
pub use {
    broker::{Broker, PublishMeta},
    envelope::Envelope,
    error::{Error, Result},
    memory::InMemoryBroker,
    publisher::EventPublisher,
};
