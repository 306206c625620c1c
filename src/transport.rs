// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport Capability
//!
//! The client talks to the broker only through the traits defined here:
//! a [`Transport`] opens [`BrokerConnection`]s, which open [`BrokerChannel`]s.
//! The production implementation lives in [`crate::channel`] and is backed by
//! lapin; unit tests substitute mocks.

use crate::{errors::AmqpError, options::ConnectionOptions, queue::QueueDefinition};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use lapin::BasicProperties;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// One inbound message, detached from the transport that received it.
#[derive(Debug, Clone, Default)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub data: Vec<u8>,
    pub properties: BasicProperties,
}

/// Stream of deliveries for one consumer. It ends when the consumer is
/// cancelled or its channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// Establishes connections to the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a single connection. Retrying is left to the caller.
    ///
    /// # Parameters
    /// * `options` - Broker endpoint, credentials and connection name
    ///
    /// # Returns
    /// The open connection, or the failure classified so the caller can tell
    /// an unreachable broker ([`AmqpError::TransportError`]) from a refusal
    async fn connect(
        &self,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn BrokerConnection>, AmqpError>;
}

/// A live broker connection.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Whether the connection can still open channels.
    fn is_open(&self) -> bool;

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}

/// A channel multiplexed over a [`BrokerConnection`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares a queue. Redeclaring with the same flags is a no-op on the
    /// broker; conflicting flags fail and close the channel.
    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    /// Starts a consumer.
    ///
    /// # Parameters
    /// * `queue` - Queue to consume from
    /// * `consumer_tag` - Tag identifying the consumer, used to cancel it
    /// * `auto_ack` - When set, the broker settles each delivery as soon as
    ///   it is sent
    ///
    /// # Returns
    /// A [`DeliveryStream`] yielding deliveries until the consumer stops
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        auto_ack: bool,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    /// Publishes `payload` to `exchange` with `routing_key`. No publisher
    /// confirm is awaited.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    /// Rejects a delivery, putting it back on the queue when `requeue` is set.
    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn close(&self) -> Result<(), AmqpError>;
}
