// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! lapin-backed implementation of the [`crate::transport`] traits. It
//! establishes connections to the RabbitMQ server, creates channels on them,
//! and translates lapin errors into [`AmqpError`], deciding at this single
//! boundary which failures are transient.

use crate::{
    errors::AmqpError,
    options::ConnectionOptions,
    queue::QueueDefinition,
    transport::{BrokerChannel, BrokerConnection, Delivery, DeliveryStream, Transport},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error};

/// AMQP reply code for a normal close.
const REPLY_SUCCESS: u16 = 200;

/// Maps a lapin error to an [`AmqpError`].
///
/// Socket failures, a connection in an unusable state and missed heartbeats
/// mean the broker could not be reached; anything else is a protocol or logic
/// failure.
pub(crate) fn classify(err: lapin::Error) -> AmqpError {
    match err {
        lapin::Error::IOError(io) => AmqpError::TransportError(io.to_string()),
        lapin::Error::InvalidConnectionState(_) | lapin::Error::MissingHeartbeatError => {
            AmqpError::TransportError(err.to_string())
        }
        other => AmqpError::ProtocolError(other.to_string()),
    }
}

/// Opens lapin connections.
#[derive(Debug, Clone, Default)]
pub struct LapinTransport;

#[async_trait]
impl Transport for LapinTransport {
    async fn connect(
        &self,
        options: &ConnectionOptions,
    ) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        debug!(endpoint = options.endpoint(), "creating amqp connection...");

        let mut properties = ConnectionProperties::default();
        if let Some(name) = &options.connection_name {
            properties = properties.with_connection_name(LongString::from(name.clone()));
        }

        let conn = Connection::connect(&options.connection_string(), properties)
            .await
            .map_err(classify)?;
        debug!("amqp connected");

        Ok(Arc::new(LapinConnection { inner: conn }))
    }
}

/// A lapin [`Connection`].
pub struct LapinConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for LapinConnection {
    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }

    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match self.inner.create_channel().await {
            Ok(c) => {
                debug!(channel_id = c.id(), "channel created");
                Ok(Arc::new(LapinChannel { inner: c }))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(REPLY_SUCCESS, "client closing connection")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

/// A lapin [`Channel`].
pub struct LapinChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for LapinChannel {
    async fn queue_declare(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!(queue = def.name(), "declaring queue");

        match self
            .inner
            .queue_declare(
                def.name(),
                QueueDeclareOptions::from(def),
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name(),
                    "error to declare the queue"
                );
                Err(AmqpError::DeclareQueueError(def.name().to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        auto_ack: bool,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = match self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: auto_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let deliveries = consumer.map(|result| match result {
            Ok(delivery) => Ok(Delivery {
                delivery_tag: delivery.delivery_tag,
                redelivered: delivery.redelivered,
                data: delivery.data,
                properties: delivery.properties,
            }),
            Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
        });

        Ok(deliveries.boxed())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to cancel the consumer");
                AmqpError::CancelConsumerError(consumer_tag.to_owned())
            })
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                properties,
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.inner
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }

    async fn close(&self) -> Result<(), AmqpError> {
        self.inner
            .close(REPLY_SUCCESS, "client closing channel")
            .await
            .map_err(|err| AmqpError::CloseError(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_errors_are_transient() {
        let err = lapin::Error::IOError(Arc::new(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        )));

        let classified = classify(err);
        assert!(classified.is_transient());
        assert!(matches!(classified, AmqpError::TransportError(_)));
    }

    #[test]
    fn test_missing_heartbeat_is_transient() {
        assert!(classify(lapin::Error::MissingHeartbeatError).is_transient());
    }

    #[test]
    fn test_other_errors_are_fatal() {
        let classified = classify(lapin::Error::ChannelsLimitReached);
        assert!(matches!(classified, AmqpError::ProtocolError(_)));
        assert!(!classified.is_transient());
    }
}
