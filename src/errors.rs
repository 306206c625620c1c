// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the RabbitMQ Client
//!
//! This module provides the error type shared by every layer of the client.
//! The `AmqpError` enum represents all failure scenarios that can occur during
//! connection, channel, queue, publish and delivery handling operations, and
//! `ErrorKind` groups them into the classes the connection layer branches on.

use thiserror::Error;

/// Coarse classification of an [`AmqpError`].
///
/// The connection retry loop only looks at this tag: `Transient` failures are
/// retried, everything else is surfaced immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The broker is unreachable or the transport dropped; worth retrying.
    Transient,
    /// A protocol or logic failure; retrying would not help.
    Fatal,
    /// Invalid input supplied by the caller.
    Validation,
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Socket or transport level failure, including an unreachable broker
    #[error("transport failure `{0}`")]
    TransportError(String),

    /// Non-transient failure reported by the broker or the protocol layer
    #[error("protocol failure `{0}`")]
    ProtocolError(String),

    /// Every connection attempt failed
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel `{0}`")]
    ChannelError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a consumer to a queue
    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    /// Error cancelling a consumer
    #[error("failure to cancel consumer `{0}`")]
    CancelConsumerError(String),

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error serializing an outbound payload
    #[error("failure to serialize payload `{0}`")]
    SerializePayloadError(String),

    /// Error parsing an inbound payload
    #[error("failure to parse payload `{0}`")]
    ParsePayloadError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Ack or Nack was called on a delivery that was already settled
    #[error("delivery `{0}` was already settled")]
    DeliveryAlreadySettled(u64),

    /// Empty or whitespace queue name
    #[error("invalid queue name `{0}`")]
    InvalidQueueName(String),

    /// Invalid connection options
    #[error("invalid configuration `{0}`")]
    ConfigError(String),

    /// Error closing a channel or a connection
    #[error("failure to close `{0}`")]
    CloseError(String),
}

impl AmqpError {
    /// Returns the retry classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::TransportError(_) => ErrorKind::Transient,
            AmqpError::InvalidQueueName(_) | AmqpError::ConfigError(_) => ErrorKind::Validation,
            _ => ErrorKind::Fatal,
        }
    }

    /// Shorthand for `self.kind() == ErrorKind::Transient`.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_transient() {
        let err = AmqpError::TransportError("connection refused".to_owned());
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.is_transient());
    }

    #[test]
    fn test_protocol_errors_are_fatal() {
        let err = AmqpError::ProtocolError("ACCESS_REFUSED".to_owned());
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert!(!AmqpError::ConnectionError("gave up".to_owned()).is_transient());
    }

    #[test]
    fn test_validation_errors() {
        assert_eq!(
            AmqpError::InvalidQueueName(" ".to_owned()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            AmqpError::ConfigError("host".to_owned()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_error_display() {
        let err = AmqpError::DeclareQueueError("orders".to_owned());
        assert_eq!(err.to_string(), "failure to declare a queue `orders`");
        assert_eq!(
            AmqpError::DeliveryAlreadySettled(4).to_string(),
            "delivery `4` was already settled"
        );
    }
}
