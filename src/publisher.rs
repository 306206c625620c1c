// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Outbound Message Encoding
//!
//! Serializes payloads to JSON and builds the AMQP properties published with
//! them, including OpenTelemetry context propagation headers.

use crate::{errors::AmqpError, otel};
use lapin::{types::ShortString, BasicProperties};
use opentelemetry::Context;
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// The default exchange routes a message to the queue named by its routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// Serializes `message` to a JSON payload.
pub(crate) fn encode<T>(message: &T) -> Result<Vec<u8>, AmqpError>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(message).map_err(|err| {
        error!(error = err.to_string(), "error serializing message");
        AmqpError::SerializePayloadError(err.to_string())
    })
}

/// Properties for a message of type `T` published under `ctx`.
pub(crate) fn properties<T: ?Sized>(ctx: &Context) -> BasicProperties {
    BasicProperties::default()
        .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
        .with_type(ShortString::from(std::any::type_name::<T>()))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(otel::inject_headers(ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Order {
        id: u32,
        qty: u32,
    }

    #[test]
    fn test_encode_json() {
        let payload = encode(&Order { id: 1, qty: 2 }).unwrap();
        assert_eq!(payload, br#"{"id":1,"qty":2}"#.to_vec());
    }

    #[test]
    fn test_properties() {
        let props = properties::<Order>(&Context::new());

        assert_eq!(
            props.content_type().as_ref().map(|c| c.as_str()),
            Some(JSON_CONTENT_TYPE)
        );
        assert!(props.kind().as_ref().unwrap().as_str().ends_with("Order"));
        assert!(props.message_id().is_some());
        assert!(props.headers().is_some());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let first = properties::<Order>(&Context::new());
        let second = properties::<Order>(&Context::new());
        assert_ne!(first.message_id(), second.message_id());
    }
}
