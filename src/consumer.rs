// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module drives each delivery through its lifecycle: parse the JSON
//! payload, hand it to the subscriber's handler together with a
//! [`MessageContext`], then settle it according to the subscription's
//! [`AckMode`] and the handler's result.
//!
//! | mode   | outcome                  | client action          |
//! |--------|--------------------------|------------------------|
//! | manual | payload not parseable    | nack, no requeue       |
//! | auto   | payload not parseable    | nothing (dropped)      |
//! | manual | handler ok               | ack                    |
//! | manual | handler error or panic   | nack, requeue          |
//! | manual | handler settled itself   | nothing                |
//! | auto   | anything                 | nothing (broker acked) |

use crate::{
    context::MessageContext,
    errors::AmqpError,
    handler::MessageHandler,
    otel,
    transport::{BrokerChannel, Delivery, DeliveryStream},
};
use futures_util::{FutureExt, StreamExt};
use opentelemetry::{
    global::{self, BoxedTracer},
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{
    any::Any,
    borrow::Cow,
    panic::AssertUnwindSafe,
    sync::{atomic::Ordering, Arc},
};
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, error, warn};

/// How deliveries of a subscription are acknowledged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AckMode {
    /// The broker acknowledges each delivery when it sends it. A handler
    /// failure cannot be compensated: the message is gone.
    #[default]
    Auto,
    /// The client acknowledges after the handler succeeds and requeues when
    /// it fails, unless the handler settled the delivery itself.
    Manual,
}

impl AckMode {
    pub fn is_auto(&self) -> bool {
        matches!(self, AckMode::Auto)
    }
}

/// What happened to a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryOutcome {
    /// Handler succeeded and the client acknowledged.
    Acked,
    /// Handler failed and the client requeued the delivery.
    Requeued,
    /// Payload could not be parsed; rejected without requeue.
    Rejected,
    /// The handler acknowledged or rejected the delivery itself.
    SettledByHandler,
    /// Handler succeeded on an auto-ack subscription.
    AutoAcked,
    /// Auto-ack delivery that could not be parsed or whose handler failed.
    Dropped,
}

/// Parses a JSON payload. A literal `null` counts as a failure.
pub(crate) fn decode<T>(data: &[u8]) -> Result<T, AmqpError>
where
    T: DeserializeOwned,
{
    if data.trim_ascii() == b"null" {
        return Err(AmqpError::ParsePayloadError("null payload".to_owned()));
    }

    serde_json::from_slice(data).map_err(|err| AmqpError::ParsePayloadError(err.to_string()))
}

/// Processes one delivery from `queue`.
pub(crate) async fn consume<T>(
    tracer: &BoxedTracer,
    queue: &str,
    delivery: Delivery,
    channel: Arc<dyn BrokerChannel>,
    handler: &dyn MessageHandler<T>,
    mode: AckMode,
) -> Result<DeliveryOutcome, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
{
    let (_ctx, mut span) = otel::new_span(&delivery.properties, tracer, queue);
    let delivery_tag = delivery.delivery_tag;

    debug!(
        queue,
        delivery_tag,
        redelivered = delivery.redelivered,
        size = delivery.data.len(),
        "received"
    );

    let context = MessageContext::new(
        channel.clone(),
        delivery_tag,
        delivery.redelivered,
        mode.is_auto(),
    );

    let message = match decode::<T>(&delivery.data) {
        Ok(message) => message,
        Err(err) => {
            warn!(
                error = err.to_string(),
                queue, delivery_tag, "removing message from queue - reason: unparseable payload"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("unparseable payload"),
            });

            if let Err(e) = context.nack(false).await {
                span.record_error(&e);
                return Err(e);
            }

            return Ok(match mode {
                AckMode::Auto => DeliveryOutcome::Dropped,
                AckMode::Manual => DeliveryOutcome::Rejected,
            });
        }
    };

    let settled = context.settled_flag();
    let result = AssertUnwindSafe(handler.handle(message, context))
        .catch_unwind()
        .await;

    let failure = match result {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err.to_string()),
        Err(panic) => Some(panic_message(panic.as_ref())),
    };

    let Some(reason) = failure else {
        debug!(queue, delivery_tag, "message successfully processed");
        span.set_status(Status::Ok);

        if mode.is_auto() {
            return Ok(DeliveryOutcome::AutoAcked);
        }

        if settled.swap(true, Ordering::AcqRel) {
            return Ok(DeliveryOutcome::SettledByHandler);
        }

        return match channel.basic_ack(delivery_tag).await {
            Err(e) => {
                span.record_error(&e);
                span.set_status(Status::Error {
                    description: Cow::from("error to ack msg"),
                });
                Err(e)
            }
            _ => Ok(DeliveryOutcome::Acked),
        };
    };

    error!(error = reason.as_str(), queue, delivery_tag, "error whiling handling msg");
    span.set_status(Status::Error {
        description: Cow::from(reason),
    });

    if mode.is_auto() {
        return Ok(DeliveryOutcome::Dropped);
    }

    if settled.swap(true, Ordering::AcqRel) {
        return Ok(DeliveryOutcome::SettledByHandler);
    }

    warn!(queue, delivery_tag, "requeuing message");
    match channel.basic_nack(delivery_tag, true).await {
        Err(e) => {
            span.record_error(&e);
            Err(e)
        }
        _ => Ok(DeliveryOutcome::Requeued),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        return format!("handler panicked: {}", msg);
    }

    if let Some(msg) = panic.downcast_ref::<String>() {
        return format!("handler panicked: {}", msg);
    }

    "handler panicked".to_owned()
}

/// Spawns the task reading `deliveries`. Each delivery is processed on its
/// own task; at most `max_concurrent` of them run at once.
pub(crate) fn spawn_dispatcher<T>(
    queue: String,
    channel: Arc<dyn BrokerChannel>,
    mut deliveries: DeliveryStream,
    handler: Arc<dyn MessageHandler<T>>,
    mode: AckMode,
    max_concurrent: usize,
) -> JoinHandle<()>
where
    T: DeserializeOwned + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(max_concurrent));

    tokio::spawn(async move {
        while let Some(result) = deliveries.next().await {
            match result {
                Ok(delivery) => {
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };

                    let queue = queue.clone();
                    let channel = channel.clone();
                    let handler = handler.clone();

                    tokio::spawn(async move {
                        let _permit = permit;
                        let tracer = global::tracer("amqp consumer");

                        match consume::<T>(&tracer, &queue, delivery, channel, handler.as_ref(), mode)
                            .await
                        {
                            Ok(outcome) => {
                                debug!(queue = queue.as_str(), ?outcome, "delivery processed")
                            }
                            Err(err) => error!(
                                error = err.to_string(),
                                queue = queue.as_str(),
                                "error consume msg"
                            ),
                        }
                    });
                }

                Err(err) => error!(
                    error = err.to_string(),
                    queue = queue.as_str(),
                    "errors consume msg"
                ),
            }
        }

        debug!(queue = queue.as_str(), "consumer stream closed");
    })
}
