// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Client
//!
//! Publish/subscribe façade over a single shared connection. Every
//! subscription owns a dedicated channel and consumer; publishing opens a
//! short-lived channel per message. Messages are JSON encoded and routed
//! through the default exchange straight to the queue they name.
//!
//! ```no_run
//! use rabbitmq_client::{
//!     client::RabbitMQClient, context::MessageContext, handler::HandlerError,
//!     options::ConnectionOptions,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Order {
//!     id: u32,
//!     qty: u32,
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let client = RabbitMQClient::from_options(ConnectionOptions::from_env()?);
//!
//! client
//!     .subscribe("orders", |order: Order, _ctx: MessageContext| async move {
//!         println!("received {:?}", order);
//!         Ok::<(), HandlerError>(())
//!     })
//!     .await?;
//!
//! client.publish("orders", &Order { id: 1, qty: 2 }).await?;
//! # Ok(())
//! # }
//! ```

use crate::{
    connection::ConnectionManager,
    consumer::{spawn_dispatcher, AckMode},
    errors::AmqpError,
    handler::MessageHandler,
    options::ConnectionOptions,
    publisher::{self, DEFAULT_EXCHANGE},
    queue::default_queue,
    transport::BrokerChannel,
};
use opentelemetry::Context;
use serde::{de::DeserializeOwned, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, RwLock},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// An active consumer registered on its own channel.
struct Subscription {
    channel: Arc<dyn BrokerChannel>,
    consumer_tag: String,
    dispatcher: JoinHandle<()>,
}

impl Subscription {
    /// Cancels the consumer and closes its channel. Both steps are attempted;
    /// the first failure is returned.
    async fn stop(self) -> Result<(), AmqpError> {
        let cancelled = self.channel.basic_cancel(&self.consumer_tag).await;
        let closed = self.channel.close().await;
        self.dispatcher.abort();

        cancelled.and(closed)
    }
}

pub struct RabbitMQClient {
    connection_manager: Arc<ConnectionManager>,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    // Held from the duplicate check until the new subscription is registered.
    subscribing: Mutex<()>,
}

impl RabbitMQClient {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        RabbitMQClient {
            connection_manager,
            subscriptions: RwLock::new(HashMap::default()),
            subscribing: Mutex::new(()),
        }
    }

    /// Creates a client with its own lapin-backed [`ConnectionManager`].
    pub fn from_options(options: ConnectionOptions) -> Self {
        Self::new(Arc::new(ConnectionManager::new(options)))
    }

    pub fn connection_manager(&self) -> &Arc<ConnectionManager> {
        &self.connection_manager
    }

    /// Subscribes `handler` to `queue_name` with broker-side auto-ack.
    ///
    /// See [`RabbitMQClient::subscribe_with_mode`].
    pub async fn subscribe<T, H>(&self, queue_name: &str, handler: H) -> Result<(), AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        self.subscribe_with_mode(queue_name, handler, AckMode::default())
            .await
    }

    /// Declares `queue_name` and starts delivering its messages, parsed as
    /// `T`, to `handler`.
    ///
    /// An empty queue name or a queue that already has a subscription is
    /// logged and ignored. Concurrent subscribes are serialized, so a queue
    /// is never registered with the broker twice. Connection, channel,
    /// declaration and consumer failures are returned.
    pub async fn subscribe_with_mode<T, H>(
        &self,
        queue_name: &str,
        handler: H,
        mode: AckMode,
    ) -> Result<(), AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
        H: MessageHandler<T> + 'static,
    {
        if queue_name.trim().is_empty() {
            error!("queue name cannot be empty");
            return Ok(());
        }

        let _subscribing = self.subscribing.lock().await;

        if self.subscriptions.read().await.contains_key(queue_name) {
            info!(queue = queue_name, "subscription already exists, skipping");
            return Ok(());
        }

        let connection = self.connection_manager.get_connection().await?;
        let channel = connection.create_channel().await?;

        if let Err(err) = channel.queue_declare(&default_queue(queue_name)).await {
            self.discard_channel(&channel).await;
            return Err(err);
        }

        let consumer_tag = format!("{}-{}", queue_name, Uuid::new_v4());
        let deliveries = match channel
            .basic_consume(queue_name, &consumer_tag, mode.is_auto())
            .await
        {
            Ok(deliveries) => deliveries,
            Err(err) => {
                self.discard_channel(&channel).await;
                return Err(err);
            }
        };

        let dispatcher = spawn_dispatcher::<T>(
            queue_name.to_owned(),
            channel.clone(),
            deliveries,
            Arc::new(handler),
            mode,
            self.connection_manager.options().max_concurrent_deliveries,
        );

        let subscription = Subscription {
            channel,
            consumer_tag,
            dispatcher,
        };

        self.subscriptions
            .write()
            .await
            .insert(queue_name.to_owned(), subscription);

        debug!(queue = queue_name, mode = ?mode, "subscribed");
        Ok(())
    }

    /// Cancels the subscription on `queue_name` and closes its channel.
    /// Unsubscribing from a queue without a subscription only logs a warning.
    pub async fn unsubscribe(&self, queue_name: &str) -> Result<(), AmqpError> {
        let Some(subscription) = self.subscriptions.write().await.remove(queue_name) else {
            warn!(queue = queue_name, "no subscription found for queue");
            return Ok(());
        };

        subscription.stop().await.inspect_err(|err| {
            error!(error = err.to_string(), queue = queue_name, "failure to unsubscribe");
        })?;

        debug!(queue = queue_name, "unsubscribed");
        Ok(())
    }

    /// Publishes `message` as JSON to `queue_name` through the default
    /// exchange, declaring the queue first.
    ///
    /// Publishing is fire-and-forget: no publisher confirms are requested.
    pub async fn publish<T>(&self, queue_name: &str, message: &T) -> Result<(), AmqpError>
    where
        T: Serialize + ?Sized,
    {
        if queue_name.trim().is_empty() {
            error!("queue name cannot be empty");
            return Err(AmqpError::InvalidQueueName(queue_name.to_owned()));
        }

        let payload = publisher::encode(message)?;

        let connection = self.connection_manager.get_connection().await?;
        let channel = connection.create_channel().await?;

        let result = async {
            channel.queue_declare(&default_queue(queue_name)).await?;
            channel
                .basic_publish(
                    DEFAULT_EXCHANGE,
                    queue_name,
                    &payload,
                    publisher::properties::<T>(&Context::current()),
                )
                .await
        }
        .await;

        if let Err(err) = channel.close().await {
            warn!(
                error = err.to_string(),
                queue = queue_name,
                "failure to close publish channel"
            );
        }

        result?;
        debug!(queue = queue_name, size = payload.len(), "message published");
        Ok(())
    }

    /// Queue names with an active subscription.
    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().await.keys().cloned().collect()
    }

    pub async fn is_subscribed(&self, queue_name: &str) -> bool {
        self.subscriptions.read().await.contains_key(queue_name)
    }

    /// Stops every subscription and closes the connection.
    pub async fn shutdown(&self) -> Result<(), AmqpError> {
        let drained: Vec<(String, Subscription)> =
            self.subscriptions.write().await.drain().collect();

        let mut first_error = None;
        for (queue, subscription) in drained {
            if let Err(err) = subscription.stop().await {
                error!(error = err.to_string(), queue = queue.as_str(), "failure to unsubscribe");
                first_error.get_or_insert(err);
            }
        }

        if let Err(err) = self.connection_manager.close().await {
            first_error.get_or_insert(err);
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!("rabbitmq client shut down");
                Ok(())
            }
        }
    }

    async fn discard_channel(&self, channel: &Arc<dyn BrokerChannel>) {
        if let Err(err) = channel.close().await {
            warn!(error = err.to_string(), "failure to close channel");
        }
    }
}
