// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Handlers
//!
//! The callback side of a subscription. Any async closure
//! `Fn(T, MessageContext) -> impl Future<Output = Result<(), HandlerError>>`
//! is a handler; types that need state can implement [`MessageHandler`]
//! directly.

use crate::context::MessageContext;
use async_trait::async_trait;
use std::future::Future;

/// Error returned by a handler. Any error type can be boxed into it with `?`.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Processes messages of type `T` received from a queue.
#[async_trait]
pub trait MessageHandler<T>: Send + Sync {
    /// Handles one parsed message.
    ///
    /// # Parameters
    /// * `message` - The delivery payload, already parsed as `T`
    /// * `ctx` - Context of the delivery, used to settle it explicitly
    ///
    /// # Returns
    /// `Ok(())` when the message was processed. On manual-ack subscriptions
    /// an error (or a panic) requeues the delivery unless `ctx` was already
    /// used to settle it.
    async fn handle(&self, message: T, ctx: MessageContext) -> Result<(), HandlerError>;
}

#[async_trait]
impl<T, F, Fut> MessageHandler<T> for F
where
    T: Send + 'static,
    F: Fn(T, MessageContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: T, ctx: MessageContext) -> Result<(), HandlerError> {
        (self)(message, ctx).await
    }
}
