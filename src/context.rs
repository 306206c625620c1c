// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Context
//!
//! Per-delivery acknowledgement handle passed to message handlers.

use crate::{errors::AmqpError, transport::BrokerChannel};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::debug;

/// Handle used to settle exactly one delivery.
///
/// The context borrows the subscription's channel and is bound to a single
/// delivery tag. The first `ack` or `nack` settles the delivery; later calls
/// return [`AmqpError::DeliveryAlreadySettled`] without reaching the broker.
///
/// Contexts created for an auto-ack subscription start out settled, since the
/// broker acknowledged the delivery when it sent it. `ack` and `nack` are then
/// no-ops.
pub struct MessageContext {
    channel: Arc<dyn BrokerChannel>,
    delivery_tag: u64,
    redelivered: bool,
    auto_ack: bool,
    settled: Arc<AtomicBool>,
}

impl MessageContext {
    pub(crate) fn new(
        channel: Arc<dyn BrokerChannel>,
        delivery_tag: u64,
        redelivered: bool,
        auto_ack: bool,
    ) -> Self {
        MessageContext {
            channel,
            delivery_tag,
            redelivered,
            auto_ack,
            settled: Arc::new(AtomicBool::new(auto_ack)),
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Whether the broker delivered this message before.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Acknowledges the delivery.
    pub async fn ack(&self) -> Result<(), AmqpError> {
        if self.auto_ack {
            debug!(delivery_tag = self.delivery_tag, "ack skipped, delivery was auto-acked");
            return Ok(());
        }

        self.settle()?;
        self.channel.basic_ack(self.delivery_tag).await
    }

    /// Rejects the delivery, putting it back on the queue when `requeue` is set.
    /// Without requeue the broker dead-letters or drops it.
    pub async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        if self.auto_ack {
            debug!(delivery_tag = self.delivery_tag, "nack skipped, delivery was auto-acked");
            return Ok(());
        }

        self.settle()?;
        self.channel.basic_nack(self.delivery_tag, requeue).await
    }

    /// Shared view of the settled flag, kept by the consumer while the handler
    /// owns the context.
    pub(crate) fn settled_flag(&self) -> Arc<AtomicBool> {
        self.settled.clone()
    }

    fn settle(&self) -> Result<(), AmqpError> {
        if self.settled.swap(true, Ordering::AcqRel) {
            return Err(AmqpError::DeliveryAlreadySettled(self.delivery_tag));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockBrokerChannel;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_ack_targets_delivery_tag() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_basic_ack()
            .with(eq(42))
            .times(1)
            .returning(|_| Ok(()));

        let ctx = MessageContext::new(Arc::new(channel), 42, false, false);
        assert!(!ctx.is_settled());

        ctx.ack().await.unwrap();
        assert!(ctx.is_settled());
    }

    #[tokio::test]
    async fn test_nack_passes_requeue_flag() {
        let mut channel = MockBrokerChannel::new();
        channel
            .expect_basic_nack()
            .with(eq(7), eq(true))
            .times(1)
            .returning(|_, _| Ok(()));

        let ctx = MessageContext::new(Arc::new(channel), 7, true, false);
        assert!(ctx.redelivered());
        ctx.nack(true).await.unwrap();
    }

    #[tokio::test]
    async fn test_second_settlement_is_rejected() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_basic_ack().times(1).returning(|_| Ok(()));
        channel.expect_basic_nack().never();

        let ctx = MessageContext::new(Arc::new(channel), 3, false, false);
        ctx.ack().await.unwrap();

        assert_eq!(ctx.ack().await, Err(AmqpError::DeliveryAlreadySettled(3)));
        assert_eq!(
            ctx.nack(false).await,
            Err(AmqpError::DeliveryAlreadySettled(3))
        );
    }

    #[tokio::test]
    async fn test_auto_ack_context_never_reaches_broker() {
        let mut channel = MockBrokerChannel::new();
        channel.expect_basic_ack().never();
        channel.expect_basic_nack().never();

        let ctx = MessageContext::new(Arc::new(channel), 1, false, true);
        assert!(ctx.is_settled());
        ctx.ack().await.unwrap();
        ctx.nack(true).await.unwrap();
    }
}
