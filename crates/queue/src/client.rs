//! The producer/consumer contract of the queue substrate.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;
use crate::message::{ConsumerId, Delivery, MessageId, QueueStats};

/// Durable queue with leased, manually acknowledged delivery.
///
/// Delivery is at-least-once: a message stays stored until a consumer
/// acknowledges it under a live lease, so handlers must be idempotent.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Creates the queue if it does not exist yet.
    async fn declare_queue(&self, queue: &str) -> Result<()>;

    /// Stores a message durably. With a delay, it stays invisible until the delay elapses.
    async fn publish_with_delay(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<MessageId>;

    /// Leases the oldest visible message, if any.
    async fn receive(&self, queue: &str) -> Result<Option<Delivery>>;

    /// Deletes the message. Fails with `LeaseExpired` once the lease ran out.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Gives the message back (`requeue`) or drops it.
    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<()>;

    async fn queue_stats(&self, queue: &str) -> Result<QueueStats>;

    /// Registers a live consumer so it shows up in [`QueueStats::consumer_count`].
    async fn register_consumer(&self, queue: &str) -> Result<ConsumerId>;

    async fn heartbeat(&self, consumer: ConsumerId) -> Result<()>;

    async fn deregister_consumer(&self, consumer: ConsumerId) -> Result<()>;

    /// Connectivity probe.
    async fn ping(&self) -> Result<()>;

    /// Closes the client; later calls fail with `Closed`.
    async fn close(&self) -> Result<()>;
}

/// Typed publishing helpers for every [`QueueClient`].
#[async_trait]
pub trait QueueClientExt: QueueClient {
    /// Serializes `payload` and publishes it for immediate delivery.
    async fn publish<T>(&self, queue: &str, payload: &T) -> Result<MessageId>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(payload)?;
        self.publish_with_delay(queue, value, None).await
    }

    /// Serializes `payload` and publishes it to become visible after `delay`.
    async fn publish_delayed<T>(&self, queue: &str, payload: &T, delay: Duration) -> Result<MessageId>
    where
        T: Serialize + Sync + ?Sized,
    {
        let value = serde_json::to_value(payload)?;
        self.publish_with_delay(queue, value, Some(delay)).await
    }
}

impl<Q: QueueClient + ?Sized> QueueClientExt for Q {}
