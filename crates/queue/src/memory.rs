//! In-memory queue for tests and single-process runs.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::client::QueueClient;
use crate::error::{QueueError, Result};
use crate::message::{ConsumerId, Delivery, MessageId, QueueStats};

/// A publish as observed by the in-memory queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub queue: String,
    pub message_id: MessageId,
    pub payload: serde_json::Value,
    pub delay: Option<Duration>,
}

#[derive(Debug)]
struct StoredMessage {
    id: MessageId,
    payload: serde_json::Value,
    enqueued_at: DateTime<Utc>,
    /// Visibility deadline: end of the publish delay or of the current lease.
    available_at: Instant,
    delivery_count: u32,
    lease_id: Option<Uuid>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.available_at <= now
    }

    fn holds_lease(&self, lease_id: Uuid, now: Instant) -> bool {
        self.lease_id == Some(lease_id) && now < self.available_at
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    consumers: HashSet<ConsumerId>,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, QueueState>,
    consumer_queues: HashMap<ConsumerId, String>,
    published: Vec<PublishedMessage>,
}

/// In-memory [`QueueClient`] with the same leasing rules as [`PostgresQueue`].
///
/// Every publish is also appended to a log readable with
/// [`published`](Self::published), which lets tests assert on routing and
/// delays without consuming.
///
/// [`PostgresQueue`]: crate::PostgresQueue
#[derive(Clone)]
pub struct InMemoryQueue {
    state: Arc<RwLock<State>>,
    delivery_timeout: Duration,
    unavailable: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
}

impl InMemoryQueue {
    /// Creates an empty queue with a 30 second delivery timeout.
    pub fn new() -> Self {
        Self::with_delivery_timeout(Duration::from_secs(30))
    }

    pub fn with_delivery_timeout(delivery_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            delivery_timeout,
            unavailable: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every operation fail with [`QueueError::Unavailable`] while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns every publish to `queue`, oldest first.
    pub async fn published(&self, queue: &str) -> Vec<PublishedMessage> {
        self.state
            .read()
            .await
            .published
            .iter()
            .filter(|m| m.queue == queue)
            .cloned()
            .collect()
    }

    /// Returns the payloads currently stored in `queue`, leased ones included.
    pub async fn pending(&self, queue: &str) -> Vec<serde_json::Value> {
        self.state
            .read()
            .await
            .queues
            .get(queue)
            .map(|q| q.messages.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Makes delayed messages visible now. Leased messages are left alone.
    pub async fn release_delayed(&self) {
        let now = Instant::now();
        let mut state = self.state.write().await;
        for queue in state.queues.values_mut() {
            for message in queue.messages.iter_mut().filter(|m| m.lease_id.is_none()) {
                message.available_at = message.available_at.min(now);
            }
        }
    }

    fn check(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Unavailable(
                "in-memory queue marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        self.check()?;
        self.state
            .write()
            .await
            .queues
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn publish_with_delay(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<MessageId> {
        self.check()?;
        let mut state = self.state.write().await;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let id = MessageId::new();
        q.messages.push(StoredMessage {
            id,
            payload: payload.clone(),
            enqueued_at: Utc::now(),
            available_at: Instant::now() + delay.unwrap_or_default(),
            delivery_count: 0,
            lease_id: None,
        });
        state.published.push(PublishedMessage {
            queue: queue.to_string(),
            message_id: id,
            payload,
            delay,
        });

        metrics::counter!("queue_messages_published_total", "queue" => queue.to_string())
            .increment(1);
        Ok(id)
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state.write().await;
        let q = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let Some(message) = q
            .messages
            .iter_mut()
            .filter(|m| m.is_visible(now))
            .min_by_key(|m| m.enqueued_at)
        else {
            return Ok(None);
        };

        let lease_id = Uuid::new_v4();
        message.lease_id = Some(lease_id);
        message.delivery_count += 1;
        message.available_at = now + self.delivery_timeout;

        Ok(Some(Delivery {
            message_id: message.id,
            queue: queue.to_string(),
            lease_id,
            delivery_count: message.delivery_count,
            payload: message.payload.clone(),
            enqueued_at: message.enqueued_at,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state.write().await;
        let q = state
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?;

        let position = q
            .messages
            .iter()
            .position(|m| m.id == delivery.message_id && m.holds_lease(delivery.lease_id, now))
            .ok_or(QueueError::LeaseExpired(delivery.message_id))?;
        q.messages.remove(position);
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state.write().await;
        let q = state
            .queues
            .get_mut(&delivery.queue)
            .ok_or_else(|| QueueError::UnknownQueue(delivery.queue.clone()))?;

        let position = q
            .messages
            .iter()
            .position(|m| m.id == delivery.message_id && m.holds_lease(delivery.lease_id, now))
            .ok_or(QueueError::LeaseExpired(delivery.message_id))?;

        if requeue {
            let message = &mut q.messages[position];
            message.lease_id = None;
            message.available_at = now;
        } else {
            q.messages.remove(position);
        }
        Ok(())
    }

    async fn queue_stats(&self, queue: &str) -> Result<QueueStats> {
        self.check()?;
        let now = Instant::now();
        let state = self.state.read().await;
        let q = state
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let message_count = q
            .messages
            .iter()
            .filter(|m| m.lease_id.is_none() || m.is_visible(now))
            .count();
        Ok(QueueStats {
            message_count: message_count as u64,
            consumer_count: q.consumers.len() as u64,
        })
    }

    async fn register_consumer(&self, queue: &str) -> Result<ConsumerId> {
        self.check()?;
        let mut state = self.state.write().await;
        let consumer = ConsumerId::new();
        state
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?
            .consumers
            .insert(consumer);
        state.consumer_queues.insert(consumer, queue.to_string());
        Ok(consumer)
    }

    async fn heartbeat(&self, _consumer: ConsumerId) -> Result<()> {
        // Consumers stay registered until deregistered.
        self.check()
    }

    async fn deregister_consumer(&self, consumer: ConsumerId) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(queue) = state.consumer_queues.remove(&consumer)
            && let Some(q) = state.queues.get_mut(&queue)
        {
            q.consumers.remove(&consumer);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
