//! Message, delivery and queue-statistics types.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a registered consumer loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConsumerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to a consumer under a lease.
///
/// The lease is valid until the delivery timeout elapses. After that the
/// message becomes visible again and [`QueueClient::ack`] with this delivery
/// fails with [`QueueError::LeaseExpired`].
///
/// [`QueueClient::ack`]: crate::QueueClient::ack
/// [`QueueError::LeaseExpired`]: crate::QueueError::LeaseExpired
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub message_id: MessageId,
    pub queue: String,
    pub lease_id: Uuid,
    /// How many times the message has been handed out, this delivery included.
    pub delivery_count: u32,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
}

impl Delivery {
    /// Deserializes the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Returns true if an earlier delivery of this message was not acknowledged.
    pub fn is_redelivery(&self) -> bool {
        self.delivery_count > 1
    }
}

/// Depth and consumer count of one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Messages not currently leased, delayed ones included.
    pub message_count: u64,
    /// Consumers whose heartbeat is still fresh.
    pub consumer_count: u64,
}
