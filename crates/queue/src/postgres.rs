//! PostgreSQL-backed durable queue.
//!
//! Messages are rows in `queue_messages`. A delivery is a lease: `receive`
//! claims the oldest visible row with `FOR UPDATE SKIP LOCKED`, stamps a fresh
//! `lease_id` and pushes `available_at` to the end of the delivery timeout. A
//! crashed worker's message therefore reappears on its own once the lease
//! runs out, and `ack` only deletes while the lease is still live.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::client::QueueClient;
use crate::error::{QueueError, Result};
use crate::message::{ConsumerId, Delivery, MessageId, QueueStats};

/// Connection and leasing settings for [`PostgresQueue`].
#[derive(Debug, Clone)]
pub struct PostgresQueueOptions {
    /// Connection string; without one, a lost pool cannot be re-established.
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Schedule of connection attempts in [`PostgresQueue::connect`] and [`PostgresQueue::channel`].
    pub connect_backoff: Backoff,
    /// Lease length of a delivery.
    pub delivery_timeout: Duration,
    /// A consumer without a heartbeat for this long no longer counts as live.
    pub consumer_ttl: Duration,
}

impl PostgresQueueOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Self::default()
        }
    }

    pub fn with_delivery_timeout(mut self, delivery_timeout: Duration) -> Self {
        self.delivery_timeout = delivery_timeout;
        self
    }

    pub fn with_connect_backoff(mut self, backoff: Backoff) -> Self {
        self.connect_backoff = backoff;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }
}

impl Default for PostgresQueueOptions {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            connect_backoff: Backoff::new(Duration::from_millis(500), Duration::from_secs(30))
                .with_max_attempts(8),
            delivery_timeout: Duration::from_secs(30),
            consumer_ttl: Duration::from_secs(30),
        }
    }
}

struct Inner {
    options: PostgresQueueOptions,
    pool: RwLock<Option<PgPool>>,
    closed: AtomicBool,
}

/// PostgreSQL implementation of [`QueueClient`].
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct PostgresQueue {
    inner: Arc<Inner>,
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

impl PostgresQueue {
    /// Connects to `options.url`, retrying with exponential backoff.
    pub async fn connect(options: PostgresQueueOptions) -> Result<Self> {
        let pool = Self::establish(&options).await?;
        Ok(Self::with_pool(pool, options))
    }

    /// Wraps an existing pool, e.g. one shared with the fulfillment store.
    pub fn with_pool(pool: PgPool, options: PostgresQueueOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                pool: RwLock::new(Some(pool)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates the queue tables.
    pub async fn run_migrations(&self) -> Result<()> {
        let pool = self.channel().await?;
        sqlx::migrate!("../../migrations").run(&pool).await?;
        Ok(())
    }

    /// Returns the live pool, re-establishing it if it was closed underneath us.
    pub async fn channel(&self) -> Result<PgPool> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        if let Some(pool) = self.inner.pool.read().await.as_ref()
            && !pool.is_closed()
        {
            return Ok(pool.clone());
        }

        let mut guard = self.inner.pool.write().await;
        if let Some(pool) = guard.as_ref()
            && !pool.is_closed()
        {
            return Ok(pool.clone());
        }

        tracing::warn!("queue connection lost, reconnecting");
        let pool = Self::establish(&self.inner.options).await?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    async fn establish(options: &PostgresQueueOptions) -> Result<PgPool> {
        let url = options
            .url
            .as_deref()
            .ok_or_else(|| QueueError::ConnectionFailed {
                attempts: 0,
                reason: "no connection url configured".to_string(),
            })?;

        let pool = options
            .connect_backoff
            .retry("queue connect", || {
                PgPoolOptions::new()
                    .max_connections(options.max_connections)
                    .acquire_timeout(options.acquire_timeout)
                    .connect(url)
            })
            .await
            .map_err(|(e, attempts)| QueueError::ConnectionFailed {
                attempts,
                reason: e.to_string(),
            })?;

        tracing::info!("queue connection established");
        Ok(pool)
    }

    fn row_to_delivery(row: &sqlx::postgres::PgRow, lease_id: Uuid) -> Result<Delivery> {
        let delivery_count: i64 = row.try_get("delivery_count")?;
        Ok(Delivery {
            message_id: MessageId::from_uuid(row.try_get("id")?),
            queue: row.try_get("queue")?,
            lease_id,
            delivery_count: u32::try_from(delivery_count).unwrap_or(u32::MAX),
            payload: row.try_get("payload")?,
            enqueued_at: row.try_get::<DateTime<Utc>, _>("enqueued_at")?,
        })
    }

    async fn queue_exists(pool: &PgPool, queue: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM queues WHERE name = $1)")
            .bind(queue)
            .fetch_one(pool)
            .await?;
        Ok(exists)
    }
}

#[async_trait]
impl QueueClient for PostgresQueue {
    async fn declare_queue(&self, queue: &str) -> Result<()> {
        let pool = self.channel().await?;
        sqlx::query("INSERT INTO queues (name) VALUES ($1) ON CONFLICT (name) DO NOTHING")
            .bind(queue)
            .execute(&pool)
            .await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, payload))]
    async fn publish_with_delay(
        &self,
        queue: &str,
        payload: serde_json::Value,
        delay: Option<Duration>,
    ) -> Result<MessageId> {
        let pool = self.channel().await?;
        let id = MessageId::new();

        let result = sqlx::query(
            r#"
            INSERT INTO queue_messages (id, queue, payload, available_at)
            SELECT $1, name, $3, NOW() + ($4::DOUBLE PRECISION * INTERVAL '1 millisecond')
            FROM queues
            WHERE name = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(queue)
        .bind(&payload)
        .bind(millis(delay.unwrap_or_default()))
        .execute(&pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownQueue(queue.to_string()));
        }

        metrics::counter!("queue_messages_published_total", "queue" => queue.to_string())
            .increment(1);
        tracing::debug!(message_id = %id, "message published");
        Ok(id)
    }

    async fn receive(&self, queue: &str) -> Result<Option<Delivery>> {
        let pool = self.channel().await?;
        let lease_id = Uuid::new_v4();

        let row = sqlx::query(
            r#"
            UPDATE queue_messages m
            SET lease_id = $2,
                delivery_count = m.delivery_count + 1,
                available_at = NOW() + ($3::DOUBLE PRECISION * INTERVAL '1 millisecond')
            WHERE m.id = (
                SELECT id FROM queue_messages
                WHERE queue = $1 AND available_at <= NOW()
                ORDER BY enqueued_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING m.id, m.queue, m.payload, m.enqueued_at, m.delivery_count
            "#,
        )
        .bind(queue)
        .bind(lease_id)
        .bind(millis(self.inner.options.delivery_timeout))
        .fetch_optional(&pool)
        .await?;

        match row {
            Some(row) => Self::row_to_delivery(&row, lease_id).map(Some),
            None => {
                if !Self::queue_exists(&pool, queue).await? {
                    return Err(QueueError::UnknownQueue(queue.to_string()));
                }
                Ok(None)
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let pool = self.channel().await?;
        let result = sqlx::query(
            "DELETE FROM queue_messages WHERE id = $1 AND lease_id = $2 AND available_at > NOW()",
        )
        .bind(delivery.message_id.as_uuid())
        .bind(delivery.lease_id)
        .execute(&pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseExpired(delivery.message_id));
        }
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery, requeue: bool) -> Result<()> {
        let pool = self.channel().await?;
        let query = if requeue {
            r#"
            UPDATE queue_messages
            SET lease_id = NULL, available_at = NOW()
            WHERE id = $1 AND lease_id = $2 AND available_at > NOW()
            "#
        } else {
            "DELETE FROM queue_messages WHERE id = $1 AND lease_id = $2 AND available_at > NOW()"
        };

        let result = sqlx::query(query)
            .bind(delivery.message_id.as_uuid())
            .bind(delivery.lease_id)
            .execute(&pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::LeaseExpired(delivery.message_id));
        }
        Ok(())
    }

    async fn queue_stats(&self, queue: &str) -> Result<QueueStats> {
        let pool = self.channel().await?;
        if !Self::queue_exists(&pool, queue).await? {
            return Err(QueueError::UnknownQueue(queue.to_string()));
        }

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM queue_messages
                 WHERE queue = $1 AND (lease_id IS NULL OR available_at <= NOW())) AS message_count,
                (SELECT COUNT(*) FROM queue_consumers
                 WHERE queue = $1
                   AND last_seen_at > NOW() - ($2::DOUBLE PRECISION * INTERVAL '1 millisecond')) AS consumer_count
            "#,
        )
        .bind(queue)
        .bind(millis(self.inner.options.consumer_ttl))
        .fetch_one(&pool)
        .await?;

        let message_count: i64 = row.try_get("message_count")?;
        let consumer_count: i64 = row.try_get("consumer_count")?;
        Ok(QueueStats {
            message_count: u64::try_from(message_count).unwrap_or_default(),
            consumer_count: u64::try_from(consumer_count).unwrap_or_default(),
        })
    }

    async fn register_consumer(&self, queue: &str) -> Result<ConsumerId> {
        let pool = self.channel().await?;
        let consumer = ConsumerId::new();
        let result = sqlx::query(
            "INSERT INTO queue_consumers (id, queue) SELECT $1, name FROM queues WHERE name = $2",
        )
        .bind(consumer.as_uuid())
        .bind(queue)
        .execute(&pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownQueue(queue.to_string()));
        }
        Ok(consumer)
    }

    async fn heartbeat(&self, consumer: ConsumerId) -> Result<()> {
        let pool = self.channel().await?;
        sqlx::query("UPDATE queue_consumers SET last_seen_at = NOW() WHERE id = $1")
            .bind(consumer.as_uuid())
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn deregister_consumer(&self, consumer: ConsumerId) -> Result<()> {
        let pool = self.channel().await?;
        sqlx::query("DELETE FROM queue_consumers WHERE id = $1")
            .bind(consumer.as_uuid())
            .execute(&pool)
            .await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let pool = self.channel().await?;
        sqlx::query("SELECT 1").execute(&pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Some(pool) = self.inner.pool.write().await.take() {
            pool.close().await;
        }
        tracing::info!("queue connection closed");
        Ok(())
    }
}
