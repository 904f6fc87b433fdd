//! Queue names and declaration.

use queue::QueueClient;

/// Paid checkout jobs waiting to be fulfilled.
pub const ORDER_QUEUE: &str = "order_processing";

/// Transiently failed jobs waiting for a delayed re-publish.
pub const RETRY_QUEUE: &str = "order_retry";

/// Jobs that cannot be fulfilled, waiting to be recorded for operators.
pub const DEAD_LETTER_QUEUE: &str = "order_dead_letter";

/// Every queue of the pipeline, in health-report order.
pub const ALL_QUEUES: [&str; 3] = [ORDER_QUEUE, RETRY_QUEUE, DEAD_LETTER_QUEUE];

/// Declares the pipeline's queues. Safe to call from every worker.
pub async fn declare_all<Q: QueueClient + ?Sized>(client: &Q) -> queue::Result<()> {
    for name in ALL_QUEUES {
        client.declare_queue(name).await?;
    }
    Ok(())
}
