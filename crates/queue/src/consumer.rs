//! Long-running consume loop with manual acknowledgment.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::backoff::Backoff;
use crate::client::QueueClient;
use crate::error::{QueueError, Result};
use crate::message::{ConsumerId, Delivery};

/// What the consume loop does with a handled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerDecision {
    /// Processing finished; delete the message.
    Ack,
    /// Give the message back for another delivery.
    Requeue,
    /// Drop the message without processing it again.
    Discard,
}

/// Processes one delivery at a time.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, delivery: &Delivery) -> HandlerDecision;
}

/// Tuning of the consume loop.
#[derive(Debug, Clone)]
pub struct ConsumeOptions {
    /// Wait between polls of an empty queue.
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Pause schedule after broker errors.
    pub error_backoff: Backoff,
}

impl Default for ConsumeOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(5),
            error_backoff: Backoff::new(Duration::from_millis(100), Duration::from_secs(5)),
        }
    }
}

/// Counters of one consume loop run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeSummary {
    pub acked: u64,
    pub requeued: u64,
    pub discarded: u64,
    pub panicked: u64,
}

/// Consumes `queue` with `handler` until `shutdown` turns true or the client is closed.
///
/// A handler that panics is treated as a crash: the message is requeued so it
/// is delivered again, with a higher delivery count. Broker errors pause the
/// loop with exponential backoff instead of ending it.
pub async fn consume<Q, H>(
    client: &Q,
    queue: &str,
    handler: &H,
    options: &ConsumeOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ConsumeSummary>
where
    Q: QueueClient + ?Sized,
    H: MessageHandler + ?Sized,
{
    let mut summary = ConsumeSummary::default();
    let Some(consumer) = register(client, queue, options, &mut shutdown).await? else {
        return Ok(summary);
    };
    tracing::info!(queue, %consumer, "consumer started");

    let mut last_heartbeat = Instant::now();
    let mut failures: u32 = 0;

    while !*shutdown.borrow() {
        if last_heartbeat.elapsed() >= options.heartbeat_interval {
            if let Err(e) = client.heartbeat(consumer).await {
                tracing::warn!(queue, %consumer, error = %e, "heartbeat failed");
            }
            last_heartbeat = Instant::now();
        }

        let delivery = match client.receive(queue).await {
            Ok(Some(delivery)) => {
                failures = 0;
                delivery
            }
            Ok(None) => {
                failures = 0;
                if wait_or_shutdown(options.poll_interval, &mut shutdown).await {
                    break;
                }
                continue;
            }
            Err(QueueError::Closed) => break,
            Err(e) => {
                let delay = options.error_backoff.delay_for(failures);
                failures = failures.saturating_add(1);
                tracing::warn!(
                    queue,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "receive failed, backing off"
                );
                if wait_or_shutdown(delay, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        let decision = match AssertUnwindSafe(handler.handle(&delivery))
            .catch_unwind()
            .await
        {
            Ok(decision) => decision,
            Err(panic) => {
                let panic_msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::error!(
                    queue,
                    message_id = %delivery.message_id,
                    delivery_count = delivery.delivery_count,
                    panic = %panic_msg,
                    "message handler panicked, requeueing"
                );
                metrics::counter!("queue_handler_panics_total", "queue" => queue.to_string())
                    .increment(1);
                summary.panicked += 1;
                HandlerDecision::Requeue
            }
        };

        let settled = match decision {
            HandlerDecision::Ack => client.ack(&delivery).await,
            HandlerDecision::Requeue => client.reject(&delivery, true).await,
            HandlerDecision::Discard => client.reject(&delivery, false).await,
        };

        match settled {
            Ok(()) => match decision {
                HandlerDecision::Ack => summary.acked += 1,
                HandlerDecision::Requeue => summary.requeued += 1,
                HandlerDecision::Discard => summary.discarded += 1,
            },
            // Redelivered elsewhere; the handler is idempotent.
            Err(QueueError::LeaseExpired(message_id)) => {
                tracing::warn!(queue, %message_id, ?decision, "lease expired before settlement");
            }
            Err(e) => {
                tracing::warn!(
                    queue,
                    message_id = %delivery.message_id,
                    ?decision,
                    error = %e,
                    "failed to settle delivery, it will be redelivered"
                );
            }
        }
    }

    if let Err(e) = client.deregister_consumer(consumer).await {
        tracing::debug!(queue, %consumer, error = %e, "deregistering consumer failed");
    }
    tracing::info!(
        queue,
        %consumer,
        acked = summary.acked,
        requeued = summary.requeued,
        discarded = summary.discarded,
        "consumer stopped"
    );
    Ok(summary)
}

/// Registers the consumer, retrying transient failures. `None` means shutdown came first.
async fn register<Q>(
    client: &Q,
    queue: &str,
    options: &ConsumeOptions,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Option<ConsumerId>>
where
    Q: QueueClient + ?Sized,
{
    let mut failures: u32 = 0;
    loop {
        if *shutdown.borrow() {
            return Ok(None);
        }
        match client.register_consumer(queue).await {
            Ok(consumer) => return Ok(Some(consumer)),
            Err(e) if e.is_transient() => {
                let delay = options.error_backoff.delay_for(failures);
                failures = failures.saturating_add(1);
                tracing::warn!(queue, error = %e, "consumer registration failed, retrying");
                if wait_or_shutdown(delay, shutdown).await {
                    return Ok(None);
                }
            }
            Err(e) => return Err(e),
        }
    }
}

/// Sleeps for `delay`; returns true if shutdown was signalled meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        () = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
