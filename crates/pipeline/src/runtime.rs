//! Worker runtime: consumer loops for all three queues.

use std::sync::Arc;

use queue::{ConsumeOptions, MessageHandler, QueueClient, consume};
use store::FulfillmentStore;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dead_letter::DeadLetterConsumer;
use crate::error::PipelineError;
use crate::order_consumer::OrderQueueConsumer;
use crate::queues::{DEAD_LETTER_QUEUE, ORDER_QUEUE, RETRY_QUEUE, declare_all};
use crate::retry::{RetryPolicy, RetryQueueConsumer};

/// Consumer counts and tuning of a worker process.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub order_consumers: usize,
    pub retry_consumers: usize,
    pub dead_letter_consumers: usize,
    pub retry_policy: RetryPolicy,
    /// Deliveries of one message before it is dead-lettered as fatal.
    pub max_deliveries: u32,
    pub consume: ConsumeOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            order_consumers: 4,
            retry_consumers: 1,
            dead_letter_consumers: 1,
            retry_policy: RetryPolicy::default(),
            max_deliveries: 5,
            consume: ConsumeOptions::default(),
        }
    }
}

/// Running consumer loops. Dropping it does not stop them; call [`Pipeline::shutdown`].
pub struct Pipeline {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Declares the queues and starts every consumer loop.
    pub async fn spawn<S, Q>(
        store: Arc<S>,
        queue: Arc<Q>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError>
    where
        S: FulfillmentStore + 'static,
        Q: QueueClient + ?Sized + 'static,
    {
        declare_all(queue.as_ref()).await?;

        let (shutdown, rx) = watch::channel(false);
        let mut tasks = Vec::new();

        let order_handler = Arc::new(OrderQueueConsumer::new(
            store.clone(),
            queue.clone(),
            config.max_deliveries,
        ));
        let retry_handler = Arc::new(RetryQueueConsumer::new(queue.clone(), config.retry_policy));
        let dead_letter_handler = Arc::new(DeadLetterConsumer::new(store));

        for _ in 0..config.order_consumers {
            tasks.push(spawn_loop(
                queue.clone(),
                ORDER_QUEUE,
                order_handler.clone(),
                config.consume.clone(),
                rx.clone(),
            ));
        }
        for _ in 0..config.retry_consumers {
            tasks.push(spawn_loop(
                queue.clone(),
                RETRY_QUEUE,
                retry_handler.clone(),
                config.consume.clone(),
                rx.clone(),
            ));
        }
        for _ in 0..config.dead_letter_consumers {
            tasks.push(spawn_loop(
                queue.clone(),
                DEAD_LETTER_QUEUE,
                dead_letter_handler.clone(),
                config.consume.clone(),
                rx.clone(),
            ));
        }

        tracing::info!(
            order_consumers = config.order_consumers,
            retry_consumers = config.retry_consumers,
            dead_letter_consumers = config.dead_letter_consumers,
            "pipeline started"
        );
        Ok(Self { shutdown, tasks })
    }

    /// Signals every loop to stop and waits for in-flight messages to settle.
    pub async fn shutdown(self) {
        // Receivers only vanish once every loop has exited.
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "consumer task failed");
            }
        }
        tracing::info!("pipeline stopped");
    }
}

fn spawn_loop<Q, H>(
    queue: Arc<Q>,
    name: &'static str,
    handler: Arc<H>,
    options: ConsumeOptions,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    Q: QueueClient + ?Sized + 'static,
    H: MessageHandler + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = consume(queue.as_ref(), name, handler.as_ref(), &options, shutdown).await {
            tracing::error!(queue = name, error = %e, "consumer loop ended with error");
        }
    })
}
