//! API server and worker entry point.

use std::sync::Arc;

use api::config::{Config, LogFormat};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use pipeline::Pipeline;
use queue::{InMemoryQueue, PostgresQueue, PostgresQueueOptions, QueueClient};
use store::{FulfillmentStore, InMemoryFulfillmentStore, PostgresFulfillmentStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Runs the consumer loops and the HTTP server until a shutdown signal.
async fn run<S, Q>(
    config: &Config,
    store: Arc<S>,
    queue: Arc<Q>,
    metrics_handle: PrometheusHandle,
) -> Result<(), BoxError>
where
    S: FulfillmentStore + 'static,
    Q: QueueClient + ?Sized + 'static,
{
    let pipeline = Pipeline::spawn(store.clone(), queue.clone(), config.pipeline_config()).await?;

    let state = api::create_state(store, queue.clone(), config.health_timeout);
    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // In-flight jobs finish before the queue connection goes away
    pipeline.shutdown().await;
    queue.close().await?;
    served?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = PrometheusBuilder::new().install_recorder()?;

    // 3. Pick the backing store and queue, then serve
    match config.database_url.clone() {
        Some(url) => {
            let options = PostgresQueueOptions::new(url)
                .with_delivery_timeout(config.delivery_timeout);
            let queue = PostgresQueue::connect(options).await?;
            queue.run_migrations().await?;

            let store = PostgresFulfillmentStore::new(queue.channel().await?);
            tracing::info!("using PostgreSQL store and queue");
            run(&config, Arc::new(store), Arc::new(queue), metrics_handle).await
        }
        None => {
            let queue = InMemoryQueue::with_delivery_timeout(config.delivery_timeout);
            tracing::warn!("DATABASE_URL not set; running with in-memory store and queue");
            run(
                &config,
                Arc::new(InMemoryFulfillmentStore::new()),
                Arc::new(queue),
                metrics_handle,
            )
            .await
        }
    }
}
