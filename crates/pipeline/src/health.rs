//! Read-only health introspection.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use queue::{QueueClient, QueueStats};
use serde::Serialize;
use store::StoreHealth;

use crate::queues::ALL_QUEUES;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerHealth {
    pub connected: bool,
    pub queues: BTreeMap<String, QueueStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseHealth {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot returned by `GET /health`.
///
/// The broker block is serialized under `rabbitmq`, the key monitoring expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    #[serde(rename = "rabbitmq")]
    pub broker: BrokerHealth,
    pub database: DatabaseHealth,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Probes the broker and the database, each under a timeout.
///
/// Probe failures are reported in the snapshot, never returned as errors.
pub struct HealthReporter<S: StoreHealth + ?Sized, Q: QueueClient + ?Sized> {
    store: Arc<S>,
    queue: Arc<Q>,
    timeout: Duration,
}

impl<S: StoreHealth + ?Sized, Q: QueueClient + ?Sized> HealthReporter<S, Q> {
    pub fn new(store: Arc<S>, queue: Arc<Q>, timeout: Duration) -> Self {
        Self {
            store,
            queue,
            timeout,
        }
    }

    pub async fn check(&self) -> HealthReport {
        let (broker, database) = tokio::join!(self.check_broker(), self.check_database());
        let status = if broker.connected && broker.error.is_none() && database.connected {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };

        if status == HealthStatus::Unhealthy {
            tracing::warn!(
                broker_error = ?broker.error,
                database_error = ?database.error,
                "health check failed"
            );
        }

        HealthReport {
            status,
            broker,
            database,
        }
    }

    async fn check_broker(&self) -> BrokerHealth {
        if let Err(error) = probe(self.timeout, self.queue.ping()).await {
            return BrokerHealth {
                connected: false,
                queues: BTreeMap::new(),
                error: Some(error),
            };
        }

        let mut queues = BTreeMap::new();
        let mut errors = Vec::new();
        for name in ALL_QUEUES {
            match probe(self.timeout, self.queue.queue_stats(name)).await {
                Ok(stats) => {
                    queues.insert(name.to_string(), stats);
                }
                Err(error) => errors.push(format!("{name}: {error}")),
            }
        }

        BrokerHealth {
            connected: true,
            queues,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        }
    }

    async fn check_database(&self) -> DatabaseHealth {
        match probe(self.timeout, self.store.ping()).await {
            Ok(()) => DatabaseHealth {
                connected: true,
                error: None,
            },
            Err(error) => DatabaseHealth {
                connected: false,
                error: Some(error),
            },
        }
    }
}

async fn probe<T, E, F>(timeout: Duration, fut: F) -> Result<T, String>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
    }
}
