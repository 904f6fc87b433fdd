use thiserror::Error;

use crate::message::MessageId;

/// Errors that can occur when talking to the queue substrate.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The queue was never declared.
    #[error("Unknown queue: {0}")]
    UnknownQueue(String),

    /// The delivery's lease ran out; the message may already be redelivered.
    #[error("Lease on message {0} expired or is held by another consumer")]
    LeaseExpired(MessageId),

    /// Connecting failed even after retrying.
    #[error("Failed to connect after {attempts} attempts: {reason}")]
    ConnectionFailed { attempts: u32, reason: String },

    /// The client was closed.
    #[error("Queue client is closed")]
    Closed,

    /// The broker is temporarily unreachable.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

impl QueueError {
    /// Returns true if retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Database(e) => is_transient_sqlx(e),
            QueueError::ConnectionFailed { .. } | QueueError::Unavailable(_) => true,
            _ => false,
        }
    }
}

fn is_transient_sqlx(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            code.starts_with("08") || code == "40001" || code == "40P01" || code.starts_with("57P0")
        }),
        _ => false,
    }
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;
