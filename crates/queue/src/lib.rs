//! Durable, acknowledged message delivery for the fulfillment pipeline.
//!
//! The [`QueueClient`] trait is the producer/consumer contract the pipeline
//! is written against. Two implementations are provided:
//!
//! - [`PostgresQueue`]: messages live in PostgreSQL and are leased with
//!   `FOR UPDATE SKIP LOCKED`, so any number of worker processes can compete
//!   for the same queue.
//! - [`InMemoryQueue`]: same semantics inside one process, for tests and
//!   database-less runs.
//!
//! [`consume`] drives a [`MessageHandler`] over a queue with manual
//! acknowledgment until shutdown is signalled.

pub mod backoff;
pub mod client;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod message;
pub mod postgres;

pub use backoff::Backoff;
pub use client::{QueueClient, QueueClientExt};
pub use consumer::{ConsumeOptions, ConsumeSummary, HandlerDecision, MessageHandler, consume};
pub use error::{QueueError, Result};
pub use memory::{InMemoryQueue, PublishedMessage};
pub use message::{ConsumerId, Delivery, MessageId, QueueStats};
pub use postgres::{PostgresQueue, PostgresQueueOptions};
