//! Persistence for the order-fulfillment pipeline.
//!
//! Every concern sits behind an async trait with an in-memory implementation
//! (tests, database-less runs) and a PostgreSQL implementation.

pub mod dead_letter;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use dead_letter::{DeadLetterRecord, NewDeadLetter};
pub use error::{Result, StoreError};
pub use memory::InMemoryFulfillmentStore;
pub use postgres::PostgresFulfillmentStore;
pub use repository::{
    CartStore, CommitOutcome, DealAccountant, DeadLetterStore, FulfillmentStore, InsertOutcome,
    InventoryLedger, OrderRepository, RedemptionOutcome, RedemptionReport, StoreHealth,
};
