//! HTTP route handlers.

pub mod checkout;
pub mod dead_letters;
pub mod health;
pub mod metrics;
pub mod orders;
