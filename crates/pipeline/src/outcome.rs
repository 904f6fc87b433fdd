//! Tagged results of processing one checkout job.

use common::OrderId;
use serde::{Deserialize, Serialize};

/// Why a job failed, which decides where it goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    /// Broker or database briefly unavailable; goes to the retry queue.
    Transient,
    /// Cannot succeed as published; goes straight to dead-letter.
    DomainInvalid,
    /// Crashed the worker repeatedly; dead-lettered past `max_deliveries`.
    Fatal,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "Transient",
            FailureClass::DomainInvalid => "DomainInvalid",
            FailureClass::Fatal => "Fatal",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of [`FulfillmentProcessor::process`](crate::FulfillmentProcessor::process).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every side effect committed and the order confirmed.
    Fulfilled {
        order_id: OrderId,
        order_number: String,
    },
    /// The order was already confirmed; nothing was done.
    Duplicate { order_id: OrderId },
    /// Worth retrying later.
    TransientFailure { reason: String },
    /// Will never succeed; the order (if any) is on hold.
    DomainFailure {
        order_id: Option<OrderId>,
        reason: String,
    },
}

impl Outcome {
    /// Returns true if the job needs no further routing.
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Fulfilled { .. } | Outcome::Duplicate { .. })
    }

    pub fn failure_class(&self) -> Option<FailureClass> {
        match self {
            Outcome::Fulfilled { .. } | Outcome::Duplicate { .. } => None,
            Outcome::TransientFailure { .. } => Some(FailureClass::Transient),
            Outcome::DomainFailure { .. } => Some(FailureClass::DomainInvalid),
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::TransientFailure { reason } | Outcome::DomainFailure { reason, .. } => {
                Some(reason)
            }
            _ => None,
        }
    }

    /// Short label used as a metric and log value.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Fulfilled { .. } => "fulfilled",
            Outcome::Duplicate { .. } => "duplicate",
            Outcome::TransientFailure { .. } => "transient_failure",
            Outcome::DomainFailure { .. } => "domain_failure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successes_have_no_failure_class() {
        let fulfilled = Outcome::Fulfilled {
            order_id: OrderId::new(),
            order_number: "ORD-1".into(),
        };
        assert!(fulfilled.is_success());
        assert_eq!(fulfilled.failure_class(), None);
        assert!(Outcome::Duplicate { order_id: OrderId::new() }.is_success());
    }

    #[test]
    fn test_failures_map_to_routing_class() {
        let transient = Outcome::TransientFailure {
            reason: "db down".into(),
        };
        assert_eq!(transient.failure_class(), Some(FailureClass::Transient));
        assert_eq!(transient.reason(), Some("db down"));

        let domain = Outcome::DomainFailure {
            order_id: None,
            reason: "bad".into(),
        };
        assert_eq!(domain.failure_class(), Some(FailureClass::DomainInvalid));
        assert_eq!(domain.label(), "domain_failure");
    }

    #[test]
    fn test_failure_class_round_trips_by_name() {
        assert_eq!(FailureClass::DomainInvalid.to_string(), "DomainInvalid");
        let parsed: FailureClass = serde_json::from_str("\"Fatal\"").unwrap();
        assert_eq!(parsed, FailureClass::Fatal);
    }
}
